//! 协调存储契约
//!
//! 引擎消费的强一致KV语义层: 带版本的读写、乐观事务提交、租约与
//! 分布式FIFO队列。具体后端在基础设施层实现。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use cronflow_errors::{SchedError, SchedResult};

pub type LeaseId = i64;

/// 带版本元数据的值; 版本用于乐观事务的冲突检测
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: String,
    pub version: i64,
}

/// 事务写集中的单个操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: String },
    Delete { key: String },
}

/// 租约续期确认
#[derive(Debug, Clone, Copy)]
pub struct LeaseAck {
    pub lease_id: LeaseId,
    pub ttl_seconds: u64,
}

/// 强一致KV存储的语义层
#[async_trait]
pub trait CoordStore: Send + Sync {
    async fn get(&self, key: &str) -> SchedResult<Option<VersionedValue>>;
    /// 写入键值; 携带租约的键在租约过期时被删除
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> SchedResult<()>;
    async fn delete(&self, key: &str) -> SchedResult<()>;
    async fn get_prefix(&self, prefix: &str) -> SchedResult<Vec<(String, VersionedValue)>>;
    async fn delete_prefix(&self, prefix: &str) -> SchedResult<()>;

    /// 原子提交: 读集中每个键的当前版本与记录一致时应用写集,
    /// 否则返回false。不存在的键版本视为0。
    async fn commit(&self, reads: &[(String, i64)], writes: &[TxnOp]) -> SchedResult<bool>;

    async fn lease_grant(&self, ttl: Duration) -> SchedResult<LeaseId>;
    /// 续期确认流; 通道关闭意味着续期已失效
    async fn lease_keep_alive(&self, lease: LeaseId) -> SchedResult<mpsc::Receiver<LeaseAck>>;
    async fn lease_revoke(&self, lease: LeaseId) -> SchedResult<()>;

    /// 分布式FIFO入队, 跨生产者保持插入顺序
    async fn enqueue(&self, prefix: &str, value: &str) -> SchedResult<()>;
    /// 阻塞出队
    async fn dequeue(&self, prefix: &str) -> SchedResult<String>;
}

/// 乐观事务会话
///
/// 读操作穿透到存储并记录版本, 写操作缓存在写集中; `commit`校验
/// 读集版本后一次性应用写集, 冲突时返回[`SchedError::Conflict`],
/// 由调用方配合有界重试重新执行。
pub struct Stm<'a> {
    store: &'a dyn CoordStore,
    reads: HashMap<String, i64>,
    writes: HashMap<String, Option<String>>,
}

impl<'a> Stm<'a> {
    pub fn new(store: &'a dyn CoordStore) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            writes: HashMap::new(),
        }
    }

    /// 读取键值; 优先读本事务的未提交写
    pub async fn get(&mut self, key: &str) -> SchedResult<Option<String>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        match self.store.get(key).await? {
            Some(versioned) => {
                self.reads.entry(key.to_string()).or_insert(versioned.version);
                Ok(Some(versioned.value))
            }
            None => {
                self.reads.entry(key.to_string()).or_insert(0);
                Ok(None)
            }
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: String) {
        self.writes.insert(key.into(), Some(value));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.writes.insert(key.into(), None);
    }

    /// 提交事务; 读集版本不一致时返回冲突错误
    pub async fn commit(self) -> SchedResult<()> {
        let reads: Vec<(String, i64)> = self.reads.into_iter().collect();
        let writes: Vec<TxnOp> = self
            .writes
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => TxnOp::Put { key, value },
                None => TxnOp::Delete { key },
            })
            .collect();
        if self.store.commit(&reads, &writes).await? {
            Ok(())
        } else {
            Err(SchedError::conflict("事务读集已被其他写入者修改"))
        }
    }
}

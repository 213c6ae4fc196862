//! 内存协调存储
//!
//! 实现[`CoordStore`]契约的内存后端, 适用于嵌入式部署场景与测试。
//! 全局递增的修订号充当每个键的版本, 乐观提交据此做冲突检测;
//! 租约在读写路径上惰性过期; 队列基于Notify实现阻塞出队。

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use cronflow_domain::coordination::{CoordStore, LeaseAck, LeaseId, TxnOp, VersionedValue};
use cronflow_errors::{SchedError, SchedResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    version: i64,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct Lease {
    deadline: Instant,
    ttl: Duration,
    keys: HashSet<String>,
}

#[derive(Default)]
struct QueueSlot {
    items: VecDeque<String>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct StoreInner {
    kv: BTreeMap<String, Entry>,
    revision: i64,
    next_lease_id: LeaseId,
    leases: HashMap<LeaseId, Lease>,
    queues: HashMap<String, QueueSlot>,
}

impl StoreInner {
    /// 清理已过期的租约及其关联的键
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(lease) = self.leases.remove(&id) {
                debug!("租约 {} 过期, 删除 {} 个关联键", id, lease.keys.len());
                for key in lease.keys {
                    self.kv.remove(&key);
                }
            }
        }
    }

    /// 将键从原有租约上解绑
    fn detach_key(&mut self, key: &str) {
        if let Some(entry) = self.kv.get(key) {
            if let Some(lease_id) = entry.lease {
                if let Some(lease) = self.leases.get_mut(&lease_id) {
                    lease.keys.remove(key);
                }
            }
        }
    }

    fn apply_put(&mut self, key: String, value: String, lease: Option<LeaseId>) {
        self.detach_key(&key);
        self.revision += 1;
        if let Some(lease_id) = lease {
            if let Some(l) = self.leases.get_mut(&lease_id) {
                l.keys.insert(key.clone());
            }
        }
        self.kv.insert(
            key,
            Entry {
                value,
                version: self.revision,
                lease,
            },
        );
    }

    fn apply_delete(&mut self, key: &str) {
        self.detach_key(key);
        self.kv.remove(key);
    }

    fn current_version(&self, key: &str) -> i64 {
        self.kv.get(key).map(|e| e.version).unwrap_or(0)
    }
}

pub struct MemoryCoordStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryCoordStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
        }
    }
}

impl Default for MemoryCoordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordStore for MemoryCoordStore {
    async fn get(&self, key: &str) -> SchedResult<Option<VersionedValue>> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        Ok(inner.kv.get(key).map(|entry| VersionedValue {
            value: entry.value.clone(),
            version: entry.version,
        }))
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> SchedResult<()> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        if let Some(lease_id) = lease {
            if !inner.leases.contains_key(&lease_id) {
                return Err(SchedError::transient(format!("租约 {lease_id} 不存在")));
            }
        }
        inner.apply_put(key.to_string(), value.to_string(), lease);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SchedResult<()> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        inner.apply_delete(key);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> SchedResult<Vec<(String, VersionedValue)>> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        Ok(inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| {
                (
                    key.clone(),
                    VersionedValue {
                        value: entry.value.clone(),
                        version: entry.version,
                    },
                )
            })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> SchedResult<()> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        let keys: Vec<String> = inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            inner.apply_delete(&key);
        }
        Ok(())
    }

    async fn commit(&self, reads: &[(String, i64)], writes: &[TxnOp]) -> SchedResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        for (key, version) in reads {
            if inner.current_version(key) != *version {
                return Ok(false);
            }
        }
        for op in writes {
            match op {
                TxnOp::Put { key, value } => {
                    inner.apply_put(key.clone(), value.clone(), None);
                }
                TxnOp::Delete { key } => inner.apply_delete(key),
            }
        }
        Ok(true)
    }

    async fn lease_grant(&self, ttl: Duration) -> SchedResult<LeaseId> {
        let mut inner = self.inner.lock().await;
        inner.next_lease_id += 1;
        let id = inner.next_lease_id;
        inner.leases.insert(
            id,
            Lease {
                deadline: Instant::now() + ttl,
                ttl,
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn lease_keep_alive(&self, lease: LeaseId) -> SchedResult<mpsc::Receiver<LeaseAck>> {
        let interval = {
            let inner = self.inner.lock().await;
            match inner.leases.get(&lease) {
                Some(l) => l.ttl / 3,
                None => {
                    return Err(SchedError::transient(format!("租约 {lease} 不存在")));
                }
            }
        };

        let (tx, rx) = mpsc::channel(4);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                let ack = {
                    let mut guard = inner.lock().await;
                    guard.purge_expired(Instant::now());
                    match guard.leases.get_mut(&lease) {
                        Some(l) => {
                            l.deadline = Instant::now() + l.ttl;
                            Some(LeaseAck {
                                lease_id: lease,
                                ttl_seconds: l.ttl.as_secs(),
                            })
                        }
                        None => None,
                    }
                };
                match ack {
                    Some(ack) => {
                        if tx.send(ack).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        });
        Ok(rx)
    }

    async fn lease_revoke(&self, lease: LeaseId) -> SchedResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(l) = inner.leases.remove(&lease) {
            for key in l.keys {
                inner.kv.remove(&key);
            }
        }
        Ok(())
    }

    async fn enqueue(&self, prefix: &str, value: &str) -> SchedResult<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner.queues.entry(prefix.to_string()).or_default();
        slot.items.push_back(value.to_string());
        slot.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, prefix: &str) -> SchedResult<String> {
        loop {
            let notify = {
                let mut inner = self.inner.lock().await;
                let slot = inner.queues.entry(prefix.to_string()).or_default();
                if let Some(item) = slot.items.pop_front() {
                    return Ok(item);
                }
                slot.notify.clone()
            };
            notify.notified().await;
        }
    }
}

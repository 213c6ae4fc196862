//! agent注册循环
//!
//! 为每个服务的项目维持一条长期任务: 申请租约、持续续期, 并把节点
//! 信息写到带租约的注册键上。续期中断后等待1秒重建租约; 注册键随
//! 租约过期自动消失, 其他副本据此观察到节点下线。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use cronflow_common::constants::{
    REGISTER_LEASE_TTL_SECONDS, REGISTER_RETRY_INTERVAL, UNKNOWN_NODE_IP,
};
use cronflow_domain::coordination::CoordStore;
use cronflow_domain::entities::ClientInfo;
use cronflow_domain::keys;
use cronflow_errors::SchedResult;

pub struct Registrar {
    store: Arc<dyn CoordStore>,
    local_ip: String,
    version: String,
    removals: RwLock<HashMap<i64, broadcast::Sender<()>>>,
}

impl Registrar {
    pub fn new(store: Arc<dyn CoordStore>, node_ip: String, version: String) -> Arc<Self> {
        let local_ip = if node_ip.is_empty() {
            UNKNOWN_NODE_IP.to_string()
        } else {
            node_ip
        };
        Arc::new(Self {
            store,
            local_ip,
            version,
            removals: RwLock::new(HashMap::new()),
        })
    }

    pub fn local_ip(&self) -> &str {
        &self.local_ip
    }

    /// 为每个项目启动一条注册任务
    pub async fn register(self: &Arc<Self>, projects: &[i64]) -> SchedResult<()> {
        let info = ClientInfo {
            client_ip: self.local_ip.clone(),
            version: self.version.clone(),
        };
        let payload = serde_json::to_string(&info)?;
        for &project_id in projects {
            self.start_register(project_id, payload.clone()).await;
        }
        Ok(())
    }

    async fn start_register(self: &Arc<Self>, project_id: i64, client_info: String) {
        let (remove_tx, remove_rx) = broadcast::channel(1);
        self.removals.write().await.insert(project_id, remove_tx);
        let registrar = Arc::clone(self);
        tokio::spawn(async move {
            registrar
                .register_loop(project_id, client_info, remove_rx)
                .await;
        });
    }

    /// 停止某个项目的注册; 注册键随租约到期自然消失
    pub async fn remove_project(&self, project_id: i64) {
        if let Some(remove_tx) = self.removals.write().await.remove(&project_id) {
            let _ = remove_tx.send(());
        }
    }

    async fn register_loop(
        &self,
        project_id: i64,
        client_info: String,
        mut remove_rx: broadcast::Receiver<()>,
    ) {
        info!(project_id, "新的项目agent注册");
        let reg_key = keys::register_key(project_id, &self.local_ip);
        let ttl = Duration::from_secs(REGISTER_LEASE_TTL_SECONDS);

        loop {
            let lease = match self.store.lease_grant(ttl).await {
                Ok(lease) => lease,
                Err(err) => {
                    warn!(project_id, "创建租约失败: {}", err);
                    if wait_retry(&mut remove_rx).await {
                        return;
                    }
                    continue;
                }
            };

            let mut acks = match self.store.lease_keep_alive(lease).await {
                Ok(acks) => acks,
                Err(err) => {
                    warn!(project_id, "开启租约续期失败: {}", err);
                    if wait_retry(&mut remove_rx).await {
                        return;
                    }
                    continue;
                }
            };

            if let Err(err) = self.store.put(&reg_key, &client_info, Some(lease)).await {
                warn!(project_id, "写入注册键失败: {}", err);
                if wait_retry(&mut remove_rx).await {
                    return;
                }
                continue;
            }

            loop {
                tokio::select! {
                    ack = acks.recv() => {
                        if ack.is_none() {
                            // 续租失败
                            warn!(project_id, "租约续期中断, 准备重新注册");
                            break;
                        }
                    }
                    _ = remove_rx.recv() => {
                        info!(project_id, "停止注册该项目");
                        return;
                    }
                }
            }

            if wait_retry(&mut remove_rx).await {
                return;
            }
        }
    }
}

/// 重试前的等待; 期间收到移除信号则返回true
async fn wait_retry(remove_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(REGISTER_RETRY_INTERVAL) => false,
        _ = remove_rx.recv() => true,
    }
}

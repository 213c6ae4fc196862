//! 优雅关闭管理

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::info;

/// 进程级关闭信号的分发器
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    fired: AtomicBool,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            fired: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭; 只有第一次调用生效
    pub fn shutdown(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "触发系统关闭, 通知 {} 个订阅者",
            self.shutdown_tx.receiver_count()
        );
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_signal_once() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        assert!(!manager.is_shutdown());

        manager.shutdown();
        manager.shutdown();
        assert!(manager.is_shutdown());
        assert!(rx.recv().await.is_ok());
    }
}

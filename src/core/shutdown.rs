//! 优雅关闭
//!
//! 监听 Ctrl+C / SIGTERM，通知 HTTP 服务停止接收请求，随后中止仍在运行的会话任务。
//! 被中止任务的内存状态随进程丢失，下次启动由恢复逻辑处理。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::session::SessionRegistry;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 中止所有活跃任务，并给各自的 supervisor 一点时间完成收尾
pub async fn abort_active_jobs(registry: &SessionRegistry, grace: Duration) -> usize {
    let aborted = registry.abort_all().await;
    if aborted > 0 {
        tracing::info!(aborted, "Aborting active session jobs");
        tokio::time::sleep(grace).await;
    }
    aborted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.is_shutdown());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_reason_is_broadcast() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::FatalError("disk full".into()));
        assert_eq!(
            rx.recv().await.unwrap(),
            ShutdownReason::FatalError("disk full".into())
        );
        manager.wait_for_shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_active_jobs_aborts_handles() {
        let registry = SessionRegistry::new();
        let ticket = registry.claim_job(1).await.unwrap();
        let job = tokio::spawn(std::future::pending::<()>());
        registry.attach_abort_handle(ticket, job.abort_handle()).await;

        assert_eq!(abort_active_jobs(&registry, Duration::from_millis(10)).await, 1);
        assert!(job.await.unwrap_err().is_cancelled());
        assert_eq!(registry.active_count().await, 0);
    }
}

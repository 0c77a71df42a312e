//! 会话注册表：按会话 ID 持有事件总线、活跃任务标记与反馈唤醒信号
//!
//! 进程启动时显式创建一份并共享；删除会话时移除对应条目，避免内存无限增长。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Notify, RwLock};
use tokio::task::AbortHandle;

use super::event::ProgressEvent;
use super::event_bus::{EventBus, Subscription};
use crate::core::SessionError;
use crate::store::SessionId;

/// 任务 ID（区分同一会话的先后两次任务）
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct JobId(u64);

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// 活跃任务凭据：claim_job 成功后获得，结束时交还
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct JobTicket {
    pub session_id: SessionId,
    pub job_id: JobId,
}

struct ActiveJob {
    job_id: JobId,
    started_at: Instant,
    abort: Option<AbortHandle>,
}

/// 进程级会话注册表
#[derive(Default)]
pub struct SessionRegistry {
    buses: RwLock<HashMap<SessionId, Arc<EventBus>>>,
    jobs: RwLock<HashMap<SessionId, ActiveJob>>,
    feedback_signals: RwLock<HashMap<SessionId, Arc<Notify>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或懒创建会话总线
    pub async fn bus(&self, session_id: SessionId) -> Arc<EventBus> {
        if let Some(bus) = self.buses.read().await.get(&session_id) {
            return Arc::clone(bus);
        }
        let mut buses = self.buses.write().await;
        Arc::clone(buses.entry(session_id).or_insert_with(|| Arc::new(EventBus::new())))
    }

    pub async fn publish(&self, session_id: SessionId, event: ProgressEvent) -> usize {
        let kind = event.kind();
        let delivered = self.bus(session_id).await.publish(event);
        tracing::debug!(session_id, kind, delivered, "Published progress event");
        delivered
    }

    pub async fn subscribe(&self, session_id: SessionId) -> Subscription {
        self.bus(session_id).await.subscribe()
    }

    /// 结束会话当前所有读者并移除总线；之后的订阅会拿到一条新总线
    pub async fn close_bus(&self, session_id: SessionId) {
        if let Some(bus) = self.buses.write().await.remove(&session_id) {
            bus.close();
        }
    }

    pub async fn has_bus(&self, session_id: SessionId) -> bool {
        self.buses.read().await.contains_key(&session_id)
    }

    /// 占用会话的活跃任务标记；已有任务时拒绝
    pub async fn claim_job(&self, session_id: SessionId) -> Result<JobTicket, SessionError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&session_id) {
            return Err(SessionError::AlreadyRunning(session_id));
        }
        let job_id = JobId::next();
        jobs.insert(
            session_id,
            ActiveJob {
                job_id,
                started_at: Instant::now(),
                abort: None,
            },
        );
        Ok(JobTicket { session_id, job_id })
    }

    /// 记录任务句柄；任务已结束（标记已释放）时忽略
    pub async fn attach_abort_handle(&self, ticket: JobTicket, handle: AbortHandle) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&ticket.session_id) {
            if job.job_id == ticket.job_id {
                job.abort = Some(handle);
            }
        }
    }

    /// 释放活跃任务标记；只释放与凭据匹配的那一次任务
    pub async fn release_job(&self, ticket: JobTicket) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&ticket.session_id) {
            Some(job) if job.job_id == ticket.job_id => {
                let elapsed = job.started_at.elapsed();
                jobs.remove(&ticket.session_id);
                tracing::debug!(
                    session_id = ticket.session_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Released job marker"
                );
                true
            }
            _ => false,
        }
    }

    pub async fn is_active(&self, session_id: SessionId) -> bool {
        self.jobs.read().await.contains_key(&session_id)
    }

    pub async fn active_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// 会话的反馈唤醒信号（供 FeedbackWatch 提前醒来）
    pub async fn feedback_signal(&self, session_id: SessionId) -> Arc<Notify> {
        if let Some(signal) = self.feedback_signals.read().await.get(&session_id) {
            return Arc::clone(signal);
        }
        let mut signals = self.feedback_signals.write().await;
        Arc::clone(signals.entry(session_id).or_insert_with(|| Arc::new(Notify::new())))
    }

    /// 反馈写入后唤醒等待中的任务
    pub async fn notify_feedback(&self, session_id: SessionId) {
        if let Some(signal) = self.feedback_signals.read().await.get(&session_id) {
            signal.notify_one();
        }
    }

    /// 会话删除或任务收尾时调用：结束流并移除反馈信号；活跃标记由任务自身释放
    pub async fn teardown(&self, session_id: SessionId) {
        self.close_bus(session_id).await;
        if let Some(signal) = self.feedback_signals.write().await.remove(&session_id) {
            signal.notify_one();
        }
    }

    /// 中止所有活跃任务（进程关闭时）
    pub async fn abort_all(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        for (session_id, job) in jobs.drain() {
            if let Some(handle) = job.abort {
                handle.abort();
            }
            tracing::info!(session_id, "Aborted active job on shutdown");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_job_per_session() {
        let registry = SessionRegistry::new();
        let ticket = registry.claim_job(1).await.unwrap();
        assert!(matches!(
            registry.claim_job(1).await,
            Err(SessionError::AlreadyRunning(1))
        ));
        assert!(registry.claim_job(2).await.is_ok());
        assert_eq!(registry.active_count().await, 2);

        assert!(registry.release_job(ticket).await);
        assert!(!registry.release_job(ticket).await);
        assert!(!registry.is_active(1).await);
        assert!(registry.claim_job(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_ticket_does_not_release_newer_job() {
        let registry = SessionRegistry::new();
        let old = registry.claim_job(5).await.unwrap();
        registry.release_job(old).await;
        let _new = registry.claim_job(5).await.unwrap();
        assert!(!registry.release_job(old).await);
        assert!(registry.is_active(5).await);
    }

    #[tokio::test]
    async fn test_bus_is_lazy_and_removed_on_teardown() {
        let registry = SessionRegistry::new();
        assert!(!registry.has_bus(3).await);
        let mut sub = registry.subscribe(3).await;
        assert!(registry.has_bus(3).await);

        registry.publish(3, ProgressEvent::ping()).await;
        registry.teardown(3).await;
        assert!(!registry.has_bus(3).await);
        assert_eq!(sub.recv().await, Some(ProgressEvent::ping()));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_feedback_signal_stores_permit() {
        let registry = SessionRegistry::new();
        let signal = registry.feedback_signal(9).await;
        registry.notify_feedback(9).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
            .await
            .expect("permit should be stored");
    }
}

//! 反馈等待：轮询存储中的人工反馈，至多等待 max_wait
//!
//! 每次轮询都重新读取存储（不使用缓存副本）。可选的 Notify 只用于提前醒来，
//! 是否拿到反馈始终以存储为准。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::SessionError;
use crate::store::{RecordStore, SessionId};

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// 默认最长等待（300 次轮询）
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// 反馈轮询器
#[derive(Clone)]
pub struct FeedbackWatch {
    store: Arc<dyn RecordStore>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl FeedbackWatch {
    pub fn new(store: Arc<dyn RecordStore>, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            store,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            max_wait,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// 等待反馈：拿到非空文本立即返回；超时返回 FeedbackTimeout；会话被删除返回 NotFound
    pub async fn wait(
        &self,
        session_id: SessionId,
        wake: Option<Arc<Notify>>,
    ) -> Result<String, SessionError> {
        let deadline = Instant::now() + self.max_wait;
        let mut polls: u64 = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(session_id, polls, "Feedback wait timed out");
                return Err(SessionError::FeedbackTimeout {
                    waited_secs: self.max_wait.as_secs(),
                });
            }

            let nap = self.poll_interval.min(deadline - now);
            match &wake {
                Some(signal) => {
                    tokio::select! {
                        _ = tokio::time::sleep(nap) => {}
                        _ = signal.notified() => {}
                    }
                }
                None => tokio::time::sleep(nap).await,
            }
            polls += 1;

            let session = self
                .store
                .get_session(session_id)
                .await?
                .ok_or(SessionError::NotFound(session_id))?;
            if let Some(feedback) = session.submitted_feedback() {
                tracing::debug!(session_id, polls, "Feedback observed");
                return Ok(feedback.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;

    async fn setup() -> (Arc<dyn RecordStore>, SessionId) {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let session = store.create_session("topic", 2).await.unwrap();
        (store, session.id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_feedback_written_later() {
        let (store, id) = setup().await;
        let watch = FeedbackWatch::new(store.clone(), DEFAULT_POLL_INTERVAL, DEFAULT_MAX_WAIT);

        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            writer.set_feedback(id, Some("approve")).await.unwrap();
        });

        let started = Instant::now();
        let feedback = watch.wait(id, None).await.unwrap();
        assert_eq!(feedback, "approve");
        assert!(started.elapsed() <= Duration::from_secs(7) + DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_feedback() {
        let (store, id) = setup().await;
        let watch = FeedbackWatch::new(store, Duration::from_secs(2), Duration::from_secs(10));
        let started = Instant::now();
        let err = watch.wait(id, None).await.unwrap_err();
        assert!(matches!(err, SessionError::FeedbackTimeout { waited_secs: 10 }));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_feedback_is_ignored() {
        let (store, id) = setup().await;
        store.set_feedback(id, Some("   ")).await.unwrap();
        let watch = FeedbackWatch::new(store, Duration::from_secs(2), Duration::from_secs(6));
        assert!(matches!(
            watch.wait(id, None).await,
            Err(SessionError::FeedbackTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_wakes_before_poll_interval() {
        let (store, id) = setup().await;
        let watch = FeedbackWatch::new(store.clone(), Duration::from_secs(60), DEFAULT_MAX_WAIT);
        let signal = Arc::new(Notify::new());

        store.set_feedback(id, Some("more detail")).await.unwrap();
        signal.notify_one();

        let started = Instant::now();
        assert_eq!(watch.wait(id, Some(signal)).await.unwrap(), "more detail");
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_session_stops_the_wait() {
        let (store, id) = setup().await;
        store.delete_session(id).await.unwrap();
        let watch = FeedbackWatch::new(store, DEFAULT_POLL_INTERVAL, DEFAULT_MAX_WAIT);
        assert!(matches!(
            watch.wait(id, None).await,
            Err(SessionError::NotFound(_))
        ));
    }
}

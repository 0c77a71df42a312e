//! 研究会话服务：对外的同步操作入口
//!
//! 校验、查询、反馈提交、进度流与删除；启动任务交给 Orchestrator。
//! 同步错误直接返回，不改变会话状态。

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use serde::Serialize;

use super::event::ProgressEvent;
use super::event_bus::{Delivery, Subscription};
use super::feedback::FeedbackWatch;
use super::orchestrator::Orchestrator;
use super::registry::SessionRegistry;
use crate::config::AppConfig;
use crate::core::{SessionError, SessionStatus};
use crate::pipeline::ResearchPipeline;
use crate::store::{Persona, RecordStore, Report, Session, SessionId, DEFAULT_LIST_LIMIT};

/// 分析师数量合法范围
pub const MIN_ANALYSTS: i64 = 1;
pub const MAX_ANALYSTS: i64 = 10;

/// 会话详情（含分析师）
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub analysts: Vec<Persona>,
}

/// 单个读者的进度流：先给出连接事件，之后转发总线事件，空闲时插入 ping
pub struct ProgressStream {
    greeting: Option<ProgressEvent>,
    subscription: Subscription,
    idle: Duration,
}

impl ProgressStream {
    /// 下一个事件；总线关闭且已读完时返回 None
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        if let Some(event) = self.greeting.take() {
            return Some(event);
        }
        match self.subscription.recv_timeout(self.idle).await {
            Delivery::Event(event) => Some(event),
            Delivery::Idle => Some(ProgressEvent::ping()),
            Delivery::Closed => None,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        stream::unfold(self, |mut progress| async move {
            progress.next_event().await.map(|event| (event, progress))
        })
    }
}

pub struct ResearchService {
    store: Arc<dyn RecordStore>,
    registry: Arc<SessionRegistry>,
    orchestrator: Arc<Orchestrator>,
    stream_idle: Duration,
}

impl ResearchService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<SessionRegistry>,
        orchestrator: Arc<Orchestrator>,
        stream_idle: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            orchestrator,
            stream_idle,
        }
    }

    /// 按 [orchestrator] 配置装配注册表、反馈等待与编排器
    pub fn from_config(
        cfg: &AppConfig,
        store: Arc<dyn RecordStore>,
        pipeline: Arc<dyn ResearchPipeline>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let watch = FeedbackWatch::new(
            Arc::clone(&store),
            cfg.orchestrator.poll_interval(),
            cfg.orchestrator.feedback_timeout(),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            pipeline,
            watch,
            cfg.orchestrator.pipeline_timeout(),
        ));
        Self::new(store, registry, orchestrator, cfg.orchestrator.stream_idle())
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// 校验输入、创建 pending 会话并在后台启动任务
    pub async fn create_session(&self, topic: &str, max_analysts: i64) -> Result<Session, SessionError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(SessionError::Validation("Topic cannot be empty.".to_string()));
        }
        if !(MIN_ANALYSTS..=MAX_ANALYSTS).contains(&max_analysts) {
            return Err(SessionError::Validation(format!(
                "max_analysts must be between {} and {}.",
                MIN_ANALYSTS, MAX_ANALYSTS
            )));
        }
        let max_analysts = u8::try_from(max_analysts)
            .map_err(|e| SessionError::Validation(e.to_string()))?;

        let session = self.store.create_session(topic, max_analysts).await?;
        tracing::info!(session_id = session.id, topic, max_analysts, "Session created");
        self.orchestrator.start(session.id).await?;
        Ok(session)
    }

    /// 最新的在前；limit 缺省为 50
    pub async fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<Session>, SessionError> {
        let sessions = self
            .store
            .list_sessions(limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .await?;
        Ok(sessions)
    }

    pub async fn get_session(&self, id: SessionId) -> Result<SessionDetail, SessionError> {
        let session = self.require(id).await?;
        let analysts = self.store.list_personas(id).await?;
        Ok(SessionDetail { session, analysts })
    }

    pub async fn get_report(&self, id: SessionId) -> Result<Report, SessionError> {
        let session = self.require(id).await?;
        self.store
            .get_report(id)
            .await?
            .ok_or(SessionError::NotReady {
                status: session.status,
            })
    }

    /// 仅在 awaiting_feedback 时接受；同一轮只接受一次
    pub async fn submit_feedback(&self, id: SessionId, feedback: &str) -> Result<Session, SessionError> {
        let session = self.require(id).await?;
        if !session.status.accepts_feedback() {
            return Err(SessionError::InvalidState {
                status: session.status,
            });
        }
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(SessionError::Validation("Feedback cannot be empty.".to_string()));
        }
        if session.submitted_feedback().is_some() {
            return Err(SessionError::Validation(
                "Feedback was already submitted for this run.".to_string(),
            ));
        }

        let updated = self.store.set_feedback(id, Some(feedback)).await?;
        self.registry.notify_feedback(id).await;
        tracing::info!(session_id = id, "Feedback submitted");
        Ok(updated)
    }

    pub async fn stream_progress(&self, id: SessionId) -> Result<ProgressStream, SessionError> {
        let session = self.require(id).await?;
        let subscription = self.registry.subscribe(id).await;
        Ok(ProgressStream {
            greeting: Some(ProgressEvent::connected(session.status)),
            subscription,
            idle: self.stream_idle,
        })
    }

    /// 删除会话（级联分析师与报告）并结束所有进度流；活跃任务随后的写入会失败
    pub async fn delete_session(&self, id: SessionId) -> Result<(), SessionError> {
        if !self.store.delete_session(id).await? {
            return Err(SessionError::NotFound(id));
        }
        self.registry.teardown(id).await;
        let active = self.registry.is_active(id).await;
        tracing::info!(session_id = id, active, "Session deleted");
        Ok(())
    }

    /// 人工重跑：重置为 pending、清空反馈后重新启动；分析师与报告在新一轮中整体替换
    pub async fn rerun_session(&self, id: SessionId) -> Result<Session, SessionError> {
        self.require(id).await?;
        if self.registry.is_active(id).await {
            return Err(SessionError::AlreadyRunning(id));
        }
        let session = self.store.reset_session(id).await?;
        tracing::info!(session_id = id, "Session reset for rerun");
        self.orchestrator.start(id).await?;
        Ok(session)
    }

    /// 启动时处理上个进程遗留的会话：pending/running 标记失败，awaiting_feedback 恢复等待
    pub async fn recover_orphaned_sessions(&self) -> Result<usize, SessionError> {
        let sessions = self.store.list_sessions(usize::MAX).await?;
        let mut recovered = 0;

        for session in sessions {
            match session.status {
                SessionStatus::Pending | SessionStatus::Running => {
                    self.store
                        .update_status(session.id, SessionStatus::Failed)
                        .await?;
                    tracing::warn!(
                        session_id = session.id,
                        status = %session.status,
                        "Marked orphaned session as failed"
                    );
                    recovered += 1;
                }
                SessionStatus::AwaitingFeedback => {
                    self.orchestrator.resume(session.id).await?;
                    tracing::info!(session_id = session.id, "Resumed feedback wait");
                    recovered += 1;
                }
                SessionStatus::Completed | SessionStatus::Failed => {}
            }
        }
        Ok(recovered)
    }

    async fn require(&self, id: SessionId) -> Result<Session, SessionError> {
        self.store
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound(id))
    }
}

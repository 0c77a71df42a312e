//! 会话编排器：驱动一次研究任务从阶段一到报告完成
//!
//! 每个任务由两层 tokio 任务组成：worker 执行实际步骤，supervisor 等待 worker 结束
//! （包括 panic / abort），统一做收尾：失败落库、发布 error、释放活跃标记、关闭总线。
//! 流水线调用再单独 spawn，不占用处理请求的执行上下文。

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinError, JoinHandle};

use super::event::ProgressEvent;
use super::feedback::FeedbackWatch;
use super::registry::{JobTicket, SessionRegistry};
use crate::core::{SessionError, SessionStatus};
use crate::pipeline::{PersonaRequest, PipelineError, ReportRequest, ResearchPipeline};
use crate::store::{RecordStore, Session, SessionId};

/// 任务入口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    /// 从阶段一开始（pending 会话）
    Fresh,
    /// 重启恢复：直接进入反馈等待（awaiting_feedback 会话）
    AwaitFeedback,
}

/// 被 drop 时中止流水线子任务，worker 被 abort 时子任务随之结束
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    registry: Arc<SessionRegistry>,
    pipeline: Arc<dyn ResearchPipeline>,
    watch: FeedbackWatch,
    /// 单次阶段调用上限，None 表示不限制
    pipeline_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<SessionRegistry>,
        pipeline: Arc<dyn ResearchPipeline>,
        watch: FeedbackWatch,
        pipeline_timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            registry,
            pipeline,
            watch,
            pipeline_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 为 pending 会话启动任务；返回 supervisor 句柄，结束即代表收尾完成
    pub async fn start(self: &Arc<Self>, session_id: SessionId) -> Result<JoinHandle<()>, SessionError> {
        let session = self.load(session_id).await?;
        if session.status != SessionStatus::Pending {
            return Err(SessionError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Running,
            });
        }
        self.launch(session_id, Entry::Fresh).await
    }

    /// 为 awaiting_feedback 会话恢复任务（进程重启后）
    pub async fn resume(self: &Arc<Self>, session_id: SessionId) -> Result<JoinHandle<()>, SessionError> {
        let session = self.load(session_id).await?;
        if !session.status.accepts_feedback() {
            return Err(SessionError::InvalidState {
                status: session.status,
            });
        }
        self.launch(session_id, Entry::AwaitFeedback).await
    }

    async fn launch(
        self: &Arc<Self>,
        session_id: SessionId,
        entry: Entry,
    ) -> Result<JoinHandle<()>, SessionError> {
        let ticket = self.registry.claim_job(session_id).await?;
        tracing::info!(session_id, ?entry, "Job started");

        let worker = tokio::spawn(Arc::clone(self).run(session_id, entry));
        self.registry
            .attach_abort_handle(ticket, worker.abort_handle())
            .await;

        Ok(tokio::spawn(Arc::clone(self).supervise(ticket, worker)))
    }

    async fn supervise(self: Arc<Self>, ticket: JobTicket, worker: JoinHandle<Result<(), SessionError>>) {
        let session_id = ticket.session_id;
        let outcome = match worker.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(SessionError::Internal("job aborted".to_string())),
            Err(e) => Err(SessionError::Internal(format!(
                "job panicked: {}",
                panic_message(e)
            ))),
        };

        match outcome {
            Ok(()) => tracing::info!(session_id, "Job finished"),
            Err(err) => self.fail(session_id, &err).await,
        }

        self.registry.teardown(session_id).await;
        self.registry.release_job(ticket).await;
    }

    async fn run(self: Arc<Self>, session_id: SessionId, entry: Entry) -> Result<(), SessionError> {
        let session = self.load(session_id).await?;

        if entry == Entry::Fresh {
            self.advance(session_id, SessionStatus::Running).await?;
            self.store.set_feedback(session_id, None).await?;
            self.publish(
                session_id,
                ProgressEvent::status(SessionStatus::Running, "Agent started"),
            )
            .await;

            let request = PersonaRequest {
                session_id,
                topic: session.topic.clone(),
                max_analysts: session.max_analysts,
            };
            let pipeline = Arc::clone(&self.pipeline);
            let personas = self
                .offload("persona", async move { pipeline.generate_personas(request).await })
                .await?;

            self.store.replace_personas(session_id, &personas).await?;
            self.advance(session_id, SessionStatus::AwaitingFeedback).await?;
            self.publish(
                session_id,
                ProgressEvent::AnalystsReady {
                    analysts: personas,
                    status: SessionStatus::AwaitingFeedback,
                },
            )
            .await;
        }

        let signal = self.registry.feedback_signal(session_id).await;
        let feedback = self.watch.wait(session_id, Some(signal)).await?;
        self.publish(
            session_id,
            ProgressEvent::FeedbackReceived {
                feedback: feedback.clone(),
                message: "Feedback received, running interviews...".to_string(),
            },
        )
        .await;
        self.advance(session_id, SessionStatus::Running).await?;

        let personas: Vec<_> = self
            .store
            .list_personas(session_id)
            .await?
            .iter()
            .map(|p| p.to_draft())
            .collect();
        self.publish(
            session_id,
            ProgressEvent::InterviewProgress {
                message: format!("Running {} parallel analyst interviews...", personas.len()),
            },
        )
        .await;

        let request = ReportRequest {
            session_id,
            topic: session.topic,
            personas,
            feedback,
        };
        let pipeline = Arc::clone(&self.pipeline);
        let report = self
            .offload("report", async move { pipeline.write_report(request).await })
            .await?;

        self.store.replace_report(session_id, &report).await?;
        self.advance(session_id, SessionStatus::Completed).await?;
        self.publish(
            session_id,
            ProgressEvent::ReportReady {
                message: "Report complete!".to_string(),
                status: SessionStatus::Completed,
            },
        )
        .await;
        Ok(())
    }

    /// 在独立任务上执行流水线阶段，按配置限时
    async fn offload<T, F>(&self, phase: &'static str, call: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let mut handle = tokio::spawn(call);
        let _guard = AbortOnDrop(handle.abort_handle());

        let joined = match self.pipeline_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(PipelineError::Timeout {
                        phase,
                        secs: limit.as_secs(),
                    }
                    .into())
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => Ok(result?),
            Err(e) => Err(PipelineError::Crashed {
                phase,
                reason: panic_message(e),
            }
            .into()),
        }
    }

    /// 按状态机校验后写入新状态
    async fn advance(&self, session_id: SessionId, next: SessionStatus) -> Result<Session, SessionError> {
        let current = self.load(session_id).await?;
        current.status.transition(next)?;
        let updated = self.store.update_status(session_id, next).await?;
        tracing::debug!(session_id, from = %current.status, to = %next, "Status transition");
        Ok(updated)
    }

    async fn load(&self, session_id: SessionId) -> Result<Session, SessionError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or(SessionError::NotFound(session_id))
    }

    async fn publish(&self, session_id: SessionId, event: ProgressEvent) {
        self.registry.publish(session_id, event).await;
    }

    /// 任务失败：非终态会话落为 failed，并发布一条 error；本身不再返回错误
    async fn fail(&self, session_id: SessionId, err: &SessionError) {
        tracing::warn!(session_id, error = %err, "Job failed");

        match self.store.get_session(session_id).await {
            Ok(Some(session)) if !session.status.is_terminal() => {
                if let Err(e) = self.store.update_status(session_id, SessionStatus::Failed).await {
                    tracing::error!(session_id, error = %e, "Failed to persist failed status");
                }
            }
            Ok(Some(session)) => {
                tracing::debug!(session_id, status = %session.status, "Session already terminal");
            }
            Ok(None) => tracing::debug!(session_id, "Session deleted while job was active"),
            Err(e) => tracing::error!(session_id, error = %e, "Failed to load session on failure"),
        }

        self.publish(session_id, ProgressEvent::error(err.to_string()))
            .await;
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "cancelled".to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PhaseBehavior, ScriptedPipeline};
    use crate::session::event_bus::Delivery;
    use crate::store::MemoryRecordStore;

    struct Fixture {
        store: Arc<dyn RecordStore>,
        registry: Arc<SessionRegistry>,
        orchestrator: Arc<Orchestrator>,
    }

    fn fixture(pipeline: ScriptedPipeline, timeout: Option<Duration>) -> Fixture {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let registry = Arc::new(SessionRegistry::new());
        let watch = FeedbackWatch::new(store.clone(), Duration::from_secs(2), Duration::from_secs(20));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            registry.clone(),
            Arc::new(pipeline),
            watch,
            timeout,
        ));
        Fixture {
            store,
            registry,
            orchestrator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_second_job_for_same_session() {
        let fx = fixture(ScriptedPipeline::new(), None);
        let session = fx.store.create_session("topic", 2).await.unwrap();
        let job = fx.orchestrator.start(session.id).await.unwrap();

        assert!(matches!(
            fx.orchestrator.start(session.id).await,
            Err(SessionError::InvalidTransition { .. }) | Err(SessionError::AlreadyRunning(_))
        ));

        while fx.store.get_session(session.id).await.unwrap().unwrap().status
            != SessionStatus::AwaitingFeedback
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        fx.store.set_feedback(session.id, Some("approve")).await.unwrap();
        job.await.unwrap();

        let stored = fx.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert!(!fx.registry.is_active(session.id).await);
        assert!(fx.store.get_report(session.id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_timeout_fails_job() {
        let fx = fixture(
            ScriptedPipeline::new().with_delay(Duration::from_secs(120)),
            Some(Duration::from_secs(30)),
        );
        let session = fx.store.create_session("slow", 1).await.unwrap();
        let mut sub = fx.registry.subscribe(session.id).await;

        fx.orchestrator.start(session.id).await.unwrap().await.unwrap();

        let stored = fx.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(sub.recv().await.map(|e| e.kind()), Some("status"));
        match sub.recv().await {
            Some(ProgressEvent::Error { message, .. }) => assert!(message.contains("persona")),
            other => panic!("expected error event, got {:?}", other),
        }
        assert_eq!(sub.recv_timeout(Duration::from_secs(1)).await, Delivery::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_phase_still_cleans_up() {
        let fx = fixture(
            ScriptedPipeline::new().with_personas(PhaseBehavior::Panic),
            None,
        );
        let session = fx.store.create_session("fragile", 2).await.unwrap();
        fx.orchestrator.start(session.id).await.unwrap().await.unwrap();

        let stored = fx.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(!fx.registry.is_active(session.id).await);
        assert!(!fx.registry.has_bus(session.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_skips_phase_one() {
        let pipeline = Arc::new(ScriptedPipeline::new());
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let registry = Arc::new(SessionRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            registry,
            pipeline.clone(),
            FeedbackWatch::new(store.clone(), Duration::from_secs(2), Duration::from_secs(20)),
            None,
        ));

        let session = store.create_session("resumed", 2).await.unwrap();
        store.update_status(session.id, SessionStatus::Running).await.unwrap();
        store
            .replace_personas(session.id, &ScriptedPipeline::default_personas("resumed", 2))
            .await
            .unwrap();
        store
            .update_status(session.id, SessionStatus::AwaitingFeedback)
            .await
            .unwrap();
        store.set_feedback(session.id, Some("approve")).await.unwrap();

        orchestrator.resume(session.id).await.unwrap().await.unwrap();

        assert_eq!(pipeline.persona_calls(), 0);
        assert_eq!(pipeline.report_calls(), 1);
        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(pipeline.report_requests()[0].personas.len(), 2);
    }
}

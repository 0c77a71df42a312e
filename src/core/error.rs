//! 会话错误类型
//!
//! 同步请求错误（Validation / NotFound / InvalidState / NotReady）直接返回给调用方；
//! 任务内错误（FeedbackTimeout / Pipeline / Persistence）由编排器转为 failed 状态与 error 事件。

use thiserror::Error;

use super::state::SessionStatus;
use crate::pipeline::PipelineError;
use crate::store::{SessionId, StoreError};

/// 会话操作与后台任务可能出现的错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Report not yet available. Session status: {status}")]
    NotReady { status: SessionStatus },

    #[error("Session is not awaiting feedback (current status: {status})")]
    InvalidState { status: SessionStatus },

    #[error("Session {0} already has an active job")]
    AlreadyRunning(SessionId),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    #[error("Timed out waiting for human feedback after {waited_secs}s")]
    FeedbackTimeout { waited_secs: u64 },

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// 对外接口使用的状态码类别
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::Validation(_) | SessionError::InvalidState { .. } => 400,
            SessionError::NotFound(_) | SessionError::NotReady { .. } => 404,
            SessionError::AlreadyRunning(_) | SessionError::InvalidTransition { .. } => 409,
            SessionError::FeedbackTimeout { .. } => 504,
            SessionError::Pipeline(_) => 502,
            SessionError::Persistence(_) | SessionError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_classes() {
        assert_eq!(SessionError::Validation("bad".into()).status_code(), 400);
        assert_eq!(SessionError::NotFound(7).status_code(), 404);
        assert_eq!(
            SessionError::InvalidState { status: SessionStatus::Running }.status_code(),
            400
        );
        assert_eq!(
            SessionError::NotReady { status: SessionStatus::AwaitingFeedback }.status_code(),
            404
        );
        assert_eq!(SessionError::AlreadyRunning(1).status_code(), 409);
    }

    #[test]
    fn test_messages_carry_status() {
        let err = SessionError::InvalidState { status: SessionStatus::Running };
        assert_eq!(
            err.to_string(),
            "Session is not awaiting feedback (current status: running)"
        );
        let err = SessionError::NotReady { status: SessionStatus::Pending };
        assert!(err.to_string().ends_with("pending"));
    }
}

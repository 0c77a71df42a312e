//! 进度事件：编排器发布、流订阅者消费，从不持久化
//!
//! 每个事件是 `{kind, payload}`，payload 形状按 kind 固定。

use serde::Serialize;

use crate::core::SessionStatus;
use crate::store::PersonaDraft;

/// 会话进度事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 一般状态更新（含连接时的合成事件）
    Status { status: SessionStatus, message: String },
    /// 阶段一完成，等待反馈
    AnalystsReady {
        analysts: Vec<PersonaDraft>,
        status: SessionStatus,
    },
    /// 收到反馈，即将进入阶段二
    FeedbackReceived { feedback: String, message: String },
    /// 阶段二进行中（仅提示）
    InterviewProgress { message: String },
    /// 报告完成
    ReportReady { message: String, status: SessionStatus },
    /// 任务失败
    Error { message: String, status: SessionStatus },
    /// 传输层保活
    Ping { message: String },
}

impl ProgressEvent {
    /// 事件名（SSE 的 event 字段）
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Status { .. } => "status",
            ProgressEvent::AnalystsReady { .. } => "analysts_ready",
            ProgressEvent::FeedbackReceived { .. } => "feedback_received",
            ProgressEvent::InterviewProgress { .. } => "interview_progress",
            ProgressEvent::ReportReady { .. } => "report_ready",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Ping { .. } => "ping",
        }
    }

    /// 仅 payload 部分的 JSON
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut obj)) => {
                obj.remove("payload").unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        }
    }

    pub fn status(status: SessionStatus, message: impl Into<String>) -> Self {
        ProgressEvent::Status {
            status,
            message: message.into(),
        }
    }

    /// 流连接时的合成事件
    pub fn connected(status: SessionStatus) -> Self {
        Self::status(status, "Connected to session stream.")
    }

    pub fn ping() -> Self {
        ProgressEvent::Ping {
            message: "keepalive".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
            status: SessionStatus::Failed,
        }
    }

    pub fn is_ping(&self) -> bool {
        matches!(self, ProgressEvent::Ping { .. })
    }
}

//! 会话状态机：SessionStatus 及合法迁移
//!
//! pending → running → awaiting_feedback → running → completed；任意非终态都可 → failed。
//! 内部只用枚举，字符串形式仅在持久化与对外接口边界出现。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::SessionError;

/// 研究会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// 已创建，任务未启动
    Pending,
    /// 正在执行某一阶段
    Running,
    /// 阶段一完成，等待人工反馈
    AwaitingFeedback,
    /// 报告已生成
    Completed,
    /// 不可恢复的失败
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::AwaitingFeedback => "awaiting_feedback",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// 是否存在 self → next 这条边
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, AwaitingFeedback) => true,
            (AwaitingFeedback, Running) => true,
            (Running, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// 校验迁移，非法时返回 InvalidTransition
    pub fn transition(self, next: SessionStatus) -> Result<SessionStatus, SessionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SessionError::InvalidTransition { from: self, to: next })
        }
    }

    /// 是否接受反馈提交
    pub fn accepts_feedback(&self) -> bool {
        matches!(self, SessionStatus::AwaitingFeedback)
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "awaiting_feedback" => Ok(SessionStatus::AwaitingFeedback),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

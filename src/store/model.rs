//! 持久化记录：Session / Persona / Report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::SessionStatus;

/// 会话 ID（存储层自增主键）
pub type SessionId = i64;

/// 一次研究会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub topic: String,
    /// 阶段一生成分析师数量上限（1..=10）
    pub max_analysts: u8,
    pub status: SessionStatus,
    /// 人工反馈，提交前为 None
    #[serde(rename = "human_analyst_feedback")]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// 已提交且非空的反馈
    pub fn submitted_feedback(&self) -> Option<&str> {
        self.feedback.as_deref().filter(|f| !f.trim().is_empty())
    }
}

/// 阶段一产出的分析师画像（未入库）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaDraft {
    pub name: String,
    pub role: String,
    pub affiliation: String,
    pub description: String,
}

/// 已入库的分析师画像
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: i64,
    pub session_id: SessionId,
    pub name: String,
    pub role: String,
    pub affiliation: String,
    pub description: String,
}

impl Persona {
    pub fn to_draft(&self) -> PersonaDraft {
        PersonaDraft {
            name: self.name.clone(),
            role: self.role.clone(),
            affiliation: self.affiliation.clone(),
            description: self.description.clone(),
        }
    }
}

/// 阶段二产出的报告（未入库）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportDraft {
    pub introduction: Option<String>,
    pub content: Option<String>,
    pub conclusion: Option<String>,
    pub final_report: String,
}

/// 已入库的报告，每个会话至多一份
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub session_id: SessionId,
    pub introduction: Option<String>,
    pub content: Option<String>,
    pub conclusion: Option<String>,
    pub final_report: String,
    pub created_at: DateTime<Utc>,
}

//! 研究流水线：编排器调用的两阶段外部协作者
//!
//! - 阶段一：topic + 上限 → 分析师画像
//! - 阶段二：反馈（附带 topic 与已入库画像）→ 报告
//!
//! 两个调用都可能很慢、都可能失败；编排器把它们放到独立任务上执行。

mod llm;
mod prompts;
mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use llm::LlmPipeline;
pub use scripted::{PhaseBehavior, ScriptedPipeline};

use crate::config::AppConfig;
use crate::store::{PersonaDraft, ReportDraft, SessionId};

/// 阶段一输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaRequest {
    /// 线程键，同一会话的两次调用共享
    pub session_id: SessionId,
    pub topic: String,
    pub max_analysts: u8,
}

/// 阶段二输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub session_id: SessionId,
    pub topic: String,
    pub personas: Vec<PersonaDraft>,
    /// 人工反馈原文；"approve" 表示直接认可
    pub feedback: String,
}

impl ReportRequest {
    /// 非 "approve" 的反馈作为写作指导
    pub fn guidance(&self) -> Option<&str> {
        let text = self.feedback.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("approve") {
            None
        } else {
            Some(text)
        }
    }
}

/// 流水线错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("Unparseable model output: {0}")]
    Parse(String),

    #[error("Phase {phase} exceeded {secs}s")]
    Timeout { phase: &'static str, secs: u64 },

    #[error("Phase {phase} crashed: {reason}")]
    Crashed { phase: &'static str, reason: String },

    #[error("{0}")]
    Rejected(String),
}

/// 两阶段研究流水线
#[async_trait]
pub trait ResearchPipeline: Send + Sync {
    /// 阶段一：生成分析师画像
    async fn generate_personas(
        &self,
        request: PersonaRequest,
    ) -> Result<Vec<PersonaDraft>, PipelineError>;

    /// 阶段二：访谈并撰写报告
    async fn write_report(&self, request: ReportRequest) -> Result<ReportDraft, PipelineError>;
}

/// 根据配置创建流水线：有可用 LLM 后端时用 LlmPipeline，否则用离线 ScriptedPipeline
pub fn create_pipeline_from_config(cfg: &AppConfig) -> Arc<dyn ResearchPipeline> {
    match crate::llm::create_llm_from_config(&cfg.llm) {
        Some(llm) => Arc::new(LlmPipeline::new(llm, cfg.pipeline.max_concurrent_interviews)),
        None => {
            tracing::warn!("No LLM backend available, using offline scripted pipeline");
            Arc::new(ScriptedPipeline::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(feedback: &str) -> ReportRequest {
        ReportRequest {
            session_id: 1,
            topic: "t".into(),
            personas: vec![],
            feedback: feedback.into(),
        }
    }

    #[test]
    fn test_guidance_ignores_approval() {
        assert_eq!(request("approve").guidance(), None);
        assert_eq!(request("  Approve ").guidance(), None);
        assert_eq!(request("more detail").guidance(), Some("more detail"));
    }
}

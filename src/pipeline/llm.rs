//! 基于 LLM 的研究流水线
//!
//! 阶段一让模型输出 JSON 画像；阶段二对每位分析师并发访谈（Semaphore 限流），
//! 再并行撰写引言 / 正文 / 结论并拼接为最终报告。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::Deserialize;
use tokio::sync::Semaphore;

use super::prompts;
use super::{PersonaRequest, PipelineError, ReportRequest, ResearchPipeline};
use crate::llm::{LlmClient, Message};
use crate::store::{PersonaDraft, ReportDraft};

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// 模型输出的画像信封：允许 {"analysts": [...]} 或裸数组
#[derive(Deserialize)]
#[serde(untagged)]
enum PersonaEnvelope {
    Wrapped { analysts: Vec<PersonaDraft> },
    Bare(Vec<PersonaDraft>),
}

pub struct LlmPipeline {
    llm: Arc<dyn LlmClient>,
    interview_permits: Arc<Semaphore>,
}

impl LlmPipeline {
    pub fn new(llm: Arc<dyn LlmClient>, max_concurrent_interviews: usize) -> Self {
        Self {
            llm,
            interview_permits: Arc::new(Semaphore::new(max_concurrent_interviews.max(1))),
        }
    }

    async fn ask(&self, system: &str, user: String) -> Result<String, PipelineError> {
        let messages = [Message::system(system), Message::user(user)];
        self.llm
            .complete(&messages)
            .await
            .map_err(PipelineError::Llm)
    }

    async fn interview(
        &self,
        request: &ReportRequest,
        persona: &PersonaDraft,
    ) -> Result<String, PipelineError> {
        let _permit = self
            .interview_permits
            .acquire()
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;
        tracing::debug!(session_id = request.session_id, analyst = %persona.name, "interview started");
        self.ask(
            prompts::INTERVIEW_SYSTEM,
            prompts::interview_prompt(&request.topic, persona, request.guidance()),
        )
        .await
    }

    async fn section(
        &self,
        name: &str,
        request: &ReportRequest,
        memos: &[String],
    ) -> Result<String, PipelineError> {
        self.ask(
            prompts::SECTION_SYSTEM,
            prompts::section_prompt(name, &request.topic, memos, request.guidance()),
        )
        .await
    }
}

/// 去掉 ```json ... ``` 围栏
fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().trim_end_matches("```").trim()
}

/// 解析阶段一输出，截断到 max，空列表视为失败
pub(crate) fn parse_personas(raw: &str, max: u8) -> Result<Vec<PersonaDraft>, PipelineError> {
    let body = strip_code_fence(raw);
    let envelope: PersonaEnvelope =
        serde_json::from_str(body).map_err(|e| PipelineError::Parse(e.to_string()))?;
    let mut personas = match envelope {
        PersonaEnvelope::Wrapped { analysts } => analysts,
        PersonaEnvelope::Bare(list) => list,
    };
    personas.truncate(max as usize);
    if personas.is_empty() {
        return Err(PipelineError::Parse("model returned no analysts".to_string()));
    }
    Ok(personas)
}

#[async_trait]
impl ResearchPipeline for LlmPipeline {
    async fn generate_personas(
        &self,
        request: PersonaRequest,
    ) -> Result<Vec<PersonaDraft>, PipelineError> {
        let raw = self
            .ask(
                prompts::PERSONA_SYSTEM,
                prompts::persona_prompt(&request.topic, request.max_analysts),
            )
            .await?;
        parse_personas(&raw, request.max_analysts)
    }

    async fn write_report(&self, request: ReportRequest) -> Result<ReportDraft, PipelineError> {
        if request.personas.is_empty() {
            return Err(PipelineError::Rejected("no analysts to interview".to_string()));
        }

        let memos = try_join_all(
            request
                .personas
                .iter()
                .map(|persona| self.interview(&request, persona)),
        )
        .await?;

        let (introduction, content, conclusion) = tokio::try_join!(
            self.section("introduction", &request, &memos),
            self.section("main body", &request, &memos),
            self.section("conclusion", &request, &memos),
        )?;

        let final_report = [introduction.as_str(), content.as_str(), conclusion.as_str()]
            .join(SECTION_SEPARATOR);

        Ok(ReportDraft {
            introduction: Some(introduction),
            content: Some(content),
            conclusion: Some(conclusion),
            final_report,
        })
    }
}

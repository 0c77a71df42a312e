//! 离线脚本化流水线
//!
//! 无 LLM 后端时的默认实现，也是编排测试的替身：每个阶段可配置为成功 / 失败 / panic，
//! 并可附加延迟；记录调用次数和收到的阶段二请求。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{PersonaRequest, PipelineError, ReportRequest, ResearchPipeline};
use crate::store::{PersonaDraft, ReportDraft};

const LENSES: [(&str, &str, &str); 5] = [
    ("Technical Analyst", "Research Institute", "underlying mechanisms and state of the art"),
    ("Market Analyst", "Industry Watch", "adoption, competition and economics"),
    ("Policy Analyst", "Public Policy Center", "regulation, standards and governance"),
    ("Ethics Researcher", "University Ethics Lab", "societal risks and ethical trade-offs"),
    ("Futurist", "Foresight Group", "long-term scenarios and open problems"),
];

/// 单个阶段的脚本行为
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PhaseBehavior {
    #[default]
    Succeed,
    Fail(String),
    Panic,
}

#[derive(Default)]
pub struct ScriptedPipeline {
    personas: PhaseBehavior,
    report: PhaseBehavior,
    delay: Duration,
    persona_calls: AtomicUsize,
    report_calls: AtomicUsize,
    report_requests: Mutex<Vec<ReportRequest>>,
}

impl ScriptedPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_personas(mut self, behavior: PhaseBehavior) -> Self {
        self.personas = behavior;
        self
    }

    pub fn with_report(mut self, behavior: PhaseBehavior) -> Self {
        self.report = behavior;
        self
    }

    /// 每次阶段调用前的等待
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn persona_calls(&self) -> usize {
        self.persona_calls.load(Ordering::SeqCst)
    }

    pub fn report_calls(&self) -> usize {
        self.report_calls.load(Ordering::SeqCst)
    }

    /// 收到的阶段二请求（按调用顺序）
    pub fn report_requests(&self) -> Vec<ReportRequest> {
        match self.report_requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 按 topic 生成 count 位分析师，每位一个视角
    pub fn default_personas(topic: &str, count: u8) -> Vec<PersonaDraft> {
        (0..count as usize)
            .map(|i| {
                let (role, affiliation, focus) = LENSES[i % LENSES.len()];
                PersonaDraft {
                    name: format!("Analyst {}", i + 1),
                    role: role.to_string(),
                    affiliation: affiliation.to_string(),
                    description: format!("Examines {} through the lens of {}.", topic, focus),
                }
            })
            .collect()
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn apply(phase: &'static str, behavior: &PhaseBehavior) -> Result<(), PipelineError> {
    match behavior {
        PhaseBehavior::Succeed => Ok(()),
        PhaseBehavior::Fail(reason) => Err(PipelineError::Rejected(reason.clone())),
        PhaseBehavior::Panic => panic!("scripted {} phase panicked", phase),
    }
}

#[async_trait]
impl ResearchPipeline for ScriptedPipeline {
    async fn generate_personas(
        &self,
        request: PersonaRequest,
    ) -> Result<Vec<PersonaDraft>, PipelineError> {
        self.persona_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        apply("persona", &self.personas)?;
        Ok(Self::default_personas(&request.topic, request.max_analysts))
    }

    async fn write_report(&self, request: ReportRequest) -> Result<ReportDraft, PipelineError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        match self.report_requests.lock() {
            Ok(mut guard) => guard.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }
        self.pause().await;
        apply("report", &self.report)?;

        let introduction = format!("# {}\n\n## Introduction\n\nThis report surveys {}.", request.topic, request.topic);
        let mut content = String::from("## Insights\n");
        for persona in &request.personas {
            content.push_str(&format!("\n### {} ({})\n\n{}\n", persona.name, persona.role, persona.description));
        }
        if let Some(guidance) = request.guidance() {
            content.push_str(&format!("\n> Reviewer guidance: {}\n", guidance));
        }
        let conclusion = format!("## Conclusion\n\n{} analysts contributed to this report.", request.personas.len());
        let final_report = format!("{}\n\n---\n\n{}\n\n---\n\n{}", introduction, content, conclusion);

        Ok(ReportDraft {
            introduction: Some(introduction),
            content: Some(content),
            conclusion: Some(conclusion),
            final_report,
        })
    }
}

//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按「消息包含某段文本 → 固定回复」的规则应答；无规则命中时回显最后一条 User 消息。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::traits::{LlmClient, Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    rules: Vec<(String, String)>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 任一消息包含 needle 时回复 reply（按注册顺序匹配）
    pub fn with_rule(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        for (needle, reply) in &self.rules {
            if messages.iter().any(|m| m.content.contains(needle.as_str())) {
                return Ok(reply.clone());
            }
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

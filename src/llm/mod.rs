//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, Message, Role};

use crate::config::LlmSection;

/// 根据 [llm] 配置创建真实后端客户端；provider 为 mock、未知或缺少 API Key 时返回 None
pub fn create_llm_from_config(cfg: &LlmSection) -> Option<Arc<dyn LlmClient>> {
    let provider = cfg.provider.to_lowercase();
    let has_key = cfg.api_key.is_some()
        || std::env::var("OPENAI_API_KEY").is_ok()
        || std::env::var("DEEPSEEK_API_KEY").is_ok();

    match provider.as_str() {
        "deepseek" if has_key => {
            let client = create_deepseek_client(cfg.model.as_deref(), cfg.api_key.as_deref());
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            let client: Arc<dyn LlmClient> = Arc::new(client);
            Some(client)
        }
        "openai" if has_key => {
            let model = cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI LLM ({})", model);
            let client: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &model,
                cfg.api_key.as_deref(),
            ));
            Some(client)
        }
        "mock" => None,
        _ => {
            tracing::warn!("No API key set or provider unknown ({})", provider);
            None
        }
    }
}

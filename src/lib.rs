//! Sage - Rust 研究会话编排服务
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态机、错误类型、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **pipeline**: 两阶段研究流水线（LLM 实现 / 离线脚本实现）
//! - **session**: 事件总线、反馈等待、注册表、编排器与对外服务
//! - **store**: Session / Persona / Report 持久化（内存 / SQLite）
//! - **server**: axum HTTP + SSE 接口

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pipeline;
#[cfg(feature = "web")]
pub mod server;
pub mod session;
pub mod store;

pub use crate::core::{SessionError, SessionStatus};
pub use crate::session::{ProgressEvent, ResearchService};

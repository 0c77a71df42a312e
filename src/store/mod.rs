//! 记录存储抽象层
//!
//! 定义 Session / Persona / Report 的统一持久化接口，支持内存和 SQLite 两种实现。
//! 分析师与报告都是「整体替换」语义：重跑同一会话得到干净覆盖，而不是重复行。

mod memory;
mod model;
#[cfg(feature = "async-sqlite")]
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::SessionStatus;

pub use memory::MemoryRecordStore;
pub use model::{Persona, PersonaDraft, Report, ReportDraft, Session, SessionId};
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteRecordStore;

/// 列表默认条数上限
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// 写入时会话已不存在（例如任务运行中被删除）
    #[error("session {0} does not exist")]
    MissingSession(SessionId),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[cfg(feature = "async-sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 记录存储接口
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 以 pending 状态创建会话
    async fn create_session(&self, topic: &str, max_analysts: u8) -> StoreResult<Session>;

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;

    /// 按创建时间倒序
    async fn list_sessions(&self, limit: usize) -> StoreResult<Vec<Session>>;

    /// 写入状态；不做合法性校验，由编排器负责
    async fn update_status(&self, id: SessionId, status: SessionStatus) -> StoreResult<Session>;

    /// 写入（或清空）人工反馈
    async fn set_feedback(&self, id: SessionId, feedback: Option<&str>) -> StoreResult<Session>;

    /// 人工重置：状态回到 pending 并清空反馈，便于重跑
    async fn reset_session(&self, id: SessionId) -> StoreResult<Session>;

    /// 删除会话及其分析师、报告；不存在时返回 false
    async fn delete_session(&self, id: SessionId) -> StoreResult<bool>;

    /// 用新集合整体替换会话的分析师
    async fn replace_personas(
        &self,
        id: SessionId,
        personas: &[PersonaDraft],
    ) -> StoreResult<Vec<Persona>>;

    async fn list_personas(&self, id: SessionId) -> StoreResult<Vec<Persona>>;

    /// 写入报告，已有报告则替换
    async fn replace_report(&self, id: SessionId, report: &ReportDraft) -> StoreResult<Report>;

    async fn get_report(&self, id: SessionId) -> StoreResult<Option<Report>>;
}

/// 创建记录存储
///
/// 如果提供了 db_path 且启用了 async-sqlite feature，则使用 SQLite；否则使用内存存储
pub async fn create_record_store(
    db_path: Option<&std::path::Path>,
    max_connections: u32,
) -> Arc<dyn RecordStore> {
    #[cfg(feature = "async-sqlite")]
    if let Some(path) = db_path {
        match SqliteRecordStore::open(path, max_connections).await {
            Ok(store) => {
                tracing::info!("Using SQLite record store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite store, falling back to memory: {}", e);
            }
        }
    }

    #[cfg(not(feature = "async-sqlite"))]
    if db_path.is_some() {
        let _ = max_connections;
        tracing::warn!("SQLite store requested but async-sqlite feature not enabled, using memory store");
    }

    tracing::info!("Using in-memory record store");
    Arc::new(MemoryRecordStore::new())
}

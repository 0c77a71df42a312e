//! 核心层：会话状态机、错误类型与优雅关闭

pub mod error;
pub mod shutdown;
pub mod state;

pub use error::SessionError;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::SessionStatus;

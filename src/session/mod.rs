//! 会话编排引擎：事件总线、反馈等待、注册表、编排器与对外服务

pub mod event;
pub mod event_bus;
pub mod feedback;
pub mod orchestrator;
pub mod registry;
pub mod service;

pub use event::ProgressEvent;
pub use event_bus::{Delivery, EventBus, Subscription};
pub use feedback::FeedbackWatch;
pub use orchestrator::Orchestrator;
pub use registry::{JobId, JobTicket, SessionRegistry};
pub use service::{ProgressStream, ResearchService, SessionDetail, MAX_ANALYSTS, MIN_ANALYSTS};

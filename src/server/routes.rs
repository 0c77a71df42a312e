//! 路由处理函数与错误映射

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use super::SERVICE_NAME;
use crate::core::SessionError;
use crate::session::{ResearchService, SessionDetail};
use crate::store::{Report, Session, SessionId};

type AppState = State<Arc<ResearchService>>;

/// 同步错误 → `{"detail": message}` + 状态码
#[derive(Debug)]
pub struct ApiError(pub SessionError);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub topic: String,
    #[serde(default = "default_max_analysts")]
    pub max_analysts: i64,
}

fn default_max_analysts() -> i64 {
    3
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// POST /sessions
pub async fn create_session(
    State(service): AppState,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = service.create_session(&body.topic, body.max_analysts).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /sessions：最新的在前
pub async fn list_sessions(
    State(service): AppState,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(service.list_sessions(query.limit).await?))
}

/// GET /sessions/:id（含分析师）
pub async fn get_session(
    State(service): AppState,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionDetail>, ApiError> {
    Ok(Json(service.get_session(id).await?))
}

/// GET /sessions/:id/report
pub async fn get_report(
    State(service): AppState,
    Path(id): Path<SessionId>,
) -> Result<Json<Report>, ApiError> {
    Ok(Json(service.get_report(id).await?))
}

/// POST /sessions/:id/feedback：用 "approve" 认可分析师，或提交任意修改意见
pub async fn submit_feedback(
    State(service): AppState,
    Path(id): Path<SessionId>,
    Json(body): Json<FeedbackBody>,
) -> Result<Json<Value>, ApiError> {
    let session = service.submit_feedback(id, &body.feedback).await?;
    Ok(Json(json!({
        "message": "Feedback submitted.",
        "feedback": session.feedback,
    })))
}

/// GET /sessions/:id/stream：SSE，event 为事件类型，data 为 payload JSON
pub async fn stream_session(
    State(service): AppState,
    Path(id): Path<SessionId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let progress = service.stream_progress(id).await?;
    let events = progress.into_stream().map(|event| {
        Ok(Event::default()
            .event(event.kind())
            .data(event.payload().to_string()))
    });
    Ok(Sse::new(events))
}

/// DELETE /sessions/:id
pub async fn delete_session(
    State(service): AppState,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    service.delete_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /sessions/:id/rerun：重置并重新运行已结束的会话
pub async fn rerun_session(
    State(service): AppState,
    Path(id): Path<SessionId>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = service.rerun_session(id).await?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

//! HTTP 接口：axum 路由、CORS 与优雅关闭
//!
//! 只在 `web` feature 下编译；处理函数见 routes.rs。

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

pub use routes::ApiError;

use crate::config::ServerSection;
use crate::session::ResearchService;

/// 服务名（/health 返回）
pub const SERVICE_NAME: &str = "Research Session Orchestrator";

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers([CONTENT_TYPE, ACCEPT]);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(allowed)
    }
}

/// 构建完整路由
pub fn router(service: Arc<ResearchService>, cors_origins: &[String]) -> Router {
    Router::new()
        .route(
            "/sessions",
            post(routes::create_session).get(routes::list_sessions),
        )
        .route(
            "/sessions/:id",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/sessions/:id/report", get(routes::get_report))
        .route("/sessions/:id/feedback", post(routes::submit_feedback))
        .route("/sessions/:id/stream", get(routes::stream_session))
        .route("/sessions/:id/rerun", post(routes::rerun_session))
        .route("/health", get(routes::health))
        .layer(ServiceBuilder::new().layer(cors_layer(cors_origins)))
        .with_state(service)
}

/// 监听并服务，直到 shutdown 被取消
pub async fn serve(
    cfg: &ServerSection,
    port: u16,
    service: Arc<ResearchService>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.host, port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, port))?;
    let app = router(service, &cfg.cors_origins);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")?;
    Ok(())
}

//! Sage - 研究会话编排服务
//!
//! 入口：加载配置、初始化日志与存储、恢复上次遗留的会话，然后启动 HTTP 服务直到收到关闭信号。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sage::config::load_config;
use sage::core::shutdown::{abort_active_jobs, ShutdownManager};
use sage::pipeline::create_pipeline_from_config;
use sage::session::ResearchService;
use sage::store::create_record_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sage::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let store = create_record_store(
        cfg.storage.database_path.as_deref(),
        cfg.storage.max_connections,
    )
    .await;
    let pipeline = create_pipeline_from_config(&cfg);
    let service = Arc::new(ResearchService::from_config(&cfg, store, pipeline));

    let recovered = service
        .recover_orphaned_sessions()
        .await
        .context("Failed to recover sessions from previous run")?;
    if recovered > 0 {
        tracing::info!(recovered, "Recovered sessions from previous run");
    }

    let port = std::env::var("SAGE_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.server.port);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    sage::server::serve(&cfg.server, port, Arc::clone(&service), shutdown.token())
        .await
        .context("Server run failed")?;

    abort_active_jobs(service.registry(), Duration::from_millis(200)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

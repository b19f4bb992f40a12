use dpo_return_flow::api::{router, AppState};
use dpo_return_flow::config::AppConfig;
use dpo_return_flow::gateway::HttpTransport;
use dpo_return_flow::logging::init_tracing;
use dpo_return_flow::services::ReturnFlowService;
use dpo_return_flow::storage::{InMemoryFeedRepository, InMemoryOrderStore, SeedData};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting DPO return flow service");

    let cfg = AppConfig::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let orders = Arc::new(InMemoryOrderStore::new());
    let feeds = Arc::new(InMemoryFeedRepository::new());
    if let Some(path) = cfg.server.seed_file.as_deref() {
        let seed = SeedData::from_file(path).await.map_err(|e| {
            error!("Failed to load seed data: {}", e);
            e
        })?;
        seed.apply(&orders, &feeds).await;
    }

    let transport = Arc::new(HttpTransport::new(cfg.gateway.request_timeout())?);
    let service = ReturnFlowService::from_config(&cfg, transport, orders, feeds)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        service: Arc::new(service),
        return_base: cfg.return_base_url(),
        shutdown: shutdown_rx,
    };
    let app = router(state, &cfg.callback.return_path);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, return_url = %cfg.return_base_url(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received, cancelling in-flight verifications");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("DPO return flow service stopped");
    Ok(())
}

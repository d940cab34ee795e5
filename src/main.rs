use anyhow::{Context, Result};
use codeswitch::config::Config;
use codeswitch::gateway::{router, AppState};
use codeswitch::metrics::PipelineMetrics;
use codeswitch::queue::PARAGRAPHS_QUEUE;
use codeswitch::startup::{self, Backends};
use codeswitch::worker::WorkerPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    startup::init_tracing()?;

    info!("Starting code-switch gateway");

    let config = Config::from_env()?;
    let backends = Backends::from_config(&config).await?;
    let metrics = Arc::new(PipelineMetrics::new());

    if config.redis_url.is_none() && (config.embedded_workers == 0 || !config.embedded_collector) {
        warn!("In-process broker without embedded workers and collector: requests will time out");
    }

    // Embedded pipeline stages
    let pool = if config.embedded_workers > 0 {
        backends.recover(PARAGRAPHS_QUEUE).await?;
        let worker = startup::worker(&config, &backends, Arc::clone(&metrics))?;
        Some(WorkerPool::start(
            Arc::new(worker),
            backends.tasks(),
            config.embedded_workers,
        ))
    } else {
        None
    };

    let collector = Arc::new(startup::collector(&config, Arc::clone(&backends.store)));
    let collector_cancel = CancellationToken::new();
    let collector_handle = if config.embedded_collector {
        Some(Arc::clone(&collector).start(backends.results(), collector_cancel.clone()))
    } else {
        None
    };

    let gateway = startup::gateway(&config, &backends, collector, Arc::clone(&metrics))?;
    let state = Arc::new(AppState {
        gateway: Arc::new(gateway),
        api_key: config.api_key.clone(),
    });
    if state.api_key.is_none() {
        warn!("GATEWAY_API_KEY not set, API routes are unauthenticated");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Gateway listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(startup::shutdown_signal())
        .await
        .context("Server error")?;

    // Drain the embedded pipeline
    if let Some(pool) = pool {
        pool.stop().await;
    }
    collector_cancel.cancel();
    if let Some(handle) = collector_handle {
        let _ = handle.await;
    }

    info!("Gateway stopped");
    Ok(())
}

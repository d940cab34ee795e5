//! Standalone result collector: records finished tasks in the cache store.

use anyhow::Result;
use codeswitch::config::Config;
use codeswitch::queue::RESULTS_QUEUE;
use codeswitch::startup::{self, Backends};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    startup::init_tracing()?;

    let config = Config::from_env()?;
    let url = config.require_redis_url()?;

    info!("Starting result collector {}", config.consumer_id);
    let backends = Backends::connect_redis(url, &config.consumer_id).await?;
    backends.recover(RESULTS_QUEUE).await?;

    let collector = Arc::new(startup::collector(&config, Arc::clone(&backends.store)));
    let cancel = CancellationToken::new();
    let handle = collector.start(backends.results(), cancel.clone());

    startup::shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = handle.await {
        error!("Collector task failed: {}", e);
    }

    info!("Result collector stopped");
    Ok(())
}

//! Standalone worker process: consumes paragraph tasks from the shared
//! broker and publishes their results.

use anyhow::Result;
use codeswitch::config::Config;
use codeswitch::metrics::PipelineMetrics;
use codeswitch::queue::PARAGRAPHS_QUEUE;
use codeswitch::startup::{self, Backends};
use codeswitch::worker::WorkerPool;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    startup::init_tracing()?;

    let config = Config::from_env()?;
    let url = config.require_redis_url()?;
    config.require_anthropic_api_key()?;

    info!("Starting code-switch worker {}", config.consumer_id);
    let backends = Backends::connect_redis(url, &config.consumer_id).await?;
    backends.recover(PARAGRAPHS_QUEUE).await?;

    let metrics = Arc::new(PipelineMetrics::new());
    let worker = startup::worker(&config, &backends, Arc::clone(&metrics))?;
    // Every consumer shares the worker's rate limiter.
    let pool = WorkerPool::start(Arc::new(worker), backends.tasks(), config.worker_consumers);

    startup::shutdown_signal().await;
    pool.stop().await;

    let report = metrics.report();
    info!(
        "Worker stopped after {} completion call(s), {} failed",
        report.completion_calls, report.completion_failures
    );
    Ok(())
}

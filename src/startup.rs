//! Process wiring shared by the gateway, worker and collector binaries.

use crate::cache::ContentCache;
use crate::collector::ResultCollector;
use crate::completion::AnthropicClient;
use crate::config::Config;
use crate::frequency::{
    FileFrequencyProvider, FrequencyProvider, FrequencyTables, HttpFrequencyProvider,
};
use crate::gateway::Gateway;
use crate::metrics::PipelineMetrics;
use crate::queue::{Broker, MemoryBroker, RedisBroker, TaskQueue, PARAGRAPHS_QUEUE, RESULTS_QUEUE};
use crate::ratelimit::RateLimiter;
use crate::retry::RetryConfig;
use crate::store::{KvStore, MemoryStore, RedisStore};
use crate::wikipedia::WikipediaClient;
use crate::worker::Worker;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Initialize logging; `RUST_LOG` overrides the default `codeswitch=info`.
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codeswitch=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();
    Ok(())
}

pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// The cache store and message broker every process talks to.
pub struct Backends {
    pub store: Arc<dyn KvStore>,
    pub broker: Arc<dyn Broker>,
    /// Set when the broker is Redis, for startup recovery.
    pub redis_broker: Option<RedisBroker>,
}

impl Backends {
    /// Both backends in process memory. Only usable when every pipeline
    /// stage runs in this process.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            broker: Arc::new(MemoryBroker::new()),
            redis_broker: None,
        }
    }

    /// Connect to Redis and make sure it answers. Failure here must stop
    /// the process before it serves anything.
    pub async fn connect_redis(url: &str, consumer_id: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid REDIS_URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;

        let store = RedisStore::from_connection(conn.clone());
        let broker = RedisBroker::from_connection(conn, consumer_id);
        store.ping().await.context("Cache store did not answer PING")?;
        broker.ping().await.context("Broker did not answer PING")?;
        info!("Connected to Redis (consumer {})", consumer_id);

        Ok(Self {
            store: Arc::new(store),
            broker: Arc::new(broker.clone()),
            redis_broker: Some(broker),
        })
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        match &config.redis_url {
            Some(url) => Self::connect_redis(url, &config.consumer_id).await,
            None => {
                warn!("REDIS_URL not set, using in-process store and broker");
                Ok(Self::in_memory())
            }
        }
    }

    /// Return deliveries a previous run of this consumer left unacknowledged.
    pub async fn recover(&self, queue: &str) -> Result<()> {
        if let Some(broker) = &self.redis_broker {
            broker
                .recover(queue)
                .await
                .with_context(|| format!("Failed to recover queue '{}'", queue))?;
        }
        Ok(())
    }

    pub fn tasks(&self) -> TaskQueue<crate::queue::ParagraphTask> {
        TaskQueue::new(Arc::clone(&self.broker), PARAGRAPHS_QUEUE)
    }

    pub fn results(&self) -> TaskQueue<crate::queue::TranslationResult> {
        TaskQueue::new(Arc::clone(&self.broker), RESULTS_QUEUE)
    }
}

pub fn frequency_tables(config: &Config, store: Arc<dyn KvStore>) -> Result<FrequencyTables> {
    let provider: Arc<dyn FrequencyProvider> = match &config.frequency_dir {
        Some(dir) => {
            info!("Loading frequency tables from {}", dir);
            Arc::new(FileFrequencyProvider::new(dir))
        }
        None => Arc::new(HttpFrequencyProvider::new(
            http_client(config.fetch_timeout)?,
            config.frequency_url_template.clone(),
        )),
    };
    Ok(FrequencyTables::new(provider).with_store(store, config.cache_ttl))
}

pub fn collector(config: &Config, store: Arc<dyn KvStore>) -> ResultCollector {
    ResultCollector::new(store, config.cache_ttl).with_poll_interval(config.result_poll_interval)
}

pub fn worker(
    config: &Config,
    backends: &Backends,
    metrics: Arc<PipelineMetrics>,
) -> Result<Worker> {
    let completion = AnthropicClient::new(
        http_client(config.completion_timeout)?,
        config.require_anthropic_api_key()?,
    )
    .with_api_url(config.anthropic_api_url.clone())
    .with_model(config.anthropic_model.clone())
    .with_api_version(config.anthropic_version.clone())
    .with_max_tokens(config.completion_max_tokens)
    .with_timeout(config.completion_timeout);

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_per_second,
        config.rate_limit_burst,
    ));

    Ok(Worker::new(Arc::new(completion), limiter, backends.results())
        .with_retry(RetryConfig::completion(config.completion_max_attempts))
        .with_rate_limit_wait(config.rate_limit_wait)
        .with_metrics(metrics))
}

pub fn gateway(
    config: &Config,
    backends: &Backends,
    collector: Arc<ResultCollector>,
    metrics: Arc<PipelineMetrics>,
) -> Result<Gateway> {
    let source = WikipediaClient::new(
        http_client(config.fetch_timeout)?,
        config.wikipedia_api_url.clone(),
    );
    let cache = ContentCache::new(Arc::clone(&backends.store), config.cache_ttl);
    let tables = frequency_tables(config, Arc::clone(&backends.store))?;

    let gateway = Gateway::new(
        Arc::new(cache),
        Arc::new(source),
        Arc::new(tables),
        backends.tasks(),
        collector,
    )
    .with_supported_languages(&config.supported_languages)?
    .with_min_paragraph_chars(config.min_paragraph_chars)
    .with_result_timeout(config.result_timeout)
    .with_metrics(metrics);

    Ok(gateway)
}

/// Resolves on Ctrl-C (or SIGTERM on Unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

//! Result Collector: durable record of finished paragraph tasks.

use crate::error::{CodeSwitchError, Result};
use crate::queue::{Consumer, TaskQueue, TranslationResult};
use crate::store::{keys, KvStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ResultCollector {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    poll_interval: Duration,
}

impl ResultCollector {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Store a result under its task id. A repeated task id overwrites the
    /// earlier record.
    pub async fn record(&self, result: &TranslationResult) -> Result<()> {
        let value = serde_json::to_string(result)
            .map_err(|e| CodeSwitchError::Cache(format!("failed to encode result: {}", e)))?;
        self.store
            .set(&keys::result(&result.task_id), &value, self.ttl)
            .await?;
        debug!("Recorded result for task {}", result.task_id);
        Ok(())
    }

    pub async fn lookup(&self, task_id: &str) -> Result<Option<TranslationResult>> {
        let Some(raw) = self.store.get(&keys::result(task_id)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| {
                CodeSwitchError::Cache(format!("corrupt result for task {}: {}", task_id, e))
            })
    }

    /// Poll until every id has a result or `timeout` passes. Returns the
    /// results that are available at that point.
    pub async fn await_results(
        &self,
        task_ids: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, TranslationResult>> {
        let deadline = Instant::now() + timeout;
        let mut found = HashMap::with_capacity(task_ids.len());

        loop {
            for id in task_ids {
                if found.contains_key(id) {
                    continue;
                }
                if let Some(result) = self.lookup(id).await? {
                    found.insert(id.clone(), result);
                }
            }

            if found.len() == task_ids.len() {
                return Ok(found);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Timed out waiting for results: {}/{} arrived",
                    found.len(),
                    task_ids.len()
                );
                return Ok(found);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Consume `results` in the background, recording each result before
    /// acknowledging it.
    pub fn start(
        self: Arc<Self>,
        results: TaskQueue<TranslationResult>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let consumer = results.consume(cancel.clone());
        tokio::spawn(async move {
            info!("Result collector running");
            self.run(consumer, cancel).await;
            info!("Result collector stopped");
        })
    }

    async fn run(&self, mut consumer: Consumer<TranslationResult>, cancel: CancellationToken) {
        while let Some(next) = consumer.next().await {
            let received = match next {
                Ok(received) => received,
                Err(e) => {
                    error!("Failed to receive result: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            // Unrecorded results stay unacknowledged and come back.
            if let Err(e) = self.record(&received.message).await {
                error!("Failed to record result for task {}: {}", received.message.task_id, e);
                drop(received);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                }
            }
            if let Err(e) = received.ack().await {
                error!("Failed to acknowledge result: {}", e);
            }
        }
    }
}

//! Rate-Limited Worker: turns paragraph tasks into switched paragraphs.
//!
//! Each task moves `Received -> RateLimited -> Calling -> Succeeded|Failed`.
//! Every outcome, including failure, is published as a [`TranslationResult`];
//! the task is acknowledged only after that publish succeeds.

use crate::completion::CompletionClient;
use crate::error::{CodeSwitchError, Result};
use crate::language::Language;
use crate::metrics::PipelineMetrics;
use crate::queue::{ParagraphTask, Received, TaskQueue, TranslationResult};
use crate::ratelimit::RateLimiter;
use crate::retry::{with_retry_if, RetryConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Received,
    RateLimited,
    Calling,
    Succeeded,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Received => "received",
            TaskState::RateLimited => "rate_limited",
            TaskState::Calling => "calling",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(task_id: &str, state: TaskState) {
    debug!(task_id, state = %state, "Task state");
}

fn language_name(code: &str) -> &str {
    Language::from_code(code).map(|l| l.name()).unwrap_or(code)
}

/// Instructions for rewriting only `task.words` into the target language.
pub fn build_prompt(task: &ParagraphTask) -> String {
    format!(
        "Given this paragraph in {source}:\n\n\
         {text}\n\n\
         Please translate ONLY these specific words to {target}, \
         keeping their exact position and context in the sentence.\n\
         Words to translate: {words}\n\n\
         Keep all other words unchanged. Maintain the original format, spacing, and punctuation. \
         Reply with only the rewritten paragraph.",
        source = language_name(&task.source_lang),
        text = task.text,
        target = language_name(&task.target_lang),
        words = task.words.join(", "),
    )
}

pub struct Worker {
    completion: Arc<dyn CompletionClient>,
    limiter: Arc<RateLimiter>,
    results: TaskQueue<TranslationResult>,
    retry: RetryConfig,
    rate_limit_wait: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl Worker {
    /// `limiter` should be the one instance shared by every consumer in
    /// the process.
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        limiter: Arc<RateLimiter>,
        results: TaskQueue<TranslationResult>,
    ) -> Self {
        Self {
            completion,
            limiter,
            results,
            retry: RetryConfig::default(),
            rate_limit_wait: Duration::from_secs(60),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Longest a task will wait for a rate-limit token before failing.
    pub fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait = wait;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    async fn call_completion(&self, task_id: &str, prompt: &str) -> Result<String> {
        transition(task_id, TaskState::RateLimited);
        self.limiter.acquire_within(self.rate_limit_wait).await?;

        transition(task_id, TaskState::Calling);
        self.metrics.record_completion_call();
        let reply = self.completion.complete(prompt).await;
        if reply.is_err() {
            self.metrics.record_completion_failure();
        }
        reply
    }

    /// Run one task to a terminal state. Never fails: errors become a
    /// failed result carrying the reason.
    pub async fn process(&self, task: &ParagraphTask) -> TranslationResult {
        transition(&task.id, TaskState::Received);
        let prompt = build_prompt(task);

        let reply = with_retry_if(
            &self.retry,
            "completion",
            || self.call_completion(&task.id, &prompt),
            CodeSwitchError::is_retryable,
        )
        .await;

        match reply {
            Ok(text) => {
                transition(&task.id, TaskState::Succeeded);
                TranslationResult::switched(&task.id, text.trim())
            }
            Err(e) => {
                transition(&task.id, TaskState::Failed);
                warn!("Task {} failed: {}", task.id, e);
                TranslationResult::failed(&task.id, e.to_string())
            }
        }
    }

    /// Process a received task, publish its result, then acknowledge it.
    /// If publishing fails the task is left unacknowledged so it is
    /// delivered again.
    pub async fn handle(&self, received: Received<ParagraphTask>) -> Result<()> {
        let result = self.process(&received.message).await;
        self.results.publish(&result).await?;
        received.ack().await
    }
}

/// A set of queue consumers sharing one [`Worker`].
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(worker: Arc<Worker>, tasks: TaskQueue<ParagraphTask>, consumers: usize) -> Self {
        let cancel = CancellationToken::new();
        let handles = (0..consumers.max(1))
            .map(|n| {
                let worker = Arc::clone(&worker);
                let consumer = tasks.consume(cancel.clone());
                let cancel = cancel.clone();
                tokio::spawn(run_consumer(n, worker, consumer, cancel))
            })
            .collect();

        info!("Started {} worker consumer(s)", consumers.max(1));
        Self { cancel, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop pulling new tasks and wait for in-flight ones to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker consumer panicked: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

async fn run_consumer(
    n: usize,
    worker: Arc<Worker>,
    mut consumer: crate::queue::Consumer<ParagraphTask>,
    cancel: CancellationToken,
) {
    debug!("Worker consumer {} running", n);
    while let Some(next) = consumer.next().await {
        match next {
            Ok(received) => {
                let task_id = received.message.id.clone();
                if let Err(e) = worker.handle(received).await {
                    error!("Failed to complete task {}: {}", task_id, e);
                }
            }
            Err(e) => {
                error!("Failed to receive task: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                }
            }
        }
    }
    debug!("Worker consumer {} stopped", n);
}

//! Task Queue: durable at-least-once delivery of JSON messages.
//!
//! A received message stays owned by its consumer until it is acknowledged.
//! Dropping an unacknowledged delivery (or a consumer process dying with one)
//! makes the message deliverable again.

use crate::error::{CodeSwitchError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PARAGRAPHS_QUEUE: &str = "paragraphs";
pub const RESULTS_QUEUE: &str = "results";

/// How long one receive call waits before re-checking for cancellation.
const RECEIVE_WAIT: Duration = Duration::from_millis(500);

/// One paragraph's worth of switching work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphTask {
    /// Assigned before publishing; stable across redeliveries.
    pub id: String,
    pub text: String,
    pub words: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskOutcome {
    Switched { text: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub task_id: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

impl TranslationResult {
    pub fn switched(task_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: TaskOutcome::Switched { text: text.into() },
        }
    }

    pub fn failed(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outcome: TaskOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Switched text, if the task succeeded.
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            TaskOutcome::Switched { text } => Some(text),
            TaskOutcome::Failed { .. } => None,
        }
    }
}

/// Settles a delivery with the broker it came from.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&mut self) -> Result<()>;
}

/// A raw message owned by one consumer until acknowledged.
pub struct Delivery {
    payload: String,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(payload: String, acker: Box<dyn Acknowledge>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub async fn ack(mut self) -> Result<()> {
        self.acker.ack().await
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, queue: &str, payload: String) -> Result<()>;

    /// Wait up to `wait` for the next message on `queue`.
    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>>;

    async fn ping(&self) -> Result<()>;
}

// ==================== In-process broker ====================

#[derive(Default)]
struct MemoryQueues {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
    in_flight: AtomicUsize,
}

impl MemoryQueues {
    fn push_back(&self, queue: &str, payload: String) {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        self.notify.notify_waiters();
    }

    fn push_front(&self, queue: &str, payload: String) {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(queue.to_string())
            .or_default()
            .push_front(payload);
        self.notify.notify_waiters();
    }

    fn pop(&self, queue: &str) -> Option<String> {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }
}

/// Broker for single-process deployments and tests. Unacknowledged
/// deliveries go back to the front of their queue when dropped.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<MemoryQueues>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting on `queue`, excluding ones held by consumers.
    pub fn len(&self, queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Deliveries handed out but not yet acknowledged, across all queues.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }
}

struct MemoryAck {
    inner: Arc<MemoryQueues>,
    queue: String,
    payload: Option<String>,
}

#[async_trait]
impl Acknowledge for MemoryAck {
    async fn ack(&mut self) -> Result<()> {
        if self.payload.take().is_some() {
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryAck {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            debug!("Requeueing unacknowledged message on '{}'", self.queue);
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.push_front(&self.queue, payload);
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: &str, payload: String) -> Result<()> {
        self.inner.push_back(queue, payload);
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed.
            notified.as_mut().enable();

            if let Some(payload) = self.inner.pop(queue) {
                self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
                let acker = MemoryAck {
                    inner: Arc::clone(&self.inner),
                    queue: queue.to_string(),
                    payload: Some(payload.clone()),
                };
                return Ok(Some(Delivery::new(payload, Box::new(acker))));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ==================== Redis broker ====================

/// Reliable-queue pattern over Redis lists. Messages are moved atomically
/// from `queue:<name>` to a per-consumer processing list and removed from
/// it on acknowledgement; [`RedisBroker::recover`] returns whatever a dead
/// consumer left behind.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    consumer_id: String,
    poll_interval: Duration,
}

fn queue_key(queue: &str) -> String {
    format!("queue:{}", queue)
}

fn processing_key(queue: &str, consumer_id: &str) -> String {
    format!("queue:{}:processing:{}", queue, consumer_id)
}

fn queue_error(e: redis::RedisError) -> CodeSwitchError {
    CodeSwitchError::Queue(e.to_string())
}

impl RedisBroker {
    pub fn from_connection(conn: ConnectionManager, consumer_id: impl Into<String>) -> Self {
        Self {
            conn,
            consumer_id: consumer_id.into(),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Move messages left in this consumer's processing list back onto
    /// `queue`. Call before consuming after a restart.
    pub async fn recover(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let source = processing_key(queue, &self.consumer_id);
        let destination = queue_key(queue);

        let mut recovered = 0;
        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&source)
                .arg(&destination)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(queue_error)?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(
                "Recovered {} unacknowledged message(s) on '{}' for consumer {}",
                recovered, queue, self.consumer_id
            );
        }
        Ok(recovered)
    }
}

struct RedisAck {
    conn: ConnectionManager,
    processing: String,
    payload: String,
}

#[async_trait]
impl Acknowledge for RedisAck {
    async fn ack(&mut self) -> Result<()> {
        let _: i64 = self
            .conn
            .lrem(&self.processing, 1, &self.payload)
            .await
            .map_err(queue_error)?;
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, queue: &str, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .lpush(queue_key(queue), payload)
            .await
            .map_err(queue_error)?;
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        // Polled LMOVE: blocking commands would stall the shared connection.
        let mut conn = self.conn.clone();
        let source = queue_key(queue);
        let processing = processing_key(queue, &self.consumer_id);
        let deadline = Instant::now() + wait;

        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&source)
                .arg(&processing)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await
                .map_err(queue_error)?;

            if let Some(payload) = moved {
                let acker = RedisAck {
                    conn: self.conn.clone(),
                    processing,
                    payload: payload.clone(),
                };
                return Ok(Some(Delivery::new(payload, Box::new(acker))));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(queue_error)?;
        Ok(())
    }
}

// ==================== Typed queue ====================

/// A decoded message plus the delivery that must be acknowledged once the
/// message has been fully handled.
pub struct Received<T> {
    pub message: T,
    delivery: Delivery,
}

impl<T> Received<T> {
    pub async fn ack(self) -> Result<()> {
        self.delivery.ack().await
    }
}

/// JSON-typed view of one named queue on a [`Broker`].
pub struct TaskQueue<T> {
    broker: Arc<dyn Broker>,
    name: String,
    _message: PhantomData<fn() -> T>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            name: self.name.clone(),
            _message: PhantomData,
        }
    }
}

impl<T> TaskQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(broker: Arc<dyn Broker>, name: impl Into<String>) -> Self {
        Self {
            broker,
            name: name.into(),
            _message: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn publish(&self, message: &T) -> Result<()> {
        let payload = serde_json::to_string(message)
            .map_err(|e| CodeSwitchError::Queue(format!("failed to encode message: {}", e)))?;
        self.broker.publish(&self.name, payload).await
    }

    /// Start consuming; the consumer stops yielding once `cancel` fires.
    pub fn consume(&self, cancel: CancellationToken) -> Consumer<T> {
        Consumer {
            queue: self.clone(),
            cancel,
        }
    }
}

pub struct Consumer<T> {
    queue: TaskQueue<T>,
    cancel: CancellationToken,
}

impl<T> Consumer<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Next decodable message, or `None` once cancelled.
    ///
    /// Cancellation is checked between receives; a receive in progress is
    /// always completed, and a message it returns is still yielded, since the
    /// broker has already moved it out of the queue.
    ///
    /// Payloads that cannot be decoded will never succeed on redelivery, so
    /// they are acknowledged and dropped with a warning.
    pub async fn next(&mut self) -> Option<Result<Received<T>>> {
        let name = self.queue.name.as_str();
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let received = self.queue.broker.receive(name, RECEIVE_WAIT).await;

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            };

            match serde_json::from_str::<T>(delivery.payload()) {
                Ok(message) => return Some(Ok(Received { message, delivery })),
                Err(e) => {
                    warn!("Discarding undecodable message on '{}': {}", name, e);
                    if let Err(ack_err) = delivery.ack().await {
                        return Some(Err(ack_err));
                    }
                }
            }
        }
    }
}

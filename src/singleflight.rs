//! Deduplicates concurrent work for the same key.
//!
//! The first caller for a key starts the work; every caller arriving while
//! it is in flight awaits the same future and observes the same outcome,
//! success or failure. Nothing is memoized: once the work finishes the key
//! is forgotten, so a failed attempt can be retried by the next caller.

use crate::error::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

type Flight<V> = Shared<BoxFuture<'static, Result<V>>>;

pub struct SingleFlight<V: Clone> {
    inflight: Mutex<HashMap<String, Flight<V>>>,
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key` unless an identical call is already in flight.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            inflight
                .entry(key.to_string())
                .or_insert_with(|| work().boxed().shared())
                .clone()
        };

        let outcome = flight.clone().await;

        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if inflight
            .get(key)
            .is_some_and(|current| current.ptr_eq(&flight))
        {
            inflight.remove(key);
        }

        outcome
    }

    /// Number of keys with work currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

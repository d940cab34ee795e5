//! Content Cache: article markup keyed by title, fetched on miss.

use crate::error::{CodeSwitchError, Result};
use crate::singleflight::SingleFlight;
use crate::store::{keys, KvStore};
use crate::wikipedia::ArticleSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

pub struct ContentCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    flights: SingleFlight<String>,
}

impl ContentCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            flights: SingleFlight::new(),
        }
    }

    /// Return the cached value for `key`, or run `fetch`, store its result
    /// with the cache TTL and return it. Fetch failures are never cached.
    /// Concurrent misses for the same key share a single fetch.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        if let Some(value) = self.store.get(key).await? {
            debug!("Cache hit for {}", key);
            return Ok(value);
        }

        let store = Arc::clone(&self.store);
        let ttl = self.ttl;
        let owned_key = key.to_string();
        let fetched = fetch();

        self.flights
            .run(key, move || async move {
                // Another flight may have populated the key since our read.
                if let Some(value) = store.get(&owned_key).await? {
                    return Ok(value);
                }
                info!("Cache miss for {}, fetching", owned_key);
                let value = fetched.await?;
                store.set(&owned_key, &value, ttl).await?;
                Ok(value)
            })
            .await
    }

    pub async fn article(&self, title: &str, source: Arc<dyn ArticleSource>) -> Result<Article> {
        let owned_title = title.to_string();
        let raw = self
            .get_or_fetch(&keys::article(title), move || async move {
                let html = source.fetch(&owned_title).await?;
                let article = Article {
                    title: owned_title,
                    html,
                    fetched_at: Utc::now(),
                };
                serde_json::to_string(&article)
                    .map_err(|e| CodeSwitchError::Cache(format!("failed to encode article: {}", e)))
            })
            .await?;

        serde_json::from_str(&raw)
            .map_err(|e| {
                CodeSwitchError::Cache(format!("corrupt cached article '{}': {}", title, e))
            })
    }
}

//! Key/value cache store with mandatory expiry.
//!
//! Keys are namespaced by purpose (see [`keys`]). Every write carries an
//! explicit TTL and reads never return an expired value.

use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Key namespaces shared by every process.
pub mod keys {
    pub fn article(title: &str) -> String {
        format!("article:{}", title)
    }

    pub fn wordlist(language: &str) -> String {
        format!("wordlist:{}", language)
    }

    pub fn result(task_id: &str) -> String {
        format!("result:{}", task_id)
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Round-trip to the backing store; used at startup to fail fast.
    async fn ping(&self) -> Result<()>;
}

/// In-process store for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + effective_ttl(ttl);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Redis-backed store shared across gateway, worker and collector processes.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, effective_ttl(ttl).as_secs()).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// TTLs are whole seconds with a floor of one second.
fn effective_ttl(ttl: Duration) -> Duration {
    Duration::from_secs(ttl.as_secs().max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespaces() {
        assert_eq!(
            keys::article("Rust (programming language)"),
            "article:Rust (programming language)"
        );
        assert_eq!(keys::wordlist("sv"), "wordlist:sv");
        assert_eq!(keys::result("abc"), "result:abc");
    }

    #[test]
    fn test_effective_ttl_floor() {
        assert_eq!(effective_ttl(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(effective_ttl(Duration::from_millis(1500)), Duration::from_secs(1));
        assert_eq!(effective_ttl(Duration::from_secs(86400)), Duration::from_secs(86400));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_overwrite_is_last_write_wins() {
        let store = MemoryStore::new();
        store.set("k", "first", Duration::from_secs(60)).await.unwrap();
        store.set("k", "second", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_never_returns_expired_entries() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }
}

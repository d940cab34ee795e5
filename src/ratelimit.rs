//! Token-bucket limiter for outbound completion calls.
//!
//! Callers reserve a token up front; when the bucket is empty the
//! reservation goes into debt and the caller sleeps until its token has
//! been refilled. Grants therefore never exceed `burst + rate * elapsed`.

use crate::error::{CodeSwitchError, Result};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate_per_second: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `rate_per_second` must be positive; `burst` below 1 is raised to 1.
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate_per_second,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Take one token, or return the wait it would need if that exceeds
    /// `max_wait`. Nothing is taken in the second case.
    fn reserve(&self, max_wait: Option<Duration>) -> std::result::Result<Duration, Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.burst);
        bucket.refilled_at = now;

        let after = bucket.tokens - 1.0;
        let wait = if after >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-after / self.rate_per_second)
        };

        if let Some(max_wait) = max_wait {
            if wait > max_wait {
                return Err(wait);
            }
        }

        bucket.tokens = after;
        Ok(wait)
    }

    /// Wait for a token.
    pub async fn acquire(&self) {
        if let Ok(wait) = self.reserve(None) {
            if !wait.is_zero() {
                debug!("Rate limited, waiting {:?}", wait);
                sleep(wait).await;
            }
        }
    }

    /// Wait for a token unless that would take longer than `max_wait`, in
    /// which case nothing is consumed.
    pub async fn acquire_within(&self, max_wait: Duration) -> Result<()> {
        match self.reserve(Some(max_wait)) {
            Ok(wait) => {
                if !wait.is_zero() {
                    debug!("Rate limited, waiting {:?}", wait);
                    sleep(wait).await;
                }
                Ok(())
            }
            Err(needed) => {
                debug!("Rate limit wait of {:?} exceeds {:?}", needed, max_wait);
                Err(CodeSwitchError::CompletionTimeout(max_wait))
            }
        }
    }
}

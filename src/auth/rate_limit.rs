//! Token-bucket rate limiting per client per route class.
//!
//! Buckets refill continuously at limit/60 tokens per second up to the
//! per-minute capacity. The client id is the API key id when a request is
//! authenticated, otherwise the caller's IP.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::{FindexError, Result};

/// Route classes with separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Everything; checked for every request
    General,
    /// Search endpoints
    Search,
    /// Directory mutation endpoints
    Index,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    enabled: bool,
    global_per_minute: u32,
    search_per_minute: u32,
    index_per_minute: u32,
    buckets: Mutex<HashMap<(String, RouteClass), Bucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            global_per_minute: config.global_per_minute,
            search_per_minute: config.search_per_minute,
            index_per_minute: config.index_per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn capacity(&self, class: RouteClass) -> u32 {
        match class {
            RouteClass::General => self.global_per_minute,
            RouteClass::Search => self.search_per_minute,
            RouteClass::Index => self.index_per_minute,
        }
    }

    /// Take one token from the client's bucket for `class`.
    ///
    /// Returns `RateLimited` with a retry-after hint when the bucket is dry.
    pub fn check(&self, client_id: &str, class: RouteClass) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let capacity = self.capacity(class) as f64;
        if capacity <= 0.0 {
            return Err(FindexError::RateLimited { retry_after_secs: 60 });
        }
        let rate_per_sec = capacity / 60.0;

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry((client_id.to_string(), class))
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            });

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after_secs = (deficit / rate_per_sec).ceil() as u64;
            Err(FindexError::RateLimited {
                retry_after_secs: retry_after_secs.max(1),
            })
        }
    }

    /// Check the global budget plus the route-class budget when it differs.
    pub fn check_request(&self, client_id: &str, class: RouteClass) -> Result<()> {
        self.check(client_id, RouteClass::General)?;
        if class != RouteClass::General {
            self.check(client_id, class)?;
        }
        Ok(())
    }
}

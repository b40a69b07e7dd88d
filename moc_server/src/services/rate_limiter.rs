//! Per-(tool, tenant) rate limiting for tool execution.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Decides whether a tool call may proceed.
pub trait ToolRateLimiter: Send + Sync {
    fn try_acquire(&self, tool_name: &str, tenant_id: &str) -> bool;
}

/// Permits every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl ToolRateLimiter for Unlimited {
    fn try_acquire(&self, _tool_name: &str, _tenant_id: &str) -> bool {
        true
    }
}

/// Token bucket per (tool, tenant), refilled at `rate` tokens per second up
/// to `burst`. Token counts are scaled by 1000 to keep refill integral.
pub struct TokenBucketLimiter {
    rate: u64,
    burst: u64,
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucketLimiter {
    pub fn new(rate: u64, burst: u64) -> Self {
        Self {
            rate,
            burst: burst.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl ToolRateLimiter for TokenBucketLimiter {
    #[allow(clippy::cast_possible_truncation)]
    fn try_acquire(&self, tool_name: &str, tenant_id: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let max_tokens = self.burst * 1000;
        let now = Instant::now();
        let bucket = buckets
            .entry((tool_name.to_string(), tenant_id.to_string()))
            .or_insert(Bucket {
                tokens: max_tokens,
                last_refill: now,
            });

        let elapsed_ms = now.duration_since(bucket.last_refill).as_millis() as u64;
        if elapsed_ms > 0 {
            bucket.tokens = (bucket.tokens + elapsed_ms * self.rate).min(max_tokens);
            bucket.last_refill = now;
        }

        if bucket.tokens < 1000 {
            return false;
        }
        bucket.tokens -= 1000;
        true
    }
}

/// Limiter for a configured rate; 0 means unlimited.
pub fn from_config(rate_per_sec: u64, burst: u64) -> Box<dyn ToolRateLimiter> {
    if rate_per_sec == 0 {
        Box::new(Unlimited)
    } else {
        Box::new(TokenBucketLimiter::new(rate_per_sec, burst))
    }
}

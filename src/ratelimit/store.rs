//! Shared counter store abstraction.

use async_trait::async_trait;

use crate::error::Result;

/// One limiter's input to a counter evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    /// Effective key of the counter series
    pub key: String,
    /// Requests allowed per window
    pub count: u32,
    /// Window length in seconds
    pub window_secs: u32,
}

impl CounterEntry {
    pub fn new(key: impl Into<String>, count: u32, window_secs: u32) -> Self {
        Self {
            key: key.into(),
            count,
            window_secs,
        }
    }
}

/// One limiter's result for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterOutcome {
    /// Quota left after this request; negative once over limit
    pub remaining: i64,
    /// Seconds until the window resets
    pub ttl_secs: i64,
}

impl LimiterOutcome {
    pub fn new(remaining: i64, ttl_secs: i64) -> Self {
        Self { remaining, ttl_secs }
    }

    /// Whether this request went past the limiter's quota.
    pub fn is_over_limit(&self) -> bool {
        self.remaining < 0
    }
}

/// A store that evaluates every limiter of a request as one indivisible step.
///
/// For each entry, in order: if the counter has no live expiry, it is set to
/// `count - 1` with an expiry of `window_secs`; otherwise it is decremented by
/// one and its expiry is left untouched. Outcomes are returned in entry order.
/// Implementations must not split this into separate read and write round trips.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Evaluate all entries atomically. No partial result is returned on error.
    async fn evaluate_limiters(&self, entries: &[CounterEntry]) -> Result<Vec<LimiterOutcome>>;
}

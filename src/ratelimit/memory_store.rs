//! In-process counter store.
//!
//! Mirrors the Redis script semantics for a single process: useful for tests
//! and single-node development. One mutex guards the whole evaluation, which
//! makes the multi-key step indivisible within this process only. Expired
//! counters are swept whenever the map reaches a size threshold, so memory
//! tracks the number of live windows rather than every key ever seen.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::store::{CounterEntry, CounterStore, LimiterOutcome};
use crate::error::Result;

/// Map size at which expired counters are first swept.
pub const PURGE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Instant,
}

#[derive(Debug)]
struct Counters {
    entries: HashMap<String, Counter>,
    /// Size that triggers the next sweep
    purge_at: usize,
}

impl Counters {
    /// Sweep expired counters once the map has grown to `purge_at`.
    ///
    /// The next threshold is twice the surviving size, so a map full of live
    /// windows is not rescanned on every insert.
    fn maybe_purge(&mut self, now: Instant) {
        if self.entries.len() < self.purge_at {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, c| c.expires_at > now);
        self.purge_at = (self.entries.len() * 2).max(PURGE_THRESHOLD);
        trace!(
            removed = before - self.entries.len(),
            live = self.entries.len(),
            "Purged expired counters"
        );
    }
}

/// Counter store held in process memory.
#[derive(Debug)]
pub struct MemoryCounterStore {
    counters: Mutex<Counters>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self {
            counters: Mutex::new(Counters {
                entries: HashMap::new(),
                purge_at: PURGE_THRESHOLD,
            }),
        }
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a live counter.
    pub fn counter(&self, key: &str) -> Option<i64> {
        let now = Instant::now();
        self.counters
            .lock()
            .entries
            .get(key)
            .filter(|c| c.expires_at > now)
            .map(|c| c.value)
    }

    /// Number of stored counters, including expired ones not yet swept.
    pub fn counter_count(&self) -> usize {
        self.counters.lock().entries.len()
    }
}

/// Remaining time in whole seconds, rounded the way Redis `TTL` rounds.
fn ttl_secs(remaining: Duration) -> i64 {
    ((remaining.as_millis() + 500) / 1000) as i64
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn evaluate_limiters(&self, entries: &[CounterEntry]) -> Result<Vec<LimiterOutcome>> {
        let now = Instant::now();
        let mut counters = self.counters.lock();

        let outcomes = entries
            .iter()
            .map(|entry| {
                if let Some(counter) = counters
                    .entries
                    .get_mut(&entry.key)
                    .filter(|c| c.expires_at > now)
                {
                    counter.value -= 1;
                    return LimiterOutcome::new(counter.value, ttl_secs(counter.expires_at - now));
                }

                counters.maybe_purge(now);
                let window = Duration::from_secs(u64::from(entry.window_secs));
                let value = i64::from(entry.count) - 1;
                counters.entries.insert(
                    entry.key.clone(),
                    Counter {
                        value,
                        expires_at: now + window,
                    },
                );
                trace!(key = %entry.key, window_secs = entry.window_secs, "Started new window");
                LimiterOutcome::new(value, i64::from(entry.window_secs))
            })
            .collect();

        Ok(outcomes)
    }
}

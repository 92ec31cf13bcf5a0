//! Admission decision and quota header annotation.
//!
//! [`LimitCountFilter::decode_headers`] runs on the request path: it resolves a
//! key per limiter, evaluates every limiter in one store call and decides.
//! The outcomes travel with the request in a [`RequestQuota`], which
//! [`LimitCountFilter::encode_headers`] reads on the response path.

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::RwLock;
use tracing::{debug, error, info};

use super::key::resolve_key;
use super::rules::{CompiledConfig, Limiter};
use super::store::{CounterEntry, CounterStore, LimiterOutcome};
use super::request::RequestInfo;
use crate::error::Error;

/// Marker header set on responses denied by a limiter.
pub const RATE_LIMITED_HEADER: HeaderName = HeaderName::from_static("x-envoy-ratelimited");
/// Limit of the tightest limiter, followed by the quota policy.
pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Remaining quota of the tightest limiter, never below zero.
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Seconds until the tightest limiter's window resets.
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// A response produced by the filter instead of forwarding the request.
#[derive(Debug, Clone)]
pub struct LocalResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl LocalResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    fn rate_limited() -> Self {
        let mut response = Self::new(StatusCode::TOO_MANY_REQUESTS);
        response
            .headers
            .insert(RATE_LIMITED_HEADER, HeaderValue::from_static("true"));
        response
    }
}

/// Outcome of the request path.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Let the request through, carrying its quota state to the response path
    Continue(RequestQuota),
    /// Answer locally
    Deny(LocalResponse),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Continue(_))
    }
}

/// Limiter outcomes of one request, with the configuration they were computed under.
///
/// Empty when the store could not be reached and the filter failed open.
#[derive(Debug, Clone, Default)]
pub struct RequestQuota {
    retained: Option<(Arc<CompiledConfig>, Vec<LimiterOutcome>)>,
}

impl RequestQuota {
    fn new(config: Arc<CompiledConfig>, outcomes: Vec<LimiterOutcome>) -> Self {
        Self {
            retained: Some((config, outcomes)),
        }
    }

    /// Outcomes in configured limiter order.
    pub fn outcomes(&self) -> &[LimiterOutcome] {
        match &self.retained {
            Some((_, outcomes)) => outcomes,
            None => &[],
        }
    }

    /// The headers to expose, if exposure is enabled and outcomes were retained.
    pub fn quota_headers(&self) -> Option<QuotaHeaders> {
        let (config, outcomes) = self.retained.as_ref()?;
        if !config.enable_limit_quota_headers() {
            return None;
        }
        QuotaHeaders::tightest(config, outcomes)
    }
}

/// Header values describing the most constraining limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaHeaders {
    pub limit: HeaderValue,
    pub remaining: i64,
    pub reset: i64,
}

impl QuotaHeaders {
    /// Pick the limiter with the smallest remaining quota; ties go to the first.
    fn tightest(config: &CompiledConfig, outcomes: &[LimiterOutcome]) -> Option<Self> {
        let (limit, outcome) = config
            .limit_values()
            .iter()
            .zip(outcomes)
            .reduce(|best, candidate| {
                if candidate.1.remaining < best.1.remaining {
                    candidate
                } else {
                    best
                }
            })?;

        Some(Self {
            limit: limit.clone(),
            remaining: outcome.remaining.max(0),
            reset: outcome.ttl_secs,
        })
    }

    /// Append one value per header.
    pub fn append_to(&self, headers: &mut HeaderMap) {
        headers.append(LIMIT_HEADER, self.limit.clone());
        headers.append(REMAINING_HEADER, HeaderValue::from(self.remaining));
        headers.append(RESET_HEADER, HeaderValue::from(self.reset));
    }
}

/// The limit-count filter shared by all requests of one configuration.
///
/// Holds no per-request state; counts live only in the store.
pub struct LimitCountFilter {
    config: RwLock<Arc<CompiledConfig>>,
    store: Arc<dyn CounterStore>,
}

impl LimitCountFilter {
    pub fn new(config: CompiledConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            store,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Arc<CompiledConfig> {
        self.config.read().clone()
    }

    /// Swap in a new configuration. Requests already decoded keep their snapshot.
    pub fn replace_config(&self, config: CompiledConfig) {
        *self.config.write() = Arc::new(config);
        info!("Limiter configuration replaced");
    }

    /// Request path: evaluate every limiter once and decide.
    pub async fn decode_headers(&self, request: &RequestInfo) -> Decision {
        let config = self.config();

        let entries: Vec<CounterEntry> = config
            .limiters()
            .iter()
            .map(|limiter| {
                let key = resolve_key(limiter, request);
                debug!(rule = limiter.prefix(), key = %key, "Resolved limiter key");
                CounterEntry::new(
                    limiter.effective_key(&key),
                    limiter.count(),
                    limiter.time_window().as_secs(),
                )
            })
            .collect();

        let outcomes = match self.store.evaluate_limiters(&entries).await {
            Ok(outcomes) if outcomes.len() == entries.len() => outcomes,
            Ok(outcomes) => {
                let e = Error::UnexpectedReply(format!(
                    "{} outcomes for {} limiters",
                    outcomes.len(),
                    entries.len()
                ));
                return store_failure(&config, &entries, e);
            }
            Err(e) => return store_failure(&config, &entries, e),
        };

        for ((limiter, entry), outcome) in config.limiters().iter().zip(&entries).zip(&outcomes) {
            log_outcome(limiter, entry, outcome);
        }

        if let Some((limiter, entry, outcome)) = first_over_limit(config.limiters(), &entries, &outcomes) {
            info!(
                rule = limiter.prefix(),
                key = %entry.key,
                remaining = outcome.remaining,
                ttl = outcome.ttl_secs,
                "Request rate limited"
            );
            return Decision::Deny(LocalResponse::rate_limited());
        }

        Decision::Continue(RequestQuota::new(config, outcomes))
    }

    /// Response path: append quota headers for the tightest limiter.
    pub fn encode_headers(&self, quota: &RequestQuota, headers: &mut HeaderMap) {
        if let Some(quota_headers) = quota.quota_headers() {
            quota_headers.append_to(headers);
        }
    }
}

fn log_outcome(limiter: &Limiter, entry: &CounterEntry, outcome: &LimiterOutcome) {
    debug!(
        rule = limiter.prefix(),
        key = %entry.key,
        remaining = outcome.remaining,
        ttl = outcome.ttl_secs,
        "Limiter evaluated"
    );
}

fn first_over_limit<'a>(
    limiters: &'a [Limiter],
    entries: &'a [CounterEntry],
    outcomes: &'a [LimiterOutcome],
) -> Option<(&'a Limiter, &'a CounterEntry, &'a LimiterOutcome)> {
    limiters
        .iter()
        .zip(entries)
        .zip(outcomes)
        .map(|((limiter, entry), outcome)| (limiter, entry, outcome))
        .find(|(_, _, outcome)| outcome.is_over_limit())
}

fn store_failure(config: &CompiledConfig, entries: &[CounterEntry], e: Error) -> Decision {
    let keys: Vec<&str> = entries.iter().map(|entry| entry.key.as_str()).collect();
    error!(
        error = %e,
        keys = ?keys,
        failure_mode_deny = config.failure_mode_deny(),
        "Failed to evaluate limiters"
    );

    if config.failure_mode_deny() {
        Decision::Deny(LocalResponse::new(StatusCode::SERVICE_UNAVAILABLE))
    } else {
        Decision::Continue(RequestQuota::default())
    }
}

//! Limit-count admission control against a shared counter store.

mod expr;
mod filter;
mod key;
mod memory_store;
mod redis_store;
mod request;
mod rules;
mod store;

pub use expr::{Expression, KeyExpression};
pub use filter::{
    Decision, LimitCountFilter, LocalResponse, QuotaHeaders, RequestQuota, LIMIT_HEADER,
    RATE_LIMITED_HEADER, REMAINING_HEADER, RESET_HEADER,
};
pub use key::resolve_key;
pub use memory_store::MemoryCounterStore;
pub use redis_store::{RedisCounterStore, DEFAULT_TIMEOUT, LIMIT_COUNT_SCRIPT};
pub use request::{RequestInfo, UNKNOWN_CLIENT};
pub use rules::{CompiledConfig, LimitCountConfig, Limiter, RuleConfig, TimeWindow, DEFAULT_KEY_PREFIX};
pub use store::{CounterEntry, CounterStore, LimiterOutcome};

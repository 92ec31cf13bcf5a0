//! Limiter rule configuration and compilation.
//!
//! Rules are loaded from YAML (directly or through the service config), validated,
//! and compiled into [`Limiter`] values. A compiled [`CompiledConfig`] is immutable;
//! reloading means building a new one and swapping it in whole.

use http::HeaderValue;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::expr::{Expression, KeyExpression};
use crate::error::{Error, Result};

/// Default namespace for generated rule prefixes.
pub const DEFAULT_KEY_PREFIX: &str = "limit-count";

/// Configuration of one limit-count filter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitCountConfig {
    /// Namespace used to build rule prefixes that are not set explicitly
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deny with 503 when the store cannot be reached, instead of letting traffic through
    #[serde(default)]
    pub failure_mode_deny: bool,

    /// Append `x-ratelimit-*` headers to allowed responses
    #[serde(default)]
    pub enable_limit_quota_headers: bool,

    /// Override for the quota policy text carried in the limit header
    #[serde(default)]
    pub quota_policy: Option<String>,

    /// Limiter rules, evaluated in order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for LimitCountConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            failure_mode_deny: false,
            enable_limit_quota_headers: false,
            quota_policy: None,
            rules: Vec::new(),
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// One configured limiter rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Requests allowed per window
    pub count: u32,
    /// Window length
    pub time_window: TimeWindow,
    /// Optional key expression; the client address is used when absent
    #[serde(default)]
    pub key: Option<String>,
    /// Optional explicit counter prefix
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Length of a limiter window, in whole seconds.
///
/// Deserializes from an integer number of seconds or a string such as
/// `"30s"`, `"5m"`, `"1h"` or `"1d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow(u32);

impl TimeWindow {
    /// A window of `secs` seconds.
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    /// Window length in seconds.
    pub fn as_secs(&self) -> u32 {
        self.0
    }

    /// Parse `"<n>"` or `"<n><unit>"` with unit one of `s`, `m`, `h`, `d`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (digits, multiplier) = match text.char_indices().last() {
            Some((i, 's')) => (&text[..i], 1),
            Some((i, 'm')) => (&text[..i], 60),
            Some((i, 'h')) => (&text[..i], 3600),
            Some((i, 'd')) => (&text[..i], 86400),
            _ => (text, 1),
        };
        let value: u32 = digits
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid time window `{}`", text)))?;
        value
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| Error::Config(format!("time window `{}` is too large", text)))
    }
}

impl Serialize for TimeWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for TimeWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(TimeWindow(secs)),
            Raw::Text(text) => TimeWindow::parse(&text).map_err(serde::de::Error::custom),
        }
    }
}

/// A compiled limiter rule: one independent counter series per resolved key.
#[derive(Debug, Clone)]
pub struct Limiter {
    prefix: String,
    count: u32,
    time_window: TimeWindow,
    expression: Option<Arc<dyn KeyExpression>>,
}

impl Limiter {
    /// Create a limiter keyed on the client address.
    pub fn new(prefix: impl Into<String>, count: u32, time_window: TimeWindow) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(Error::Config("limiter prefix must not be empty".to_string()));
        }
        if count == 0 {
            return Err(Error::Config(format!("limiter `{}`: count must be at least 1", prefix)));
        }
        if time_window.as_secs() == 0 {
            return Err(Error::Config(format!(
                "limiter `{}`: time window must be at least 1s",
                prefix
            )));
        }
        Ok(Self {
            prefix,
            count,
            time_window,
            expression: None,
        })
    }

    /// Attach a key expression.
    pub fn with_expression(mut self, expression: Arc<dyn KeyExpression>) -> Self {
        self.expression = Some(expression);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn time_window(&self) -> TimeWindow {
        self.time_window
    }

    pub fn expression(&self) -> Option<&dyn KeyExpression> {
        self.expression.as_deref()
    }

    /// The store key for a resolved partition value.
    pub fn effective_key(&self, resolved: &str) -> String {
        format!("{}|{}", self.prefix, resolved)
    }

    /// This limiter in quota policy syntax, e.g. `10;w=60`.
    pub fn quota_policy(&self) -> String {
        format!("{};w={}", self.count, self.time_window.as_secs())
    }
}

/// Immutable, validated configuration used by the filter.
#[derive(Debug)]
pub struct CompiledConfig {
    limiters: Vec<Limiter>,
    failure_mode_deny: bool,
    enable_limit_quota_headers: bool,
    quota_policy: String,
    limit_values: Vec<HeaderValue>,
}

impl CompiledConfig {
    /// Build from already constructed limiters. Fail-open, headers disabled.
    pub fn from_limiters(limiters: Vec<Limiter>) -> Result<Self> {
        if limiters.is_empty() {
            return Err(Error::Config("at least one limiter rule is required".to_string()));
        }

        let mut seen = HashSet::new();
        for limiter in &limiters {
            if !seen.insert(limiter.prefix()) {
                return Err(Error::Config(format!(
                    "duplicate limiter prefix `{}`",
                    limiter.prefix()
                )));
            }
        }

        let quota_policy = limiters
            .iter()
            .map(Limiter::quota_policy)
            .collect::<Vec<_>>()
            .join(", ");

        let limit_values = limit_values(&limiters, &quota_policy)?;

        Ok(Self {
            limiters,
            failure_mode_deny: false,
            enable_limit_quota_headers: false,
            quota_policy,
            limit_values,
        })
    }

    pub fn with_failure_mode_deny(mut self, deny: bool) -> Self {
        self.failure_mode_deny = deny;
        self
    }

    pub fn with_quota_headers(mut self, enabled: bool) -> Self {
        self.enable_limit_quota_headers = enabled;
        self
    }

    /// Replace the quota policy text. It must be usable as a header value.
    pub fn with_quota_policy(mut self, policy: impl Into<String>) -> Result<Self> {
        let policy = policy.into();
        self.limit_values = limit_values(&self.limiters, &policy)?;
        self.quota_policy = policy;
        Ok(self)
    }

    /// Limiters in configured order.
    pub fn limiters(&self) -> &[Limiter] {
        &self.limiters
    }

    pub fn failure_mode_deny(&self) -> bool {
        self.failure_mode_deny
    }

    pub fn enable_limit_quota_headers(&self) -> bool {
        self.enable_limit_quota_headers
    }

    /// Quota policy text carried in the limit header.
    pub fn quota_policy(&self) -> &str {
        &self.quota_policy
    }

    /// Pre-rendered limit header values, one per limiter in configured order.
    pub fn limit_values(&self) -> &[HeaderValue] {
        &self.limit_values
    }
}

/// Render `"{count}, {policy}"` for every limiter.
fn limit_values(limiters: &[Limiter], policy: &str) -> Result<Vec<HeaderValue>> {
    limiters
        .iter()
        .map(|limiter| {
            HeaderValue::from_str(&format!("{}, {}", limiter.count(), policy))
                .map_err(|_| Error::Config(format!("invalid quota policy `{}`", policy.escape_debug())))
        })
        .collect()
}

impl LimitCountConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse limiter config: {}", e)))
    }

    /// Validate and compile into the form used at request time.
    pub fn compile(&self) -> Result<CompiledConfig> {
        let mut limiters = Vec::with_capacity(self.rules.len());

        for (index, rule) in self.rules.iter().enumerate() {
            let prefix = match &rule.prefix {
                Some(prefix) => prefix.clone(),
                None => format!("{}|{}", self.key_prefix, index),
            };

            let mut limiter = Limiter::new(prefix, rule.count, rule.time_window)?;
            if let Some(source) = &rule.key {
                let expression = Expression::parse(source)
                    .map_err(|e| Error::Config(format!("rule {}: {}", index, e)))?;
                limiter = limiter.with_expression(Arc::new(expression));
            }
            limiters.push(limiter);
        }

        let mut compiled = CompiledConfig::from_limiters(limiters)?
            .with_failure_mode_deny(self.failure_mode_deny)
            .with_quota_headers(self.enable_limit_quota_headers);
        if let Some(policy) = &self.quota_policy {
            compiled = compiled.with_quota_policy(policy.clone())?;
        }

        info!(
            rules = compiled.limiters().len(),
            failure_mode_deny = compiled.failure_mode_deny(),
            quota_headers = compiled.enable_limit_quota_headers(),
            "Limiter configuration compiled"
        );

        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
failure_mode_deny: true
enable_limit_quota_headers: true
rules:
  - count: 2
    time_window: 10s
    key: request.header('x-user')
  - count: 100
    time_window: 3600
"#;
        let config = LimitCountConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.key_prefix, DEFAULT_KEY_PREFIX);
        assert!(config.failure_mode_deny);
        assert!(config.enable_limit_quota_headers);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].time_window, TimeWindow::from_secs(10));
        assert_eq!(config.rules[1].time_window, TimeWindow::from_secs(3600));
        assert_eq!(config.rules[1].key, None);
    }

    #[test]
    fn test_defaults() {
        let config = LimitCountConfig::from_yaml("rules: []").unwrap();
        assert!(!config.failure_mode_deny);
        assert!(!config.enable_limit_quota_headers);
        assert_eq!(config.quota_policy, None);
    }

    #[test]
    fn test_time_window_parse() {
        assert_eq!(TimeWindow::parse("45").unwrap().as_secs(), 45);
        assert_eq!(TimeWindow::parse("30s").unwrap().as_secs(), 30);
        assert_eq!(TimeWindow::parse("5m").unwrap().as_secs(), 300);
        assert_eq!(TimeWindow::parse("1h").unwrap().as_secs(), 3600);
        assert_eq!(TimeWindow::parse("1d").unwrap().as_secs(), 86400);
        assert!(TimeWindow::parse("fast").is_err());
        assert!(TimeWindow::parse("1.5s").is_err());
        assert!(TimeWindow::parse("99999999d").is_err());
    }

    #[test]
    fn test_compile_generates_prefixes_and_policy() {
        let yaml = r#"
key_prefix: gw
rules:
  - count: 5
    time_window: 1m
  - count: 1000
    time_window: 1d
    prefix: daily
"#;
        let compiled = LimitCountConfig::from_yaml(yaml).unwrap().compile().unwrap();
        let limiters = compiled.limiters();

        assert_eq!(limiters[0].prefix(), "gw|0");
        assert_eq!(limiters[1].prefix(), "daily");
        assert_eq!(limiters[0].effective_key("10.0.0.1"), "gw|0|10.0.0.1");
        assert_eq!(compiled.quota_policy(), "5;w=60, 1000;w=86400");
    }

    #[test]
    fn test_quota_policy_override() {
        let yaml = r#"
quota_policy: "5;w=60;comment=\"burst\""
rules:
  - count: 5
    time_window: 60
"#;
        let compiled = LimitCountConfig::from_yaml(yaml).unwrap().compile().unwrap();
        assert_eq!(compiled.quota_policy(), "5;w=60;comment=\"burst\"");
    }

    #[test]
    fn test_compile_rejects_invalid_rules() {
        let no_rules = LimitCountConfig::default();
        assert!(matches!(no_rules.compile(), Err(Error::Config(_))));

        let zero_count = LimitCountConfig::from_yaml("rules: [{count: 0, time_window: 1}]").unwrap();
        assert!(matches!(zero_count.compile(), Err(Error::Config(_))));

        let zero_window = LimitCountConfig::from_yaml("rules: [{count: 1, time_window: 0}]").unwrap();
        assert!(matches!(zero_window.compile(), Err(Error::Config(_))));

        let bad_policy = LimitCountConfig::from_yaml(
            "quota_policy: \"line\\nbreak\"\nrules: [{count: 1, time_window: 1}]",
        )
        .unwrap();
        assert!(matches!(bad_policy.compile(), Err(Error::Config(_))));

        let bad_key =
            LimitCountConfig::from_yaml("rules: [{count: 1, time_window: 1, key: 'nope('}]").unwrap();
        assert!(matches!(bad_key.compile(), Err(Error::Config(_))));
    }

    #[test]
    fn test_programmatic_quota_policy_is_validated() {
        let build = || {
            CompiledConfig::from_limiters(vec![Limiter::new("p", 5, TimeWindow::from_secs(60)).unwrap()])
                .unwrap()
        };

        let rejected = build().with_quota_policy("5;w=60\r\nx-injected: 1");
        assert!(matches!(rejected, Err(Error::Config(_))));

        let accepted = build().with_quota_policy("5;w=60;burst").unwrap();
        assert_eq!(accepted.quota_policy(), "5;w=60;burst");
        assert_eq!(accepted.limit_values()[0], "5, 5;w=60;burst");
    }

    #[test]
    fn test_limit_values_follow_rule_order() {
        let compiled = LimitCountConfig::from_yaml(
            "rules: [{count: 2, time_window: 10}, {count: 100, time_window: 3600}]",
        )
        .unwrap()
        .compile()
        .unwrap();

        assert_eq!(compiled.limit_values()[0], "2, 2;w=10, 100;w=3600");
        assert_eq!(compiled.limit_values()[1], "100, 2;w=10, 100;w=3600");
    }

    #[test]
    fn test_compile_rejects_duplicate_prefixes() {
        let yaml = r#"
rules:
  - count: 1
    time_window: 1
    prefix: same
  - count: 2
    time_window: 1
    prefix: same
"#;
        let config = LimitCountConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.compile(), Err(Error::Config(_))));
    }
}

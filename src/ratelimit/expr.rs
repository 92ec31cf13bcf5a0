//! Key expressions.
//!
//! A key expression computes a limiter's partition value from request
//! attributes. The built-in grammar is one or more terms joined by `+`:
//!
//! - `request.header('name')`
//! - `request.query('name')`
//! - `request.path()`
//! - `request.method()`
//! - `source.address()`
//! - a quoted string literal, e.g. `'tenant:'`
//!
//! Other evaluators can be plugged in through the [`KeyExpression`] trait.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::request::RequestInfo;
use crate::error::{Error, Result};

/// Something that can compute a key from a request.
pub trait KeyExpression: Send + Sync + fmt::Debug {
    /// Evaluate against the request. Errors trigger the client address fallback.
    fn evaluate(&self, request: &RequestInfo) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Header(String),
    Query(String),
    Path,
    Method,
    SourceAddress,
    Literal(String),
}

static TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:(?P<obj>request|source)\.(?P<func>[a-z]+)\(\s*(?:'(?P<sarg>[^']*)'|"(?P<darg>[^"]*)")?\s*\)|'(?P<slit>[^']*)'|"(?P<dlit>[^"]*)")$"#,
    )
    .expect("term pattern is valid")
});

/// A parsed built-in key expression.
#[derive(Debug, Clone)]
pub struct Expression {
    terms: Vec<Term>,
}

impl Expression {
    /// Parse an expression.
    pub fn parse(source: &str) -> Result<Self> {
        let mut terms = Vec::new();
        for raw in split_terms(source)? {
            let raw = raw.trim();
            let caps = TERM_RE
                .captures(raw)
                .ok_or_else(|| Error::Expression(format!("invalid term `{}` in `{}`", raw, source)))?;

            if let Some(lit) = caps.name("slit").or_else(|| caps.name("dlit")) {
                terms.push(Term::Literal(lit.as_str().to_string()));
                continue;
            }

            let obj = caps.name("obj").map(|m| m.as_str()).unwrap_or_default();
            let func = caps.name("func").map(|m| m.as_str()).unwrap_or_default();
            let arg = caps.name("sarg").or_else(|| caps.name("darg")).map(|m| m.as_str());

            let term = match (obj, func, arg) {
                ("request", "header", Some(name)) if !name.is_empty() => Term::Header(name.to_string()),
                ("request", "query", Some(name)) if !name.is_empty() => Term::Query(name.to_string()),
                ("request", "path", None) => Term::Path,
                ("request", "method", None) => Term::Method,
                ("source", "address", None) => Term::SourceAddress,
                _ => {
                    return Err(Error::Expression(format!(
                        "unknown function `{}.{}` in `{}`",
                        obj, func, source
                    )))
                }
            };
            terms.push(term);
        }

        Ok(Self { terms })
    }
}

impl KeyExpression for Expression {
    fn evaluate(&self, request: &RequestInfo) -> Result<String> {
        let mut out = String::new();
        for term in &self.terms {
            match term {
                Term::Header(name) => {
                    let value = request
                        .header(name)
                        .ok_or_else(|| Error::Expression(format!("header `{}` not present", name)))?;
                    out.push_str(value);
                }
                Term::Query(name) => {
                    let value = request.query_param(name).ok_or_else(|| {
                        Error::Expression(format!("query parameter `{}` not present", name))
                    })?;
                    out.push_str(&value);
                }
                Term::Path => out.push_str(&request.path),
                Term::Method => out.push_str(request.method.as_str()),
                Term::SourceAddress => {
                    let addr = request
                        .client_addr
                        .ok_or_else(|| Error::Expression("source address unknown".to_string()))?;
                    out.push_str(&addr.to_string());
                }
                Term::Literal(lit) => out.push_str(lit),
            }
        }
        Ok(out)
    }
}

/// Split on `+` outside of quotes.
fn split_terms(source: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in source.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '+') => {
                parts.push(&source[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(Error::Expression(format!("unterminated string in `{}`", source)));
    }
    parts.push(&source[start..]);

    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err(Error::Expression(format!("empty term in `{}`", source)));
    }
    Ok(parts)
}

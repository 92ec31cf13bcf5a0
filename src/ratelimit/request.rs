//! Request-side view consumed by key resolution.

use std::net::IpAddr;

use http::{HeaderMap, HeaderName, HeaderValue, Method};

/// Client address used when the peer address is not known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The parts of an inbound request that limiter keys may be derived from.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Request method
    pub method: Method,
    /// Request path, without the query string
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// Inbound request headers
    pub headers: HeaderMap,
    /// Address of the directly connected client
    pub client_addr: Option<IpAddr>,
}

impl RequestInfo {
    /// Create a request view with no headers and no known client address.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            client_addr: None,
        }
    }

    /// Build a request view from HTTP request parts.
    pub fn from_parts(parts: &http::request::Parts, client_addr: Option<IpAddr>) -> Self {
        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            client_addr,
        }
    }

    /// Append a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the raw query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the client address.
    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// The client address as used for fallback keys.
    pub fn client_address(&self) -> String {
        match self.client_addr {
            Some(addr) => addr.to_string(),
            None => UNKNOWN_CLIENT.to_string(),
        }
    }
}

//! HTTP server exposing the limit-count filter.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::limit_count;
use crate::error::Result;
use crate::ratelimit::LimitCountFilter;

/// Router answering `200 OK` on every path once the filter lets a request through.
///
/// Denied requests never reach the terminal handler, which makes the server
/// usable as an external authorization check in front of other services.
pub fn router(filter: Arc<LimitCountFilter>) -> Router {
    Router::new()
        .fallback(|| async { StatusCode::OK })
        .layer(axum::middleware::from_fn_with_state(filter, limit_count))
}

/// HTTP server for the limit-count filter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The filter shared by all connections
    filter: Arc<LimitCountFilter>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, filter: Arc<LimitCountFilter>) -> Self {
        Self { addr, filter }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            router(self.filter).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

//! Axum middleware running the limit-count filter around an inner service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::instrument;

use crate::ratelimit::{Decision, LimitCountFilter, LocalResponse, RequestInfo};

impl IntoResponse for LocalResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers).into_response()
    }
}

/// Decide on the request, then annotate the inner service's response.
///
/// Install with `axum::middleware::from_fn_with_state(filter, limit_count)`.
/// The client address is taken from `ConnectInfo<SocketAddr>` when the
/// server was started with connect info.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn limit_count(
    State(filter): State<Arc<LimitCountFilter>>,
    request: Request,
    next: Next,
) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let (parts, body) = request.into_parts();
    let info = RequestInfo::from_parts(&parts, client_addr);

    let quota = match filter.decode_headers(&info).await {
        Decision::Continue(quota) => quota,
        Decision::Deny(local) => return local.into_response(),
    };

    let mut response = next.run(Request::from_parts(parts, body)).await;
    filter.encode_headers(&quota, response.headers_mut());
    response
}

//! Partition key resolution.

use tracing::{debug, info};

use super::request::RequestInfo;
use super::rules::Limiter;

/// Compute the partition value of `limiter` for `request`.
///
/// The limiter's key expression is used when it evaluates to a non-empty
/// string. Otherwise the client address is the key.
pub fn resolve_key(limiter: &Limiter, request: &RequestInfo) -> String {
    if let Some(expression) = limiter.expression() {
        match expression.evaluate(request) {
            Ok(key) if !key.is_empty() => return key,
            Ok(_) => {
                info!(
                    rule = limiter.prefix(),
                    "Key expression evaluated to an empty string, using client address as key"
                );
            }
            Err(e) => {
                info!(
                    rule = limiter.prefix(),
                    error = %e,
                    "Key expression failed, using client address as key"
                );
            }
        }
    } else {
        debug!(rule = limiter.prefix(), "No key expression, using client address as key");
    }

    request.client_address()
}

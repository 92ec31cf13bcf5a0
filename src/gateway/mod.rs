//! HTTP gateway integration for the limit-count filter.

mod middleware;
mod server;

pub use middleware::limit_count;
pub use server::{router, HttpServer};

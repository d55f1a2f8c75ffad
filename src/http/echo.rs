//! Echo endpoint.
//!
//! A liveness check that answers when the process can respond to HTTP. Served on
//! the HTTPS listener, and on the plain listener when TLS is off.

use axum::routing::get;
use axum::Router;
use http::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN};
use tower_http::set_header::SetResponseHeaderLayer;

/// Router exposing `GET /echo`, reachable from any origin.
pub fn echo_router() -> Router {
    Router::new()
        .route("/echo", get(echo))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
}

pub async fn echo() -> &'static str {
    "echo"
}

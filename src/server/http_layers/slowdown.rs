//! Artificial latency for local frontend work against an instant backend.

use axum::{body::Body, http::Request, middleware::Next, response::IntoResponse};
use std::time::Duration;

const SLOWDOWN_MILLIS: u64 = 300;

pub async fn slowdown_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(SLOWDOWN_MILLIS)).await;
    next.run(request).await
}

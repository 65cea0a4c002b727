//! Health check endpoint for monitoring probes.

use axum::response::IntoResponse;

/// Basic health check (always returns OK if the server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

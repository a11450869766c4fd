// Liveness endpoint

use axum::{Json, response::IntoResponse};

use crate::types::{HealthResponse, now_timestamp};

pub(crate) async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        timestamp: now_timestamp(),
    })
}

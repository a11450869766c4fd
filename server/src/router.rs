// Router configuration

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::AppError,
    handlers::{evaluation_handlers::*, health_handlers::*, upload_handlers::*},
    observability,
    state::AppState,
};

pub fn build_router(state: AppState) -> Result<Router> {
    let origin = HeaderValue::from_str(&state.config.allowed_origin)
        .with_context(|| format!("invalid CORS origin {:?}", state.config.allowed_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([origin]))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let body_limit = state.config.max_upload_bytes;

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/upload", post(upload_handler))
        .route("/evaluations", post(append_evaluation_handler))
        .fallback(fallback_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(observability::http_make_span())
                .on_response(observability::response_logger()),
        )
        .layer(cors)
        .layer(observability::request_context_layer())
        .with_state(state);

    Ok(router)
}

async fn fallback_handler() -> AppError {
    AppError::not_found("Route not found")
}

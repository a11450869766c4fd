// Ledger append endpoint

use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::StatusCode,
};
use courier_core::Record;

use crate::{error::AppError, state::AppState, types::EvaluationResponse};

const ADDED_MESSAGE: &str = "Evaluator added successfully";

/// The body is taken as raw bytes so that a missing or non-object body is a
/// plain validation error rather than an extractor rejection. A body over the
/// upload limit still gets the JSON error envelope.
pub(crate) async fn append_evaluation_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<EvaluationResponse>, AppError> {
    let body = body.map_err(body_rejection)?;
    let record = Record::from_json_bytes(&body)?;
    let receipt = state.ledger.append(record).await?;

    Ok(Json(EvaluationResponse {
        success: true,
        message: ADDED_MESSAGE,
        github_url: receipt.location.url().to_owned(),
        data: receipt.record.into_value(),
    }))
}

fn body_rejection(rejection: BytesRejection) -> AppError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large(rejection.body_text())
    } else {
        AppError::bad_request(rejection.body_text())
    }
}

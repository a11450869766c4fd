// Response bodies for the REST handlers

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Millisecond-precision UTC timestamp, e.g. `2024-05-01T12:00:00.000Z`.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) timestamp: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    pub(crate) success: bool,
    pub(crate) url: String,
    pub(crate) timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EvaluationResponse {
    pub(crate) success: bool,
    pub(crate) message: &'static str,
    pub(crate) github_url: String,
    pub(crate) data: JsonValue,
}

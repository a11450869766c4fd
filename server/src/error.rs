use std::fmt;

use anyhow::Error as AnyError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use courier_core::{LedgerError, StoreError};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy)]
struct ErrorDescriptor {
    status: StatusCode,
    default_message: &'static str,
}

const BAD_REQUEST_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    status: StatusCode::BAD_REQUEST,
    default_message: "Bad request.",
};

const NOT_FOUND_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    status: StatusCode::NOT_FOUND,
    default_message: "Resource not found.",
};

const CONFLICT_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    status: StatusCode::CONFLICT,
    default_message: "Resource already exists.",
};

const PAYLOAD_TOO_LARGE_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    status: StatusCode::PAYLOAD_TOO_LARGE,
    default_message: "Upload exceeds the size limit.",
};

const INTERNAL_SERVER_ERROR_DESCRIPTOR: ErrorDescriptor = ErrorDescriptor {
    status: StatusCode::INTERNAL_SERVER_ERROR,
    default_message: "An internal error occurred.",
};

/// Error returned by every handler. Renders as
/// `{"success": false, "error": <message>}` plus an optional `timestamp`.
#[derive(Debug)]
pub struct AppError {
    descriptor: &'static ErrorDescriptor,
    message: String,
    timestamp: Option<DateTime<Utc>>,
    source: Option<AnyError>,
}

impl AppError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::from_descriptor(&BAD_REQUEST_DESCRIPTOR, Some(message.into()))
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::from_descriptor(&NOT_FOUND_DESCRIPTOR, Some(message.into()))
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::from_descriptor(&CONFLICT_DESCRIPTOR, Some(message.into()))
    }

    pub(crate) fn payload_too_large(message: impl Into<String>) -> Self {
        Self::from_descriptor(&PAYLOAD_TOO_LARGE_DESCRIPTOR, Some(message.into()))
    }

    /// Remote store failures are surfaced with their message; the caller can
    /// tell a lost race from an outage by reading it.
    pub(crate) fn remote_store(error: StoreError) -> Self {
        error!(?error, "remote store request failed");
        let message = error.to_string();
        Self::from_descriptor(&INTERNAL_SERVER_ERROR_DESCRIPTOR, Some(message))
            .with_source(AnyError::new(error))
    }

    pub(crate) fn with_timestamp(mut self) -> Self {
        self.timestamp = Some(Utc::now());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.descriptor.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn into_payload(self) -> (StatusCode, ErrorPayload) {
        let AppError {
            descriptor,
            message,
            timestamp,
            source: _,
        } = self;

        let payload = ErrorPayload {
            success: false,
            error: message,
            timestamp: timestamp.map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        };

        (descriptor.status, payload)
    }

    fn from_descriptor(descriptor: &'static ErrorDescriptor, message: Option<String>) -> Self {
        Self {
            descriptor,
            message: message.unwrap_or_else(|| descriptor.default_message.to_owned()),
            timestamp: None,
            source: None,
        }
    }

    fn with_source(mut self, error: AnyError) -> Self {
        self.source = Some(error);
        self
    }
}

impl From<LedgerError> for AppError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Validation(message) => Self::bad_request(message),
            LedgerError::Conflict(key) => {
                warn!(roll_number = %key, "rejected duplicate ledger record");
                Self::conflict(LedgerError::Conflict(key).to_string())
            }
            LedgerError::RemoteStore(error) => Self::remote_store(error),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = self.source.as_deref()?;
        Some(source)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = self.into_payload();
        (status, Json(payload)).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ErrorPayload {
    pub(crate) success: bool,
    pub(crate) error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) timestamp: Option<String>,
}

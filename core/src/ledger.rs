//! Append-only evaluator ledger kept as a single JSON document in a
//! [`DocumentStore`].
//!
//! Every append is a full read-modify-write: fetch the document and its
//! version token, reject duplicate roll numbers, append, then write back
//! conditioned on the token. A write that loses a race against another
//! client is retried from the fetch, up to [`RetryPolicy::max_attempts`].

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::document::{DocumentLocation, DocumentStore, DocumentWrite, StoreError};

/// Field names accepted for the roll number, in lookup priority order.
pub const ROLL_NUMBER_ALIASES: [&str; 3] = ["rollNo", "rollNumber", "roll_no"];

pub const MISSING_BODY_MESSAGE: &str = "Request body is missing";
pub const NOT_AN_OBJECT_MESSAGE: &str = "Request body must be a JSON object";
pub const MISSING_ROLL_NUMBER_MESSAGE: &str = "Evaluator roll number is required";
pub const CONFLICTING_ROLL_NUMBERS_MESSAGE: &str =
    "Evaluator roll number fields must agree when more than one is given";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("Evaluator with roll number '{0}' already exists")]
    Conflict(RollNumber),
    #[error(transparent)]
    RemoteStore(#[from] StoreError),
}

/// Normalised logical key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RollNumber(String);

impl RollNumber {
    /// Strings are trimmed, numbers use their JSON text; anything else (or an
    /// empty result) is not a key.
    pub fn from_value(value: &Value) -> Option<Self> {
        let text = match value {
            Value::String(text) => text.trim().to_owned(),
            Value::Number(number) => number.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RollNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One caller-supplied ledger entry, kept verbatim (including field order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn from_value(value: Value) -> Result<Self, LedgerError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(LedgerError::Validation(NOT_AN_OBJECT_MESSAGE.to_owned())),
        }
    }

    /// Parse a request body. Empty or whitespace-only input is "missing".
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(LedgerError::Validation(MISSING_BODY_MESSAGE.to_owned()));
        }
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|_| LedgerError::Validation(NOT_AN_OBJECT_MESSAGE.to_owned()))?;
        if value.is_null() {
            return Err(LedgerError::Validation(MISSING_BODY_MESSAGE.to_owned()));
        }
        Self::from_value(value)
    }

    /// The record's single logical key. Every populated alias must carry the
    /// same value; a record naming two different keys could otherwise slip a
    /// duplicate past [`Ledger::contains`].
    pub fn roll_number(&self) -> Result<RollNumber, LedgerError> {
        let mut keys = self.roll_numbers();
        let key = keys
            .next()
            .ok_or_else(|| LedgerError::Validation(MISSING_ROLL_NUMBER_MESSAGE.to_owned()))?;
        if keys.any(|other| other != key) {
            return Err(LedgerError::Validation(
                CONFLICTING_ROLL_NUMBERS_MESSAGE.to_owned(),
            ));
        }
        Ok(key)
    }

    /// Every key the record carries, one per populated alias.
    fn roll_numbers(&self) -> impl Iterator<Item = RollNumber> + '_ {
        ROLL_NUMBER_ALIASES
            .iter()
            .filter_map(|alias| self.0.get(*alias))
            .filter_map(RollNumber::from_value)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Decoded ledger document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    records: Vec<Record>,
}

impl Ledger {
    pub fn decode(content: &[u8]) -> Result<Self, StoreError> {
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let records: Vec<Record> = serde_json::from_slice(content).map_err(|err| {
            StoreError::Decode(format!("ledger is not a JSON array of objects: {err}"))
        })?;
        Ok(Self { records })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let mut bytes = serde_json::to_vec_pretty(&self.records)
            .map_err(|err| StoreError::Decode(format!("failed to encode ledger: {err}")))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// True when any alias of any existing record equals `key`.
    pub fn contains(&self, key: &RollNumber) -> bool {
        self.records
            .iter()
            .any(|record| record.roll_numbers().any(|existing| &existing == key))
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Bounded exponential backoff applied to stale-precondition retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// No retries: a lost race surfaces immediately.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_attempts(max_attempts: usize) -> Self {
        Self::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_secs(2),
        )
    }

    fn delay_after(&self, attempt: usize) -> Duration {
        let exp = 2_u32.saturating_pow(attempt.saturating_sub(1) as u32);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_attempts(3)
    }
}

#[derive(Debug, Clone)]
pub struct AppendReceipt {
    pub location: DocumentLocation,
    pub record: Record,
    pub ledger_len: usize,
    pub attempts: usize,
}

pub struct LedgerSync {
    store: Arc<dyn DocumentStore>,
    path: String,
    retry: RetryPolicy,
}

impl LedgerSync {
    pub fn new(store: Arc<dyn DocumentStore>, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn append(&self, record: Record) -> Result<AppendReceipt, LedgerError> {
        let key = record.roll_number()?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_append(&record, &key).await {
                Ok((location, ledger_len)) => {
                    info!(
                        path = %self.path,
                        roll_number = %key,
                        ledger_len,
                        attempt,
                        "appended record to ledger"
                    );
                    return Ok(AppendReceipt {
                        location,
                        record,
                        ledger_len,
                        attempts: attempt,
                    });
                }
                Err(LedgerError::RemoteStore(err))
                    if err.is_stale() && attempt < self.retry.max_attempts =>
                {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        path = %self.path,
                        roll_number = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "ledger changed during append; retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_append(
        &self,
        record: &Record,
        key: &RollNumber,
    ) -> Result<(DocumentLocation, usize), LedgerError> {
        let current = self.store.get_document(&self.path).await?;
        let (mut ledger, version) = match current {
            Some(document) => (Ledger::decode(&document.content)?, Some(document.version)),
            None => {
                debug!(path = %self.path, "ledger document absent; creating");
                (Ledger::default(), None)
            }
        };

        if ledger.contains(key) {
            return Err(LedgerError::Conflict(key.clone()));
        }

        ledger.push(record.clone());
        let content = ledger.encode()?;
        let message = format!("Add evaluator {key}");
        let write = match version {
            Some(version) => DocumentWrite::replace(content, message, version),
            None => DocumentWrite::create(content, message),
        };

        let location = self.store.put_document(&self.path, write).await?;
        Ok((location, ledger.len()))
    }
}

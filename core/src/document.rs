use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Optimistic-concurrency token handed out with a stored document.
///
/// For the GitHub contents API this is the blob SHA of the file; the
/// in-memory store uses a monotonically increasing revision number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current content of a document together with the token guarding its next write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub content: Vec<u8>,
    pub version: VersionToken,
}

/// Where a successful write landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub path: String,
    pub html_url: Option<String>,
    pub version: Option<VersionToken>,
}

impl DocumentLocation {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            html_url: None,
            version: None,
        }
    }

    pub fn with_html_url(mut self, url: impl Into<String>) -> Self {
        self.html_url = Some(url.into());
        self
    }

    pub fn with_version(mut self, version: VersionToken) -> Self {
        self.version = Some(version);
        self
    }

    /// Browser-facing URL when the store reports one, the bare path otherwise.
    pub fn url(&self) -> &str {
        self.html_url.as_deref().unwrap_or(&self.path)
    }
}

/// A full-document write. `expected_version: None` means "create".
#[derive(Debug, Clone)]
pub struct DocumentWrite {
    pub content: Vec<u8>,
    pub message: String,
    pub expected_version: Option<VersionToken>,
}

impl DocumentWrite {
    pub fn create(content: Vec<u8>, message: impl Into<String>) -> Self {
        Self {
            content,
            message: message.into(),
            expected_version: None,
        }
    }

    pub fn replace(content: Vec<u8>, message: impl Into<String>, version: VersionToken) -> Self {
        Self {
            content,
            message: message.into(),
            expected_version: Some(version),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {path} was modified by a concurrent writer")]
    StaleVersion { path: String },
    #[error("remote store did not respond within {0:?}")]
    Timeout(Duration),
    #[error("remote store responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote store request failed: {0}")]
    Transport(String),
    #[error("remote store returned unreadable content: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::StaleVersion { .. })
    }
}

/// Narrow view of a versioned document host.
///
/// Implementations must make `put_document` all-or-nothing and must reject a
/// write whose `expected_version` no longer matches (or which expects no
/// document while one exists) with [`StoreError::StaleVersion`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, path: &str) -> Result<Option<StoredDocument>, StoreError>;

    async fn put_document(
        &self,
        path: &str,
        write: DocumentWrite,
    ) -> Result<DocumentLocation, StoreError>;
}

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::document::{DocumentLocation, DocumentStore, DocumentWrite, StoreError};

const FALLBACK_FILE_NAME: &str = "upload";

/// Forwards uploaded files to the document store under a timestamped path.
pub struct UploadRelay {
    store: Arc<dyn DocumentStore>,
    directory: String,
}

impl UploadRelay {
    pub fn new(store: Arc<dyn DocumentStore>, directory: impl Into<String>) -> Self {
        Self {
            store,
            directory: directory.into(),
        }
    }

    pub async fn relay(
        &self,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<DocumentLocation, StoreError> {
        let path = upload_path(&self.directory, file_name, Utc::now().timestamp_millis());
        let size = content.len();
        let location = self
            .store
            .put_document(
                &path,
                DocumentWrite::create(content, format!("Upload {file_name}")),
            )
            .await?;
        info!(%path, size, url = %location.url(), "relayed upload");
        Ok(location)
    }
}

/// `<directory>/<millis>_<sanitized name>`; the directory may be empty.
pub fn upload_path(directory: &str, file_name: &str, millis: i64) -> String {
    let name = format!("{millis}_{}", sanitize_file_name(file_name));
    if directory.is_empty() {
        name
    } else {
        format!("{directory}/{name}")
    }
}

/// Keep only the last path component and replace anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => ch,
            _ => '_',
        })
        .collect();

    if cleaned.trim_matches(['.', '_']).is_empty() {
        FALLBACK_FILE_NAME.to_owned()
    } else {
        cleaned
    }
}

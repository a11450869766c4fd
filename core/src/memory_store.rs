use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::document::{
    DocumentLocation, DocumentStore, DocumentWrite, StoreError, StoredDocument, VersionToken,
};

/// Naive in-memory document store used for local development and tests.
///
/// Besides the plain store it can inject faults: queued failures for the
/// next read or write, and a write that "another client" slips in right before the
/// next `put_document` evaluates its precondition.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Entry>>,
    injected_read_failures: Mutex<VecDeque<InjectedFailure>>,
    injected_write_failures: Mutex<VecDeque<InjectedFailure>>,
    interleaved_writes: Mutex<VecDeque<(String, Vec<u8>)>>,
    writes: AtomicUsize,
}

#[derive(Clone)]
struct Entry {
    content: Vec<u8>,
    revision: u64,
}

/// Failure modes that can be queued on the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Unavailable,
    Timeout,
}

impl InjectedFailure {
    fn into_error(self) -> StoreError {
        match self {
            InjectedFailure::Unavailable => StoreError::Status {
                status: 503,
                body: "service unavailable".to_owned(),
            },
            InjectedFailure::Timeout => StoreError::Timeout(std::time::Duration::from_secs(0)),
        }
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` at `path` directly, bypassing preconditions.
    pub async fn seed(&self, path: &str, content: impl Into<Vec<u8>>) {
        let mut documents = self.documents.write().await;
        Self::overwrite(&mut documents, path, content.into());
    }

    pub async fn content(&self, path: &str) -> Option<Vec<u8>> {
        let documents = self.documents.read().await;
        documents.get(path).map(|entry| entry.content.clone())
    }

    /// Number of successful `put_document` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn fail_next_read(&self, failure: InjectedFailure) {
        self.injected_read_failures.lock().await.push_back(failure);
    }

    pub async fn fail_next_write(&self, failure: InjectedFailure) {
        self.injected_write_failures.lock().await.push_back(failure);
    }

    /// Simulate another client updating `path` between our fetch and our write.
    pub async fn interleave_write(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.interleaved_writes
            .lock()
            .await
            .push_back((path.to_owned(), content.into()));
    }

    fn overwrite(documents: &mut HashMap<String, Entry>, path: &str, content: Vec<u8>) -> u64 {
        let revision = documents
            .get(path)
            .map(|entry| entry.revision + 1)
            .unwrap_or(1);
        documents.insert(path.to_owned(), Entry { content, revision });
        revision
    }

    fn token(revision: u64) -> VersionToken {
        VersionToken::new(format!("rev-{revision}"))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, path: &str) -> Result<Option<StoredDocument>, StoreError> {
        if let Some(failure) = self.injected_read_failures.lock().await.pop_front() {
            return Err(failure.into_error());
        }

        let documents = self.documents.read().await;
        Ok(documents.get(path).map(|entry| StoredDocument {
            content: entry.content.clone(),
            version: Self::token(entry.revision),
        }))
    }

    async fn put_document(
        &self,
        path: &str,
        write: DocumentWrite,
    ) -> Result<DocumentLocation, StoreError> {
        if let Some(failure) = self.injected_write_failures.lock().await.pop_front() {
            return Err(failure.into_error());
        }

        let interleaved = self.interleaved_writes.lock().await.pop_front();

        let mut documents = self.documents.write().await;
        if let Some((other_path, content)) = interleaved {
            debug!(path = %other_path, "applying interleaved concurrent write");
            Self::overwrite(&mut documents, &other_path, content);
        }

        let current = documents.get(path).map(|entry| Self::token(entry.revision));
        if current != write.expected_version {
            return Err(StoreError::StaleVersion {
                path: path.to_owned(),
            });
        }

        let revision = Self::overwrite(&mut documents, path, write.content);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(DocumentLocation::new(path)
            .with_html_url(format!("memory://{path}"))
            .with_version(Self::token(revision)))
    }
}

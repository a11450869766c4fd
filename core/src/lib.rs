pub mod config;
pub mod document;
pub mod ledger;
pub mod memory_store;
pub mod upload;

pub use config::AppConfig;
pub use document::{
    DocumentLocation, DocumentStore, DocumentWrite, StoreError, StoredDocument, VersionToken,
};
pub use ledger::{LedgerError, LedgerSync, Record, RetryPolicy};
pub use memory_store::InMemoryDocumentStore;
pub use upload::UploadRelay;

use std::sync::Arc;

use courier_core::{AppConfig, DocumentStore, LedgerSync, RetryPolicy, UploadRelay};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ledger: Arc<LedgerSync>,
    pub uploads: Arc<UploadRelay>,
}

/// Wire the request-path services around one shared document store.
pub fn build_state(config: Arc<AppConfig>, store: Arc<dyn DocumentStore>) -> AppState {
    let ledger = LedgerSync::new(store.clone(), config.ledger_path.clone())
        .with_retry(RetryPolicy::with_attempts(config.append_attempts));
    let uploads = UploadRelay::new(store, config.upload_dir.clone());

    AppState {
        config,
        ledger: Arc::new(ledger),
        uploads: Arc::new(uploads),
    }
}

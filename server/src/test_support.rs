#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::Router;
use courier_core::{AppConfig, InMemoryDocumentStore};
use tokio::net::TcpListener;

use crate::state::{AppState, build_state};

pub(crate) const TEST_ORIGIN: &str = "https://coodecrafters.github.io";
pub(crate) const TEST_LEDGER_PATH: &str = "evaluations/evaluators.json";

pub(crate) fn test_config_with(overrides: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = [
        ("GITHUB_TOKEN", "test-token"),
        ("GITHUB_OWNER", "octo"),
        ("GITHUB_REPO", "ledger"),
        ("RENDER_ENDPOINT", "http://127.0.0.1:9"),
        ("LEDGER_APPEND_ATTEMPTS", "1"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_owned(), value.to_owned()))
    .collect();
    for (key, value) in overrides {
        vars.insert((*key).to_owned(), (*value).to_owned());
    }

    AppConfig::from_lookup(|name| vars.get(name).cloned()).expect("build test config")
}

pub(crate) fn test_config() -> AppConfig {
    test_config_with(&[])
}

pub(crate) fn setup_state_with(config: AppConfig) -> (Arc<InMemoryDocumentStore>, AppState) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let state = build_state(Arc::new(config), store.clone());
    (store, state)
}

pub(crate) fn setup_state() -> (Arc<InMemoryDocumentStore>, AppState) {
    setup_state_with(test_config())
}

/// Serve `router` on an ephemeral loopback port for the rest of the test.
pub(crate) async fn spawn_http(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve test app");
    });
    addr
}

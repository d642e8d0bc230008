//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Append-only log shared between process bodies and the test.
#[derive(Clone, Default)]
pub struct Log<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Log<T> {
    pub fn new() -> Self {
        Log(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, item: T) {
        self.0.lock().push(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.0.lock().clone()
    }
}

//! Shared helpers for the library integration tests.

#![allow(dead_code)]

use modeldeck_abstraction::{InMemoryCatalog, InMemoryTransferEngine};
use modeldeck_library::{DownloadLifecycleCoordinator, LibraryConfig, LibraryError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(2);

/// Installs a test-writer subscriber once per binary. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "modeldeck_library=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A coordinator over in-memory collaborators.
pub struct Harness {
    pub engine: Arc<InMemoryTransferEngine>,
    pub catalog: Arc<InMemoryCatalog>,
    pub coordinator: DownloadLifecycleCoordinator,
    pub errors: broadcast::Receiver<LibraryError>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let engine = Arc::new(InMemoryTransferEngine::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let coordinator =
            DownloadLifecycleCoordinator::new(engine.clone(), &LibraryConfig::default());
        let errors = coordinator.subscribe_errors();
        Self { engine, catalog, coordinator, errors }
    }

    /// Every error event received so far.
    pub fn drain_errors(&mut self) -> Vec<LibraryError> {
        drain(&mut self.errors)
    }

    /// Waits for the next error event.
    ///
    /// # Panics
    /// Panics if none arrives within [`WAIT`].
    pub async fn next_error(&mut self) -> LibraryError {
        tokio::time::timeout(WAIT, self.errors.recv())
            .await
            .expect("no error event arrived")
            .expect("error channel closed")
    }
}

/// Every value currently buffered in `rx`.
pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut values = Vec::new();
    while let Ok(value) = rx.try_recv() {
        values.push(value);
    }
    values
}

/// Polls `condition` until it holds.
///
/// # Panics
/// Panics if it does not hold within [`WAIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

//! Model library core for ModelDeck.
//!
//! Coordinates model downloads against a [`TransferEngine`], keeps one
//! monitor per download task, derives the library screen's sections from the
//! catalog and the task list, and imports models discovered on the Hugging
//! Face hub. Failures surface as [`LibraryError`] events; only cancellation
//! and configuration problems are returned to callers.
//!
//! [`TransferEngine`]: modeldeck_abstraction::TransferEngine

pub mod aggregator;
pub mod busy;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod filters;
pub mod import;
pub mod monitor;

pub use aggregator::{
    LibraryContent, LibraryDownloadItem, LibraryPartition, LibrarySections, LibrarySummary,
    LibraryViewAggregator, derive_library_content,
};
pub use busy::{BusyGuard, BusySignalCounter};
pub use config::{ConfigError, EventsConfig, ImportConfig, LibraryConfig};
pub use coordinator::DownloadLifecycleCoordinator;
pub use error::{LibraryCoreError, Result};
pub use events::{ErrorEventChannel, LibraryError};
pub use filters::{HuggingFaceSort, LibraryFilterState, LibraryTab, ModelSort};
pub use import::{
    ExternalCatalogImportPipeline, HuggingFaceConverter, HuggingFaceModelSummary, ImportOutcome,
    PackageConverter,
};
pub use monitor::TaskMonitorRegistry;

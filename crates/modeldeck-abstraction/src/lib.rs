//! Collaborator abstraction layer for ModelDeck.
//!
//! This crate defines the boundary between the model library core and the
//! systems it drives: the transfer engine that moves bytes and the model
//! catalog that owns package metadata.

pub mod memory;
pub mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{CatalogOperation, EngineOperation, InMemoryCatalog, InMemoryTransferEngine};
pub use types::{
    DeliveryType, DownloadStatus, DownloadTask, InstallState, ModelPackage, ProviderType, TaskId,
};

/// Represents a failure reported by a collaborator (transfer engine or catalog).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollaboratorError {
    /// The operation ran and reported a structured failure.
    #[error("{0}")]
    Failed(String),

    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A transport-level failure (connectivity, I/O).
    #[error("Network error: {0}")]
    Network(String),

    /// The collaborator was in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The caller supplied an argument the collaborator rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,
}

impl CollaboratorError {
    /// Returns `true` when this error represents cooperative cancellation.
    ///
    /// Cancellation must be propagated, never reported to the user.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the raw message carried by the error, without any prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Failed(m)
            | Self::NotFound(m)
            | Self::Network(m)
            | Self::InvalidState(m)
            | Self::InvalidArgument(m) => m,
            Self::Cancelled => "",
        }
    }

    /// Returns the raw message, or `fallback` when the message is blank.
    #[must_use]
    pub fn message_or(&self, fallback: &str) -> String {
        let message = self.message().trim();
        if message.is_empty() { fallback.to_string() } else { message.to_string() }
    }
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// The external engine that performs downloads and persists partial state.
///
/// All engines must be `Send + Sync` so a single instance can be shared by
/// every concurrent command.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Starts a download for `model_id`, or queues it behind other work.
    ///
    /// # Returns
    /// The identifier of the task tracking this download.
    async fn start_or_queue(&self, model_id: &str) -> CollaboratorResult<TaskId>;

    /// Pauses a running or queued task.
    async fn pause(&self, task_id: &TaskId) -> CollaboratorResult<()>;

    /// Resumes a paused task.
    async fn resume(&self, task_id: &TaskId) -> CollaboratorResult<()>;

    /// Cancels a task.
    async fn cancel(&self, task_id: &TaskId) -> CollaboratorResult<()>;

    /// Retries a failed task, starting a fresh lifecycle under the same identifier.
    async fn retry(&self, task_id: &TaskId) -> CollaboratorResult<()>;

    /// Removes the downloaded artifacts of a model.
    async fn delete_model(&self, model_id: &str) -> CollaboratorResult<()>;

    /// Observes a single task. Yields `None` while the task is unknown.
    fn observe_task(&self, task_id: &TaskId) -> BoxStream<'static, Option<DownloadTask>>;

    /// Observes every task the engine knows about.
    fn observe_all_tasks(&self) -> BoxStream<'static, Vec<DownloadTask>>;

    /// Observes the progress fraction (0.0 to 1.0) of a task.
    fn observe_progress(&self, task_id: &TaskId) -> BoxStream<'static, f32>;
}

/// The model catalog that owns `ModelPackage` metadata.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Looks up a model by identifier.
    async fn get_model(&self, model_id: &str) -> CollaboratorResult<Option<ModelPackage>>;

    /// Inserts or replaces a model.
    async fn upsert_model(&self, package: ModelPackage) -> CollaboratorResult<()>;

    /// Snapshot of every model currently stored.
    async fn get_all_models(&self) -> CollaboratorResult<Vec<ModelPackage>>;

    /// Re-syncs the catalog with its remote source. Observers see the result
    /// through [`observe_all_models`](Self::observe_all_models).
    async fn refresh(&self) -> CollaboratorResult<()>;

    /// Observes the full catalog.
    fn observe_all_models(&self) -> BoxStream<'static, Vec<ModelPackage>>;

    /// Observes installed models only.
    fn observe_installed_models(&self) -> BoxStream<'static, Vec<ModelPackage>>;
}

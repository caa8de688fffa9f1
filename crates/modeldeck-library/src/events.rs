//! User-facing error events.
//!
//! Every reported failure is published once on a broadcast channel. Delivery
//! is live only: a receiver sees the events sent after it subscribed, and a
//! send with no subscribers is dropped.

use modeldeck_abstraction::TaskId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// A failure ready for direct display.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LibraryError {
    /// A download could not be started, failed while running, or an import stopped.
    #[error("Download of {model_id} failed: {message}")]
    DownloadFailed {
        /// Model the download belongs to.
        model_id: String,
        /// Human-readable reason.
        message: String,
    },

    /// Pausing a task failed.
    #[error("Pause of task {task_id} failed: {message}")]
    PauseFailed {
        /// Task the command targeted.
        task_id: TaskId,
        /// Human-readable reason.
        message: String,
    },

    /// Resuming a task failed.
    #[error("Resume of task {task_id} failed: {message}")]
    ResumeFailed {
        /// Task the command targeted.
        task_id: TaskId,
        /// Human-readable reason.
        message: String,
    },

    /// Cancelling a task failed.
    #[error("Cancel of task {task_id} failed: {message}")]
    CancelFailed {
        /// Task the command targeted.
        task_id: TaskId,
        /// Human-readable reason.
        message: String,
    },

    /// Retrying a task failed.
    #[error("Retry of task {task_id} failed: {message}")]
    RetryFailed {
        /// Task the command targeted.
        task_id: TaskId,
        /// Human-readable reason.
        message: String,
    },

    /// Deleting a model's artifacts failed.
    #[error("Delete of {model_id} failed: {message}")]
    DeleteFailed {
        /// Model the command targeted.
        model_id: String,
        /// Human-readable reason.
        message: String,
    },

    /// A bracketed operation panicked.
    #[error("Unexpected error: {message}")]
    UnexpectedError {
        /// Panic message, or a generic fallback.
        message: String,
    },

    /// The model catalog could not be loaded or refreshed.
    #[error("Catalog load failed: {message}")]
    CatalogLoadFailed {
        /// Human-readable reason.
        message: String,
    },

    /// The Hugging Face listing could not be loaded.
    #[error("Hugging Face load failed: {message}")]
    HuggingFaceLoadFailed {
        /// Human-readable reason.
        message: String,
    },
}

impl LibraryError {
    /// The message shown to the user.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::DownloadFailed { message, .. }
            | Self::PauseFailed { message, .. }
            | Self::ResumeFailed { message, .. }
            | Self::CancelFailed { message, .. }
            | Self::RetryFailed { message, .. }
            | Self::DeleteFailed { message, .. }
            | Self::UnexpectedError { message }
            | Self::CatalogLoadFailed { message }
            | Self::HuggingFaceLoadFailed { message } => message,
        }
    }
}

/// Broadcast fan-in for [`LibraryError`] events.
#[derive(Debug, Clone)]
pub struct ErrorEventChannel {
    broadcast_tx: broadcast::Sender<LibraryError>,
}

impl ErrorEventChannel {
    /// Creates a channel buffering `capacity` events per subscriber.
    ///
    /// # Panics
    /// Panics if `capacity` is 0. `LibraryConfig::validate` rejects that value.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self { broadcast_tx }
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LibraryError> {
        self.broadcast_tx.subscribe()
    }

    /// Publishes an event to every current subscriber.
    pub fn emit(&self, error: LibraryError) {
        warn!(error = %error, "Library error");
        // No subscribers is not a failure.
        let _ = self.broadcast_tx.send(error);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }
}

//! Import of models discovered in an external catalog.
//!
//! The pipeline runs four stages and stops at the first one that fails:
//! convert, duplicate check, catalog upsert, download start. Each stage
//! reports its own failure as `DownloadFailed`. Transport, state and argument
//! errors from any stage are reported once at the pipeline boundary with a
//! category prefix. Cancellation is returned, never reported.

pub mod convert;
pub mod options;
pub mod summary;

pub use convert::{
    CompatibilityChecker, HuggingFaceConverter, PackageConverter, RuntimeCompatibilityChecker,
};
pub use options::{
    downloadable_model_ids, library_options, pipeline_options, visible_tags, with_visible_tags,
};
pub use summary::HuggingFaceModelSummary;

use crate::coordinator::DownloadLifecycleCoordinator;
use crate::error::{LibraryCoreError, Result};
use crate::events::LibraryError;
use modeldeck_abstraction::{CollaboratorError, ModelCatalog, ModelPackage, TaskId};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const INCOMPATIBLE: &str = "Model is not compatible with local runtimes";
const ALREADY_EXISTS: &str = "Model already exists in catalog";
const NETWORK_PREFIX: &str = "Network error while processing Hugging Face model: ";
const STATE_PREFIX: &str = "Failed to process Hugging Face model: ";
const ARGUMENT_PREFIX: &str = "Invalid Hugging Face model metadata: ";

/// How an import ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The download was queued.
    Started(TaskId),
    /// No local runtime supports the model.
    Incompatible,
    /// The catalog already has the converted model.
    AlreadyExists,
    /// The catalog refused the new package.
    CatalogWriteFailed,
    /// The coordinator could not start the download.
    DownloadNotStarted,
    /// A transport, state or argument error stopped the import.
    Rejected,
}

/// Stage result: a terminal outcome, or an error for the boundary to classify.
type StageResult<T> = std::result::Result<T, StageExit>;

enum StageExit {
    Done(ImportOutcome),
    Boundary(CollaboratorError),
    Cancelled,
}

impl From<CollaboratorError> for StageExit {
    fn from(error: CollaboratorError) -> Self {
        if error.is_cancellation() { Self::Cancelled } else { Self::Boundary(error) }
    }
}

/// Four-stage import of external catalog entries.
#[derive(Clone)]
pub struct ExternalCatalogImportPipeline {
    converter: Arc<dyn PackageConverter>,
    catalog: Arc<dyn ModelCatalog>,
    coordinator: DownloadLifecycleCoordinator,
}

impl fmt::Debug for ExternalCatalogImportPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalCatalogImportPipeline")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl ExternalCatalogImportPipeline {
    /// Creates a pipeline that reports through `coordinator`'s error channel.
    #[must_use]
    pub fn new(
        converter: Arc<dyn PackageConverter>,
        catalog: Arc<dyn ModelCatalog>,
        coordinator: DownloadLifecycleCoordinator,
    ) -> Self {
        Self { converter, catalog, coordinator }
    }

    /// Runs the import in the coordinator's session.
    pub fn spawn(&self, summary: HuggingFaceModelSummary) -> JoinHandle<Result<ImportOutcome>> {
        let this = self.clone();
        self.coordinator.spawn_in_session(async move { this.process(&summary).await })
    }

    /// Runs the import.
    ///
    /// # Errors
    /// Returns `Cancelled` if a collaborator reported cancellation. Every
    /// other failure is reported on the error channel and returned as an
    /// [`ImportOutcome`].
    pub async fn process(&self, summary: &HuggingFaceModelSummary) -> Result<ImportOutcome> {
        debug!(model_id = %summary.model_id, "Importing external model");
        match self.run_stages(summary).await {
            Ok(task_id) => Ok(ImportOutcome::Started(task_id)),
            Err(StageExit::Done(outcome)) => Ok(outcome),
            Err(StageExit::Cancelled) => Err(LibraryCoreError::Cancelled),
            Err(StageExit::Boundary(error)) => {
                let prefix = match &error {
                    CollaboratorError::Network(_) => NETWORK_PREFIX,
                    CollaboratorError::InvalidArgument(_) => ARGUMENT_PREFIX,
                    _ => STATE_PREFIX,
                };
                self.report(&summary.model_id, format!("{prefix}{}", error.message()));
                Ok(ImportOutcome::Rejected)
            }
        }
    }

    async fn run_stages(&self, summary: &HuggingFaceModelSummary) -> StageResult<TaskId> {
        let package = self.convert(summary)?;
        self.ensure_new(&package).await?;
        self.add_to_catalog(&package).await?;
        self.start_download(&package.model_id).await
    }

    fn convert(&self, summary: &HuggingFaceModelSummary) -> StageResult<ModelPackage> {
        match self.converter.convert(summary)? {
            Some(package) => Ok(package),
            None => {
                self.report(&summary.model_id, INCOMPATIBLE.to_string());
                Err(StageExit::Done(ImportOutcome::Incompatible))
            }
        }
    }

    /// A lookup that fails outright is treated as "not in the catalog".
    async fn ensure_new(&self, package: &ModelPackage) -> StageResult<()> {
        match self.catalog.get_model(&package.model_id).await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => {
                self.report(&package.model_id, ALREADY_EXISTS.to_string());
                Err(StageExit::Done(ImportOutcome::AlreadyExists))
            }
            Err(error @ (CollaboratorError::Failed(_) | CollaboratorError::NotFound(_))) => {
                warn!(
                    model_id = %package.model_id,
                    error = %error,
                    "Catalog lookup failed; treating model as new"
                );
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn add_to_catalog(&self, package: &ModelPackage) -> StageResult<()> {
        match self.catalog.upsert_model(package.clone()).await {
            Ok(()) => Ok(()),
            Err(error @ (CollaboratorError::Failed(_) | CollaboratorError::NotFound(_))) => {
                self.report(
                    &package.model_id,
                    format!("Failed to add model to catalog: {}", error.message_or("Unknown error")),
                );
                Err(StageExit::Done(ImportOutcome::CatalogWriteFailed))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// The coordinator reports structured start failures and panics. Other
    /// collaborator errors go to the boundary like every other stage.
    async fn start_download(&self, model_id: &str) -> StageResult<TaskId> {
        let result = self
            .coordinator
            .queue_download_reporting(model_id, |error| {
                matches!(error, CollaboratorError::Failed(_) | CollaboratorError::NotFound(_))
            })
            .await;
        match result {
            Ok(task_id) => {
                info!(model_id = %model_id, task_id = %task_id, "External model imported");
                Ok(task_id)
            }
            Err(LibraryCoreError::Cancelled) => Err(StageExit::Cancelled),
            Err(LibraryCoreError::Operation(
                error @ (CollaboratorError::Network(_)
                | CollaboratorError::InvalidState(_)
                | CollaboratorError::InvalidArgument(_)),
            )) => Err(StageExit::Boundary(error)),
            Err(_) => Err(StageExit::Done(ImportOutcome::DownloadNotStarted)),
        }
    }

    fn report(&self, model_id: &str, message: String) {
        self.coordinator
            .errors()
            .emit(LibraryError::DownloadFailed { model_id: model_id.to_string(), message });
    }
}

//! Download lifecycle coordinator.
//!
//! Public command surface for downloads. Every command runs as a task in the
//! coordinator's session and reports failures on the error channel instead of
//! to the caller. `queue` and `delete_model` are bracketed by the busy signal;
//! `pause`, `resume`, `cancel` and `retry` are not. `refresh_catalog` is
//! bracketed only while the catalog is still empty, and at most one refresh
//! runs at a time.

use crate::busy::BusySignalCounter;
use crate::config::LibraryConfig;
use crate::error::{LibraryCoreError, Result};
use crate::events::{ErrorEventChannel, LibraryError};
use crate::monitor::{TaskMonitorRegistry, watch_task};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use modeldeck_abstraction::{
    CollaboratorError, CollaboratorResult, DownloadTask, ModelCatalog, TaskId, TransferEngine,
};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

const UNKNOWN_ERROR: &str = "Unknown error";
const UNEXPECTED_ERROR: &str = "Unexpected error";
const REFRESH_FAILED: &str = "Failed to refresh model catalog";

/// Commands that target an existing task and skip the busy bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskCommand {
    Pause,
    Resume,
    Cancel,
    Retry,
}

impl TaskCommand {
    fn fallback(self) -> &'static str {
        match self {
            Self::Pause => "Failed to pause",
            Self::Resume => "Failed to resume",
            Self::Cancel => "Failed to cancel",
            Self::Retry => "Failed to retry",
        }
    }

    fn failure(self, task_id: TaskId, message: String) -> LibraryError {
        match self {
            Self::Pause => LibraryError::PauseFailed { task_id, message },
            Self::Resume => LibraryError::ResumeFailed { task_id, message },
            Self::Cancel => LibraryError::CancelFailed { task_id, message },
            Self::Retry => LibraryError::RetryFailed { task_id, message },
        }
    }

    async fn run(self, engine: &dyn TransferEngine, task_id: &TaskId) -> CollaboratorResult<()> {
        match self {
            Self::Pause => engine.pause(task_id).await,
            Self::Resume => engine.resume(task_id).await,
            Self::Cancel => engine.cancel(task_id).await,
            Self::Retry => engine.retry(task_id).await,
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())?;
    if message.trim().is_empty() { None } else { Some(message) }
}

struct Inner {
    engine: Arc<dyn TransferEngine>,
    monitors: TaskMonitorRegistry,
    busy: Arc<BusySignalCounter>,
    errors: ErrorEventChannel,
    session: CancellationToken,
    tracker: TaskTracker,
    refreshing: watch::Sender<bool>,
}

/// Clears the refreshing flag when the refresh ends, by any path.
struct RefreshGuard {
    refreshing: watch::Sender<bool>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.refreshing.send_replace(false);
    }
}

/// Coordinates download commands, task monitors and the busy signal.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct DownloadLifecycleCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for DownloadLifecycleCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadLifecycleCoordinator")
            .field("monitors", &self.inner.monitors)
            .field("busy", &self.inner.busy)
            .field("cancelled", &self.inner.session.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl DownloadLifecycleCoordinator {
    /// Creates a coordinator with a fresh session.
    #[must_use]
    pub fn new(engine: Arc<dyn TransferEngine>, config: &LibraryConfig) -> Self {
        Self::with_session(engine, config, CancellationToken::new())
    }

    /// Creates a coordinator whose session ends when `session` is cancelled.
    ///
    /// Channel capacities below 1 are raised to 1; use
    /// [`LibraryConfig::validate`] to reject them instead.
    #[must_use]
    pub fn with_session(
        engine: Arc<dyn TransferEngine>,
        config: &LibraryConfig,
        session: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                monitors: TaskMonitorRegistry::new(),
                busy: Arc::new(BusySignalCounter::new(config.events.busy_capacity.max(1))),
                errors: ErrorEventChannel::new(config.events.error_capacity.max(1)),
                session,
                tracker: TaskTracker::new(),
                refreshing: watch::channel(false).0,
            }),
        }
    }

    /// Queues a download for `model_id` in the background.
    pub fn queue(&self, model_id: impl Into<String>) -> JoinHandle<Result<TaskId>> {
        let this = self.clone();
        let model_id = model_id.into();
        self.spawn_in_session(async move { this.queue_download(&model_id).await })
    }

    /// Pauses a task in the background.
    pub fn pause(&self, task_id: TaskId) -> JoinHandle<Result<()>> {
        self.spawn_task_command(TaskCommand::Pause, task_id)
    }

    /// Resumes a task in the background.
    pub fn resume(&self, task_id: TaskId) -> JoinHandle<Result<()>> {
        self.spawn_task_command(TaskCommand::Resume, task_id)
    }

    /// Cancels a task in the background.
    pub fn cancel(&self, task_id: TaskId) -> JoinHandle<Result<()>> {
        self.spawn_task_command(TaskCommand::Cancel, task_id)
    }

    /// Retries a failed task in the background.
    pub fn retry(&self, task_id: TaskId) -> JoinHandle<Result<()>> {
        self.spawn_task_command(TaskCommand::Retry, task_id)
    }

    /// Deletes a model's downloaded artifacts in the background.
    pub fn delete_model(&self, model_id: impl Into<String>) -> JoinHandle<Result<()>> {
        let this = self.clone();
        let model_id = model_id.into();
        self.spawn_in_session(async move { this.delete_downloaded_model(&model_id).await })
    }

    /// Asks the engine to start `model_id` and monitors the resulting task.
    ///
    /// Bracketed by the busy signal. A collaborator failure is reported as
    /// `DownloadFailed`, a panic as `UnexpectedError`. Cancellation is
    /// returned without a report.
    pub async fn queue_download(&self, model_id: &str) -> Result<TaskId> {
        self.queue_download_reporting(model_id, |_| true).await
    }

    /// Like [`queue_download`](Self::queue_download), but reports a
    /// collaborator failure only when `reports` accepts it. Unreported
    /// failures are returned as `Operation` for the caller to report.
    pub(crate) async fn queue_download_reporting(
        &self,
        model_id: &str,
        reports: impl Fn(&CollaboratorError) -> bool,
    ) -> Result<TaskId> {
        let _busy = self.inner.busy.begin();
        let outcome = AssertUnwindSafe(self.inner.engine.start_or_queue(model_id))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(task_id)) => {
                self.attach_monitor(task_id, model_id);
                info!(model_id = %model_id, task_id = %task_id, "Download queued");
                Ok(task_id)
            }
            Ok(Err(error)) if error.is_cancellation() => Err(LibraryCoreError::Cancelled),
            Ok(Err(error)) => {
                if reports(&error) {
                    self.inner.errors.emit(LibraryError::DownloadFailed {
                        model_id: model_id.to_string(),
                        message: error.message_or(UNKNOWN_ERROR),
                    });
                }
                Err(error.into())
            }
            Err(payload) => Err(self.report_unexpected(payload.as_ref())),
        }
    }

    /// Deletes the downloaded artifacts of `model_id`.
    ///
    /// Bracketed by the busy signal. A collaborator failure is reported as
    /// `DeleteFailed`, a panic as `UnexpectedError`.
    pub async fn delete_downloaded_model(&self, model_id: &str) -> Result<()> {
        let _busy = self.inner.busy.begin();
        let outcome =
            AssertUnwindSafe(self.inner.engine.delete_model(model_id)).catch_unwind().await;

        match outcome {
            Ok(Ok(())) => {
                info!(model_id = %model_id, "Model deleted");
                Ok(())
            }
            Ok(Err(error)) if error.is_cancellation() => Err(LibraryCoreError::Cancelled),
            Ok(Err(error)) => {
                self.inner.errors.emit(LibraryError::DeleteFailed {
                    model_id: model_id.to_string(),
                    message: error.message_or(UNKNOWN_ERROR),
                });
                Err(error.into())
            }
            Err(payload) => Err(self.report_unexpected(payload.as_ref())),
        }
    }

    /// Refreshes `catalog` in the background unless a refresh is already running.
    ///
    /// The handle resolves to `Ok(false)` when the call was skipped.
    pub fn refresh_catalog(&self, catalog: Arc<dyn ModelCatalog>) -> JoinHandle<Result<bool>> {
        let Some(guard) = self.begin_refresh() else {
            debug!("Catalog refresh already running");
            return self.spawn_in_session(async { Ok(false) });
        };
        let this = self.clone();
        self.spawn_in_session(async move {
            this.run_refresh(catalog.as_ref(), guard).await.map(|()| true)
        })
    }

    /// Refreshes `catalog` unless a refresh is already running.
    ///
    /// Bracketed by the busy signal only while the catalog is empty. A failure
    /// or panic is reported as `CatalogLoadFailed`.
    ///
    /// # Returns
    /// `false` if another refresh was running and this call did nothing.
    pub async fn refresh_model_catalog(&self, catalog: &dyn ModelCatalog) -> Result<bool> {
        let Some(guard) = self.begin_refresh() else {
            debug!("Catalog refresh already running");
            return Ok(false);
        };
        self.run_refresh(catalog, guard).await.map(|()| true)
    }

    /// Latest progress of `task_id`, starting at 0.0.
    pub fn observe_progress(&self, task_id: &TaskId) -> watch::Receiver<f32> {
        self.pump(self.inner.engine.observe_progress(task_id), 0.0)
    }

    /// Latest list of every task, starting empty.
    pub fn observe_tasks(&self) -> watch::Receiver<Vec<DownloadTask>> {
        self.pump(self.inner.engine.observe_all_tasks(), Vec::new())
    }

    /// Cancels the session and waits for every command and monitor to exit.
    pub async fn shutdown(&self) {
        debug!("Shutting down download coordinator");
        self.inner.session.cancel();
        self.inner.monitors.cancel_all();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Number of monitors currently attached.
    pub fn active_monitor_count(&self) -> usize {
        self.inner.monitors.len()
    }

    /// Returns `true` if a monitor is attached to `task_id`.
    pub fn is_monitoring(&self, task_id: &TaskId) -> bool {
        self.inner.monitors.contains(task_id)
    }

    /// Returns `true` while any bracketed operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.is_busy()
    }

    /// Returns `true` while a catalog refresh is running.
    pub fn is_refreshing(&self) -> bool {
        *self.inner.refreshing.borrow()
    }

    /// Watches the catalog refresh flag.
    pub fn watch_refreshing(&self) -> watch::Receiver<bool> {
        self.inner.refreshing.subscribe()
    }

    /// Returns `true` while a refresh or any bracketed operation is in flight.
    pub fn is_loading(&self) -> bool {
        self.is_refreshing() || self.is_busy()
    }

    /// Subscribes to busy edges.
    pub fn subscribe_busy(&self) -> broadcast::Receiver<bool> {
        self.inner.busy.subscribe()
    }

    /// Watches the busy level.
    pub fn watch_busy(&self) -> watch::Receiver<bool> {
        self.inner.busy.watch()
    }

    /// Subscribes to error events.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<LibraryError> {
        self.inner.errors.subscribe()
    }

    /// The error channel shared with sibling flows.
    pub fn errors(&self) -> &ErrorEventChannel {
        &self.inner.errors
    }

    /// The session token; cancelling it ends every command and monitor.
    pub fn session(&self) -> &CancellationToken {
        &self.inner.session
    }

    /// Runs `operation` as a tracked task that ends with `Cancelled` when the session does.
    pub(crate) fn spawn_in_session<T, F>(&self, operation: F) -> JoinHandle<Result<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let session = self.inner.session.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                biased;
                () = session.cancelled() => Err(LibraryCoreError::Cancelled),
                result = operation => result,
            }
        })
    }

    fn spawn_task_command(&self, command: TaskCommand, task_id: TaskId) -> JoinHandle<Result<()>> {
        let this = self.clone();
        self.spawn_in_session(async move { this.run_task_command(command, task_id).await })
    }

    async fn run_task_command(&self, command: TaskCommand, task_id: TaskId) -> Result<()> {
        let outcome =
            AssertUnwindSafe(command.run(self.inner.engine.as_ref(), &task_id)).catch_unwind().await;

        let message = match outcome {
            Ok(Ok(())) => {
                info!(task_id = %task_id, command = ?command, "Task command applied");
                return Ok(());
            }
            Ok(Err(error)) if error.is_cancellation() => return Err(LibraryCoreError::Cancelled),
            Ok(Err(error)) => {
                let message = error.message_or(command.fallback());
                self.inner.errors.emit(command.failure(task_id, message));
                return Err(error.into());
            }
            Err(payload) => panic_message(payload.as_ref())
                .unwrap_or_else(|| command.fallback().to_string()),
        };
        self.inner.errors.emit(command.failure(task_id, message.clone()));
        Err(LibraryCoreError::Unexpected(message))
    }

    fn report_unexpected(&self, payload: &(dyn Any + Send)) -> LibraryCoreError {
        let message = panic_message(payload).unwrap_or_else(|| UNEXPECTED_ERROR.to_string());
        self.inner.errors.emit(LibraryError::UnexpectedError { message: message.clone() });
        LibraryCoreError::Unexpected(message)
    }

    /// Claims the refreshing flag, or returns `None` if it is already held.
    fn begin_refresh(&self) -> Option<RefreshGuard> {
        let claimed = self.inner.refreshing.send_if_modified(|refreshing| {
            if *refreshing {
                false
            } else {
                *refreshing = true;
                true
            }
        });
        claimed.then(|| RefreshGuard { refreshing: self.inner.refreshing.clone() })
    }

    async fn run_refresh(&self, catalog: &dyn ModelCatalog, _guard: RefreshGuard) -> Result<()> {
        // A catalog that cannot be read counts as empty.
        let empty = catalog.get_all_models().await.map_or(true, |models| models.is_empty());
        let _busy = empty.then(|| self.inner.busy.begin());

        let outcome = AssertUnwindSafe(catalog.refresh()).catch_unwind().await;
        let (reason, error) = match outcome {
            Ok(Ok(())) => {
                info!("Model catalog refreshed");
                return Ok(());
            }
            Ok(Err(error)) if error.is_cancellation() => return Err(LibraryCoreError::Cancelled),
            Ok(Err(error)) => (error.message_or(""), LibraryCoreError::from(error)),
            Err(payload) => {
                let reason = panic_message(payload.as_ref()).unwrap_or_default();
                let error = LibraryCoreError::Unexpected(if reason.is_empty() {
                    UNEXPECTED_ERROR.to_string()
                } else {
                    reason.clone()
                });
                (reason, error)
            }
        };
        let message = if reason.is_empty() {
            REFRESH_FAILED.to_string()
        } else {
            format!("{REFRESH_FAILED}: {reason}")
        };
        self.inner.errors.emit(LibraryError::CatalogLoadFailed { message });
        Err(error)
    }

    fn attach_monitor(&self, task_id: TaskId, model_id: &str) {
        let monitor = watch_task(
            Arc::clone(&self.inner.engine),
            task_id,
            model_id.to_string(),
            self.inner.errors.clone(),
        );
        self.inner.monitors.attach(task_id, &self.inner.session, &self.inner.tracker, monitor);
    }

    /// Caches the latest item of `stream` until the session ends or every receiver is gone.
    fn pump<T>(&self, mut stream: BoxStream<'static, T>, initial: T) -> watch::Receiver<T>
    where
        T: Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel(initial);
        let session = self.inner.session.clone();
        self.inner.tracker.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = session.cancelled() => break,
                    () = tx.closed() => break,
                    next = stream.next() => match next {
                        Some(value) => {
                            tx.send_replace(value);
                        }
                        None => break,
                    },
                }
            }
        });
        rx
    }
}

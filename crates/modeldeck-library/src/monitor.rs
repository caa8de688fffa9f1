//! Per-task monitors.
//!
//! The registry keeps at most one monitor per task id. Attaching a monitor
//! for an id that already has one cancels the old monitor, and the new one
//! does not start watching until the old one has exited. Every monitor
//! removes its own entry when it stops, by any path.

use crate::events::{ErrorEventChannel, LibraryError};
use futures::StreamExt;
use modeldeck_abstraction::{DownloadStatus, TaskId, TransferEngine};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

const UNKNOWN_ERROR: &str = "Unknown error";

struct MonitorEntry {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<TaskId, MonitorEntry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<TaskId, MonitorEntry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of live task monitors, keyed by task id.
pub struct TaskMonitorRegistry {
    entries: Entries,
    next_generation: AtomicU64,
}

impl fmt::Debug for TaskMonitorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMonitorRegistry")
            .field("monitor_count", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for TaskMonitorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMonitorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), next_generation: AtomicU64::new(0) }
    }

    /// Attaches `monitor` to `task_id`, replacing any monitor already attached.
    ///
    /// The monitor runs on `tracker` under a child of `parent`, so cancelling
    /// `parent` stops it.
    ///
    /// # Returns
    /// Returns `true` if a previous monitor was replaced.
    pub fn attach<F>(
        &self,
        task_id: TaskId,
        parent: &CancellationToken,
        tracker: &TaskTracker,
        monitor: F,
    ) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        let run_token = token.clone();
        let cleanup = MonitorCleanup { entries: Arc::clone(&self.entries), task_id, generation };

        let mut entries = lock(&self.entries);
        let previous = entries.remove(&task_id).map(|entry| {
            entry.token.cancel();
            entry.handle
        });
        let replaced = previous.is_some();
        if replaced {
            debug!(task_id = %task_id, "Replacing task monitor");
        } else {
            debug!(task_id = %task_id, "Attaching task monitor");
        }

        let handle = tracker.spawn(async move {
            let _cleanup = cleanup;
            if let Some(previous) = previous {
                // Aborted or panicked monitors are finished either way.
                let _ = previous.await;
            }
            tokio::select! {
                biased;
                () = run_token.cancelled() => debug!(task_id = %task_id, "Task monitor cancelled"),
                () = monitor => {}
            }
        });
        entries.insert(task_id, MonitorEntry { generation, token, handle });
        replaced
    }

    /// Cancels every monitor.
    pub fn cancel_all(&self) {
        for entry in lock(&self.entries).values() {
            entry.token.cancel();
        }
    }

    /// Returns `true` if a monitor is attached to `task_id`.
    pub fn contains(&self, task_id: &TaskId) -> bool {
        lock(&self.entries).contains_key(task_id)
    }

    /// Number of attached monitors.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns `true` if no monitor is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a monitor's entry on exit, unless a newer monitor took its place.
struct MonitorCleanup {
    entries: Entries,
    task_id: TaskId,
    generation: u64,
}

impl Drop for MonitorCleanup {
    fn drop(&mut self) {
        let mut entries = lock(&self.entries);
        if entries.get(&self.task_id).is_some_and(|entry| entry.generation == self.generation) {
            entries.remove(&self.task_id);
            debug!(task_id = %self.task_id, "Task monitor removed");
        }
    }
}

/// Watches one task until it reaches a terminal status.
///
/// A failed task is reported once as `DownloadFailed` for `model_id`.
/// Completed and cancelled tasks end the watch silently, as does the end of
/// the engine's stream.
pub(crate) async fn watch_task(
    engine: Arc<dyn TransferEngine>,
    task_id: TaskId,
    model_id: String,
    errors: ErrorEventChannel,
) {
    let mut updates = engine.observe_task(&task_id);
    while let Some(update) = updates.next().await {
        let Some(task) = update else {
            continue;
        };
        match task.status {
            DownloadStatus::Failed => {
                let message = task
                    .error_message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                errors.emit(LibraryError::DownloadFailed { model_id, message });
                return;
            }
            DownloadStatus::Completed | DownloadStatus::Cancelled => {
                debug!(task_id = %task_id, status = ?task.status, "Task finished");
                return;
            }
            DownloadStatus::Queued | DownloadStatus::Downloading | DownloadStatus::Paused => {}
        }
    }
    debug!(task_id = %task_id, "Task stream ended");
}

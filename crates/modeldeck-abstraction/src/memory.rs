//! In-memory collaborators.
//!
//! `InMemoryTransferEngine` and `InMemoryCatalog` keep their state in `watch`
//! channels so every observer sees the latest snapshot. Both support one-shot
//! failure and panic injection plus per-operation call counting, and the
//! engine has a gate that holds operations open until released.

use crate::types::{DownloadStatus, DownloadTask, InstallState, ModelPackage, TaskId};
use crate::{CollaboratorError, CollaboratorResult, ModelCatalog, TransferEngine};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// Engine operations that can be counted or injected with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOperation {
    StartOrQueue,
    Pause,
    Resume,
    Cancel,
    Retry,
    DeleteModel,
}

/// Catalog operations that can be counted or injected with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogOperation {
    GetModel,
    UpsertModel,
    GetAllModels,
    Refresh,
}

/// What an injected fault does on the next call.
#[derive(Debug, Clone)]
enum Fault {
    Fail(CollaboratorError),
    Panic(String),
}

/// Per-operation call counts and pending faults.
#[derive(Debug)]
struct Injections<Op> {
    calls: HashMap<Op, usize>,
    faults: HashMap<Op, Fault>,
}

impl<Op: Copy + Eq + std::hash::Hash> Injections<Op> {
    fn new() -> Self {
        Self { calls: HashMap::new(), faults: HashMap::new() }
    }

    /// Records a call and takes the pending fault for `op`, if any.
    fn enter(&mut self, op: Op) -> Option<Fault> {
        *self.calls.entry(op).or_insert(0) += 1;
        self.faults.remove(&op)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Applies a pending fault. The panic is raised with no lock held.
fn apply(fault: Option<Fault>) -> CollaboratorResult<()> {
    match fault {
        None => Ok(()),
        Some(Fault::Fail(error)) => Err(error),
        Some(Fault::Panic(message)) => panic!("{message}"),
    }
}

/// Transfer engine backed by a `watch` channel of every known task.
pub struct InMemoryTransferEngine {
    tasks: watch::Sender<Vec<DownloadTask>>,
    injections: Mutex<Injections<EngineOperation>>,
    gate: watch::Sender<bool>,
    deleted: Mutex<Vec<String>>,
}

impl fmt::Debug for InMemoryTransferEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTransferEngine")
            .field("task_count", &self.tasks.borrow().len())
            .field("gate_open", &*self.gate.borrow())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryTransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransferEngine {
    /// Creates an engine with no tasks and an open gate.
    #[must_use]
    pub fn new() -> Self {
        let (tasks, _) = watch::channel(Vec::new());
        let (gate, _) = watch::channel(true);
        Self {
            tasks,
            injections: Mutex::new(Injections::new()),
            gate,
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next call to `op` fail with `error`.
    pub fn fail_next(&self, op: EngineOperation, error: CollaboratorError) {
        lock(&self.injections).faults.insert(op, Fault::Fail(error));
    }

    /// Makes the next call to `op` panic with `message`.
    pub fn panic_next(&self, op: EngineOperation, message: impl Into<String>) {
        lock(&self.injections).faults.insert(op, Fault::Panic(message.into()));
    }

    /// Number of times `op` has been called.
    pub fn call_count(&self, op: EngineOperation) -> usize {
        lock(&self.injections).calls.get(&op).copied().unwrap_or(0)
    }

    /// Holds every subsequent operation at entry until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held operations proceed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Model ids passed to `delete_model`, in call order.
    pub fn deleted_models(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    /// Snapshot of a single task.
    pub fn task(&self, task_id: &TaskId) -> Option<DownloadTask> {
        self.tasks.borrow().iter().find(|t| t.task_id == *task_id).cloned()
    }

    /// Snapshot of every task.
    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.tasks.borrow().clone()
    }

    /// Inserts or replaces a task as-is.
    pub fn insert_task(&self, task: DownloadTask) {
        self.tasks.send_modify(|tasks| {
            match tasks.iter_mut().find(|t| t.task_id == task.task_id) {
                Some(existing) => *existing = task,
                None => tasks.push(task),
            }
        });
    }

    /// Forces a status, as the engine would when bytes start or stop moving.
    pub fn set_status(&self, task_id: &TaskId, status: DownloadStatus) -> CollaboratorResult<()> {
        self.update(task_id, |task| {
            task.status = status;
            if status.is_terminal() {
                task.finished_at = Some(Utc::now());
            }
            Ok(())
        })
    }

    /// Reports progress. Clamped to `[0, 1]` and never decreasing while downloading.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_progress(&self, task_id: &TaskId, progress: f32) -> CollaboratorResult<()> {
        self.update(task_id, |task| {
            let progress = progress.clamp(0.0, 1.0);
            task.progress = if task.status == DownloadStatus::Downloading {
                task.progress.max(progress)
            } else {
                progress
            };
            if task.total_bytes > 0 {
                task.bytes_downloaded = (task.total_bytes as f64 * f64::from(task.progress)) as u64;
            }
            Ok(())
        })
    }

    /// Marks a task as failed with `message`.
    pub fn fail(&self, task_id: &TaskId, message: impl Into<String>) -> CollaboratorResult<()> {
        let message = message.into();
        self.update(task_id, |task| {
            task.status = DownloadStatus::Failed;
            task.error_message = Some(message);
            task.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Marks a task as completed.
    pub fn complete(&self, task_id: &TaskId) -> CollaboratorResult<()> {
        self.update(task_id, |task| {
            task.status = DownloadStatus::Completed;
            task.progress = 1.0;
            task.bytes_downloaded = task.total_bytes;
            task.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn enter(&self, op: EngineOperation) -> CollaboratorResult<()> {
        let fault = lock(&self.injections).enter(op);
        let mut gate = self.gate.subscribe();
        // Sender lives as long as self.
        let _ = gate.wait_for(|open| *open).await;
        apply(fault)
    }

    fn update<F>(&self, task_id: &TaskId, f: F) -> CollaboratorResult<()>
    where
        F: FnOnce(&mut DownloadTask) -> CollaboratorResult<()>,
    {
        let mut outcome = Err(CollaboratorError::NotFound(format!("task {task_id}")));
        self.tasks.send_if_modified(|tasks| match tasks.iter_mut().find(|t| t.task_id == *task_id) {
            Some(task) => {
                outcome = f(task);
                outcome.is_ok()
            }
            None => false,
        });
        outcome
    }
}

#[async_trait]
impl TransferEngine for InMemoryTransferEngine {
    async fn start_or_queue(&self, model_id: &str) -> CollaboratorResult<TaskId> {
        self.enter(EngineOperation::StartOrQueue).await?;
        if model_id.trim().is_empty() {
            return Err(CollaboratorError::InvalidArgument("model id is blank".to_string()));
        }

        let mut task_id = TaskId::new();
        self.tasks.send_modify(|tasks| {
            if let Some(live) =
                tasks.iter().find(|t| t.model_id == model_id && !t.status.is_terminal())
            {
                task_id = live.task_id;
                return;
            }
            let mut task = DownloadTask::new(task_id, model_id);
            task.started_at = Some(Utc::now());
            tasks.push(task);
        });
        debug!(model_id = %model_id, task_id = %task_id, "Task queued");
        Ok(task_id)
    }

    async fn pause(&self, task_id: &TaskId) -> CollaboratorResult<()> {
        self.enter(EngineOperation::Pause).await?;
        self.update(task_id, |task| match task.status {
            DownloadStatus::Downloading | DownloadStatus::Queued => {
                task.status = DownloadStatus::Paused;
                Ok(())
            }
            other => Err(CollaboratorError::InvalidState(format!("cannot pause a {other:?} task"))),
        })
    }

    async fn resume(&self, task_id: &TaskId) -> CollaboratorResult<()> {
        self.enter(EngineOperation::Resume).await?;
        self.update(task_id, |task| match task.status {
            DownloadStatus::Paused => {
                task.status = DownloadStatus::Downloading;
                Ok(())
            }
            other => {
                Err(CollaboratorError::InvalidState(format!("cannot resume a {other:?} task")))
            }
        })
    }

    async fn cancel(&self, task_id: &TaskId) -> CollaboratorResult<()> {
        self.enter(EngineOperation::Cancel).await?;
        self.update(task_id, |task| {
            if task.status.is_terminal() && task.status != DownloadStatus::Failed {
                return Err(CollaboratorError::InvalidState(format!(
                    "cannot cancel a {:?} task",
                    task.status
                )));
            }
            task.status = DownloadStatus::Cancelled;
            task.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn retry(&self, task_id: &TaskId) -> CollaboratorResult<()> {
        self.enter(EngineOperation::Retry).await?;
        self.update(task_id, |task| match task.status {
            DownloadStatus::Failed | DownloadStatus::Cancelled => {
                task.status = DownloadStatus::Queued;
                task.progress = 0.0;
                task.bytes_downloaded = 0;
                task.error_message = None;
                task.started_at = Some(Utc::now());
                task.finished_at = None;
                Ok(())
            }
            other => Err(CollaboratorError::InvalidState(format!("cannot retry a {other:?} task"))),
        })
    }

    async fn delete_model(&self, model_id: &str) -> CollaboratorResult<()> {
        self.enter(EngineOperation::DeleteModel).await?;
        lock(&self.deleted).push(model_id.to_string());
        self.tasks.send_if_modified(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.model_id != model_id || !t.status.is_terminal());
            tasks.len() != before
        });
        Ok(())
    }

    fn observe_task(&self, task_id: &TaskId) -> BoxStream<'static, Option<DownloadTask>> {
        let task_id = *task_id;
        WatchStream::new(self.tasks.subscribe())
            .map(move |tasks| tasks.into_iter().find(|t| t.task_id == task_id))
            .boxed()
    }

    fn observe_all_tasks(&self) -> BoxStream<'static, Vec<DownloadTask>> {
        WatchStream::new(self.tasks.subscribe()).boxed()
    }

    fn observe_progress(&self, task_id: &TaskId) -> BoxStream<'static, f32> {
        let task_id = *task_id;
        WatchStream::new(self.tasks.subscribe())
            .map(move |tasks| {
                tasks.iter().find(|t| t.task_id == task_id).map_or(0.0, |t| t.progress)
            })
            .boxed()
    }
}

/// Model catalog backed by a `watch` channel of every package.
///
/// `refresh` replaces the catalog with whatever was staged through
/// [`stage_refresh`](Self::stage_refresh), or leaves it unchanged.
pub struct InMemoryCatalog {
    models: watch::Sender<Vec<ModelPackage>>,
    injections: Mutex<Injections<CatalogOperation>>,
    gate: watch::Sender<bool>,
    staged: Mutex<Option<Vec<ModelPackage>>>,
}

impl fmt::Debug for InMemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCatalog")
            .field("model_count", &self.models.borrow().len())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::with_models(Vec::new())
    }

    /// Creates a catalog holding `models`.
    #[must_use]
    pub fn with_models(models: Vec<ModelPackage>) -> Self {
        let (models, _) = watch::channel(models);
        let (gate, _) = watch::channel(true);
        Self {
            models,
            injections: Mutex::new(Injections::new()),
            gate,
            staged: Mutex::new(None),
        }
    }

    /// Replaces the whole catalog, as a refresh would.
    pub fn set_models(&self, models: Vec<ModelPackage>) {
        self.models.send_replace(models);
    }

    /// Snapshot of every package.
    pub fn models(&self) -> Vec<ModelPackage> {
        self.models.borrow().clone()
    }

    /// Sets the catalog contents the next `refresh` publishes.
    pub fn stage_refresh(&self, models: Vec<ModelPackage>) {
        *lock(&self.staged) = Some(models);
    }

    /// Holds every subsequent operation at entry until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held operations proceed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Makes the next call to `op` fail with `error`.
    pub fn fail_next(&self, op: CatalogOperation, error: CollaboratorError) {
        lock(&self.injections).faults.insert(op, Fault::Fail(error));
    }

    /// Makes the next call to `op` panic with `message`.
    pub fn panic_next(&self, op: CatalogOperation, message: impl Into<String>) {
        lock(&self.injections).faults.insert(op, Fault::Panic(message.into()));
    }

    /// Number of times `op` has been called.
    pub fn call_count(&self, op: CatalogOperation) -> usize {
        lock(&self.injections).calls.get(&op).copied().unwrap_or(0)
    }

    async fn enter(&self, op: CatalogOperation) -> CollaboratorResult<()> {
        let fault = lock(&self.injections).enter(op);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        apply(fault)
    }
}

#[async_trait]
impl ModelCatalog for InMemoryCatalog {
    async fn get_model(&self, model_id: &str) -> CollaboratorResult<Option<ModelPackage>> {
        self.enter(CatalogOperation::GetModel).await?;
        Ok(self.models.borrow().iter().find(|m| m.model_id == model_id).cloned())
    }

    async fn upsert_model(&self, package: ModelPackage) -> CollaboratorResult<()> {
        self.enter(CatalogOperation::UpsertModel).await?;
        debug!(model_id = %package.model_id, "Upserting model");
        self.models.send_modify(|models| {
            match models.iter_mut().find(|m| m.model_id == package.model_id) {
                Some(existing) => *existing = package,
                None => models.push(package),
            }
        });
        Ok(())
    }

    async fn get_all_models(&self) -> CollaboratorResult<Vec<ModelPackage>> {
        self.enter(CatalogOperation::GetAllModels).await?;
        Ok(self.models())
    }

    async fn refresh(&self) -> CollaboratorResult<()> {
        self.enter(CatalogOperation::Refresh).await?;
        let staged = lock(&self.staged).take();
        if let Some(models) = staged {
            debug!(model_count = models.len(), "Catalog refreshed");
            self.models.send_replace(models);
        }
        Ok(())
    }

    fn observe_all_models(&self) -> BoxStream<'static, Vec<ModelPackage>> {
        WatchStream::new(self.models.subscribe()).boxed()
    }

    fn observe_installed_models(&self) -> BoxStream<'static, Vec<ModelPackage>> {
        WatchStream::new(self.models.subscribe())
            .map(|models| {
                models.into_iter().filter(|m| m.install_state == InstallState::Installed).collect()
            })
            .boxed()
    }
}

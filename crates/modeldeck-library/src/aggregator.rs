//! Library view aggregation.
//!
//! [`derive_library_content`] is a pure function of the catalog snapshots, the
//! task snapshot and the filters. [`LibraryViewAggregator`] re-runs it whenever
//! any input changes and publishes the latest result.

use crate::filters::LibraryFilterState;
use futures::StreamExt;
use modeldeck_abstraction::{DownloadTask, InstallState, ModelCatalog, ModelPackage, ProviderType};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An active task with its catalog entry, when the catalog has one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryDownloadItem {
    pub task: DownloadTask,
    pub model: Option<ModelPackage>,
}

/// Sections rendered by one library tab.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibrarySections {
    pub downloads: Vec<LibraryDownloadItem>,
    pub attention: Vec<ModelPackage>,
    pub installed: Vec<ModelPackage>,
    pub available: Vec<ModelPackage>,
}

/// Every partition both tabs draw from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibraryPartition {
    pub downloads: Vec<LibraryDownloadItem>,
    pub attention: Vec<ModelPackage>,
    pub installed: Vec<ModelPackage>,
    pub available: Vec<ModelPackage>,
    /// Not-installed models hidden from `available` because a task is active for them.
    pub excluded_available: Vec<ModelPackage>,
}

impl LibraryPartition {
    /// Sections for the local tab: installed and errored models only.
    #[must_use]
    pub fn local_sections(&self) -> LibrarySections {
        LibrarySections {
            downloads: self.downloads.clone(),
            attention: self.attention.clone(),
            installed: self.installed.clone(),
            available: Vec::new(),
        }
    }

    /// Sections for the curated tab.
    #[must_use]
    pub fn curated_sections(&self) -> LibrarySections {
        LibrarySections {
            downloads: self.downloads.clone(),
            attention: self.attention.clone(),
            installed: self.installed.clone(),
            available: self.available.clone(),
        }
    }
}

/// Headline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LibrarySummary {
    pub total: usize,
    pub installed: usize,
    pub attention: usize,
    pub available: usize,
    pub installed_bytes: u64,
}

/// Everything the library screen renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibraryContent {
    pub partition: LibraryPartition,
    pub local: LibrarySections,
    pub curated: LibrarySections,
    pub summary: LibrarySummary,
    pub provider_options: Vec<ProviderType>,
    pub capability_options: Vec<String>,
}

/// Derives the library content.
///
/// Summary totals, attention and available counts come from `all_models`;
/// installed count and bytes come from `installed_models`. Sections are built
/// from `all_models` after `filters` are applied.
#[must_use]
pub fn derive_library_content(
    all_models: &[ModelPackage],
    installed_models: &[ModelPackage],
    tasks: &[DownloadTask],
    filters: &LibraryFilterState,
) -> LibraryContent {
    let filtered = filters.apply(all_models);
    let downloads = prioritized_downloads(all_models, tasks);
    let active_ids: HashSet<&str> =
        downloads.iter().map(|item| item.task.model_id.as_str()).collect();

    let mut partition = LibraryPartition::default();
    for model in &filtered {
        match model.install_state {
            InstallState::Error => partition.attention.push(model.clone()),
            InstallState::Installed => partition.installed.push(model.clone()),
            InstallState::NotInstalled if active_ids.contains(model.model_id.as_str()) => {
                partition.excluded_available.push(model.clone());
            }
            InstallState::NotInstalled => partition.available.push(model.clone()),
            // Shown through the download list.
            InstallState::Downloading | InstallState::Paused => {}
        }
    }
    partition.downloads = downloads;

    LibraryContent {
        local: partition.local_sections(),
        curated: partition.curated_sections(),
        partition,
        summary: summarize(all_models, installed_models),
        provider_options: provider_options(all_models),
        capability_options: capability_options(all_models),
    }
}

/// Active tasks ordered by status priority, progress (descending), model id, then task id.
fn prioritized_downloads(
    all_models: &[ModelPackage],
    tasks: &[DownloadTask],
) -> Vec<LibraryDownloadItem> {
    let mut active: Vec<&DownloadTask> = tasks.iter().filter(|t| t.status.is_active()).collect();
    active.sort_by(|a, b| {
        a.status
            .priority()
            .cmp(&b.status.priority())
            .then_with(|| b.progress.total_cmp(&a.progress))
            .then_with(|| a.model_id.cmp(&b.model_id))
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    active
        .into_iter()
        .map(|task| LibraryDownloadItem {
            task: task.clone(),
            model: all_models.iter().find(|m| m.model_id == task.model_id).cloned(),
        })
        .collect()
}

fn summarize(all_models: &[ModelPackage], installed_models: &[ModelPackage]) -> LibrarySummary {
    let count = |state: InstallState| all_models.iter().filter(|m| m.install_state == state).count();
    LibrarySummary {
        total: all_models.len(),
        installed: installed_models.len(),
        attention: count(InstallState::Error),
        available: count(InstallState::NotInstalled),
        installed_bytes: installed_models.iter().map(|m| m.size_bytes).sum(),
    }
}

/// Distinct providers sorted by name, ignoring case.
fn provider_options(models: &[ModelPackage]) -> Vec<ProviderType> {
    let mut providers: Vec<ProviderType> = models
        .iter()
        .map(|m| m.provider_type)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    providers.sort_by_cached_key(|p| p.name().to_lowercase());
    providers
}

/// Distinct capability tags, trimmed and lower-cased, blanks dropped, sorted.
fn capability_options(models: &[ModelPackage]) -> Vec<String> {
    models
        .iter()
        .flat_map(|m| m.capabilities.iter())
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Keeps [`LibraryContent`] current as the catalog, the tasks or the filters change.
#[derive(Debug)]
pub struct LibraryViewAggregator;

impl LibraryViewAggregator {
    /// Starts recomputing content until `token` is cancelled.
    ///
    /// # Returns
    /// Returns the content receiver and the handle of the recompute task.
    pub fn spawn(
        catalog: &dyn ModelCatalog,
        mut tasks: watch::Receiver<Vec<DownloadTask>>,
        mut filters: watch::Receiver<LibraryFilterState>,
        token: CancellationToken,
    ) -> (watch::Receiver<LibraryContent>, JoinHandle<()>) {
        let mut all_stream = catalog.observe_all_models();
        let mut installed_stream = catalog.observe_installed_models();
        let mut all_models: Vec<ModelPackage> = Vec::new();
        let mut installed_models: Vec<ModelPackage> = Vec::new();

        let initial = derive_library_content(
            &all_models,
            &installed_models,
            &tasks.borrow_and_update(),
            &filters.borrow_and_update(),
        );
        let (content_tx, content_rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut all_open = true;
            let mut installed_open = true;
            let mut tasks_open = true;
            let mut filters_open = true;

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    next = all_stream.next(), if all_open => match next {
                        Some(models) => all_models = models,
                        None => { all_open = false; continue; }
                    },
                    next = installed_stream.next(), if installed_open => match next {
                        Some(models) => installed_models = models,
                        None => { installed_open = false; continue; }
                    },
                    changed = tasks.changed(), if tasks_open => {
                        if changed.is_err() { tasks_open = false; continue; }
                    },
                    changed = filters.changed(), if filters_open => {
                        if changed.is_err() { filters_open = false; continue; }
                    },
                    else => break,
                }

                let content = derive_library_content(
                    &all_models,
                    &installed_models,
                    &tasks.borrow_and_update(),
                    &filters.borrow_and_update(),
                );
                content_tx.send_replace(content);
                debug!("Library content recomputed");
            }
        });

        (content_rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldeck_abstraction::{DownloadStatus, TaskId};

    fn model(id: &str, state: InstallState) -> ModelPackage {
        ModelPackage::new(id, id.to_uppercase(), ProviderType::MediaPipe).with_install_state(state)
    }

    fn task(model_id: &str, status: DownloadStatus, progress: f32) -> DownloadTask {
        DownloadTask::new(TaskId::new(), model_id).with_status(status).with_progress(progress)
    }

    #[test]
    fn test_active_order_is_independent_of_input_order() {
        let tasks = vec![
            task("failed", DownloadStatus::Failed, 0.5),
            task("queued", DownloadStatus::Queued, 0.1),
            task("done", DownloadStatus::Completed, 1.0),
            task("paused", DownloadStatus::Paused, 0.9),
            task("downloading", DownloadStatus::Downloading, 0.3),
        ];
        let mut reversed = tasks.clone();
        reversed.reverse();

        for input in [tasks, reversed] {
            let content = derive_library_content(&[], &[], &input, &LibraryFilterState::default());
            let order: Vec<DownloadStatus> =
                content.partition.downloads.iter().map(|item| item.task.status).collect();
            assert_eq!(
                order,
                vec![
                    DownloadStatus::Downloading,
                    DownloadStatus::Paused,
                    DownloadStatus::Queued,
                    DownloadStatus::Failed,
                ]
            );
        }
    }

    #[test]
    fn test_equal_progress_ties_break_on_model_id() {
        let tasks = vec![
            task("b", DownloadStatus::Downloading, 0.4),
            task("a", DownloadStatus::Downloading, 0.4),
            task("c", DownloadStatus::Downloading, 0.8),
        ];
        let content = derive_library_content(&[], &[], &tasks, &LibraryFilterState::default());
        let ids: Vec<&str> =
            content.partition.downloads.iter().map(|item| item.task.model_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_available_excludes_models_with_active_tasks() {
        let models = vec![
            model("downloading", InstallState::NotInstalled),
            model("paused", InstallState::NotInstalled),
            model("queued", InstallState::NotInstalled),
            model("failed", InstallState::NotInstalled),
            model("completed", InstallState::NotInstalled),
            model("idle", InstallState::NotInstalled),
        ];
        let tasks = vec![
            task("downloading", DownloadStatus::Downloading, 0.2),
            task("paused", DownloadStatus::Paused, 0.2),
            task("queued", DownloadStatus::Queued, 0.0),
            task("failed", DownloadStatus::Failed, 0.2),
            task("completed", DownloadStatus::Completed, 1.0),
        ];

        let content = derive_library_content(&models, &[], &tasks, &LibraryFilterState::default());
        let available: Vec<&str> =
            content.curated.available.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(available, vec!["completed", "idle"]);
        assert_eq!(content.partition.excluded_available.len(), 4);
        assert!(content.partition.downloads.iter().all(|item| item.model.is_some()));
    }

    #[test]
    fn test_local_and_curated_views_share_downloads_and_summary() {
        let models = vec![
            model("ok", InstallState::Installed).with_size_bytes(100),
            model("broken", InstallState::Error),
            model("new", InstallState::NotInstalled),
        ];
        let installed = vec![models[0].clone()];
        let tasks = vec![task("orphan", DownloadStatus::Queued, 0.0)];

        let content =
            derive_library_content(&models, &installed, &tasks, &LibraryFilterState::default());

        assert!(content.local.available.is_empty());
        assert_eq!(content.curated.available.len(), 1);
        assert_eq!(content.local.downloads, content.curated.downloads);
        assert_eq!(content.local.attention.len(), 1);
        assert_eq!(content.curated.installed.len(), 1);
        assert!(content.local.downloads[0].model.is_none());
        assert_eq!(
            content.summary,
            LibrarySummary { total: 3, installed: 1, attention: 1, available: 1, installed_bytes: 100 }
        );
    }

    #[test]
    fn test_option_lists() {
        let models = vec![
            ModelPackage::new("a", "A", ProviderType::Tflite)
                .with_capabilities([" Vision ", "text-generation", "  "]),
            ModelPackage::new("b", "B", ProviderType::MediaPipe).with_capabilities(["vision"]),
            ModelPackage::new("c", "C", ProviderType::Tflite),
        ];
        let content = derive_library_content(&models, &[], &[], &LibraryFilterState::default());
        assert_eq!(content.provider_options, vec![ProviderType::MediaPipe, ProviderType::Tflite]);
        assert_eq!(content.capability_options, vec!["text-generation", "vision"]);
    }
}

//! Domain types shared by the transfer engine, the catalog and the library core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Identifier for one download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Status of a download task as reported by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    /// Returns true once the lifecycle has ended. A failed task may still be retried.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true for statuses shown in the library's download list.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Paused | Self::Queued | Self::Failed)
    }

    /// Display priority, lower first.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Downloading => 0,
            Self::Paused => 1,
            Self::Queued => 2,
            Self::Failed => 3,
            Self::Completed => 4,
            Self::Cancelled => 5,
        }
    }
}

/// A single download attempt tracked by the transfer engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub task_id: TaskId,
    pub model_id: String,
    pub status: DownloadStatus,
    /// Fraction complete, 0.0 to 1.0 inclusive.
    pub progress: f32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
}

impl DownloadTask {
    /// Creates a queued task with no progress.
    #[must_use]
    pub fn new(task_id: TaskId, model_id: impl Into<String>) -> Self {
        Self {
            task_id,
            model_id: model_id.into(),
            status: DownloadStatus::Queued,
            progress: 0.0,
            error_message: None,
            started_at: None,
            finished_at: None,
            bytes_downloaded: 0,
            total_bytes: 0,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: DownloadStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = progress.clamp(0.0, 1.0);
        self
    }
}

/// Local installation state of a catalog model. Independent of any task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    NotInstalled,
    Downloading,
    Paused,
    Installed,
    Error,
}

/// Runtime that executes a model package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    MediaPipe,
    MlcLlm,
    OnnxRuntime,
    Tflite,
    Leap,
    CloudApi,
}

impl ProviderType {
    /// Stable name used for display and ordering.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::MediaPipe => "MEDIA_PIPE",
            Self::MlcLlm => "MLC_LLM",
            Self::OnnxRuntime => "ONNX_RUNTIME",
            Self::Tflite => "TFLITE",
            Self::Leap => "LEAP",
            Self::CloudApi => "CLOUD_API",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a package's artifacts reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    LocalArchive,
    PlayAsset,
    CloudFallback,
}

/// A downloadable model package as described by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPackage {
    /// Stable identifier, unchanged across catalog refreshes.
    pub model_id: String,
    pub display_name: String,
    pub version: String,
    pub provider_type: ProviderType,
    pub delivery_type: DeliveryType,
    pub min_app_version: u32,
    pub size_bytes: u64,
    pub capabilities: BTreeSet<String>,
    pub install_state: InstallState,
    pub manifest_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ModelPackage {
    /// Creates a not-installed local archive package with empty metadata.
    #[must_use]
    pub fn new(
        model_id: impl Into<String>,
        display_name: impl Into<String>,
        provider_type: ProviderType,
    ) -> Self {
        let now = Utc::now();
        Self {
            model_id: model_id.into(),
            display_name: display_name.into(),
            version: "1.0.0".to_string(),
            provider_type,
            delivery_type: DeliveryType::LocalArchive,
            min_app_version: 1,
            size_bytes: 0,
            capabilities: BTreeSet::new(),
            install_state: InstallState::NotInstalled,
            manifest_url: String::new(),
            created_at: now,
            updated_at: now,
            author: None,
            license: None,
            languages: Vec::new(),
            architectures: Vec::new(),
            base_model: None,
            model_type: None,
            summary: None,
            description: None,
        }
    }

    #[must_use]
    pub fn with_install_state(mut self, install_state: InstallState) -> Self {
        self.install_state = install_state;
        self
    }

    #[must_use]
    pub fn with_size_bytes(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(DownloadStatus::Downloading.is_active());
        assert!(DownloadStatus::Paused.is_active());
        assert!(DownloadStatus::Queued.is_active());
        assert!(DownloadStatus::Failed.is_active());
        assert!(!DownloadStatus::Completed.is_active());
        assert!(!DownloadStatus::Cancelled.is_active());
    }

    #[test]
    fn test_priority_order() {
        let mut statuses = vec![
            DownloadStatus::Cancelled,
            DownloadStatus::Failed,
            DownloadStatus::Queued,
            DownloadStatus::Completed,
            DownloadStatus::Paused,
            DownloadStatus::Downloading,
        ];
        statuses.sort_by_key(|s| s.priority());
        assert_eq!(
            statuses,
            vec![
                DownloadStatus::Downloading,
                DownloadStatus::Paused,
                DownloadStatus::Queued,
                DownloadStatus::Failed,
                DownloadStatus::Completed,
                DownloadStatus::Cancelled,
            ]
        );
    }

    #[test]
    fn test_with_progress_clamps() {
        let task = DownloadTask::new(TaskId::new(), "m1").with_progress(1.7);
        assert!((task.progress - 1.0).abs() < f32::EPSILON);
        let task = DownloadTask::new(TaskId::new(), "m1").with_progress(-0.2);
        assert!(task.progress.abs() < f32::EPSILON);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&DownloadStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }
}

//! Integration tests for the download lifecycle coordinator.
//!
//! Covers monitor replacement on re-queue, busy edges across overlapping
//! operations, failure reporting and session shutdown.

mod common;

use common::{Harness, drain, wait_until};
use modeldeck_abstraction::{CollaboratorError, DownloadStatus, EngineOperation};
use modeldeck_library::{LibraryCoreError, LibraryError};
use std::time::Duration;

#[tokio::test]
async fn test_requeue_keeps_one_monitor_and_reports_failure_once() {
    let mut h = Harness::new();

    let first = h.coordinator.queue_download("gemma").await.unwrap();
    let second = h.coordinator.queue_download("gemma").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.coordinator.active_monitor_count(), 1);

    h.engine.fail(&first, "disk full").unwrap();

    assert_eq!(
        h.next_error().await,
        LibraryError::DownloadFailed {
            model_id: "gemma".to_string(),
            message: "disk full".to_string(),
        }
    );
    wait_until(|| h.coordinator.active_monitor_count() == 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.drain_errors().is_empty());
}

#[tokio::test]
async fn test_completed_download_releases_monitor_silently() {
    let mut h = Harness::new();

    let task_id = h.coordinator.queue_download("phi").await.unwrap();
    assert!(h.coordinator.is_monitoring(&task_id));

    h.engine.complete(&task_id).unwrap();

    wait_until(|| !h.coordinator.is_monitoring(&task_id)).await;
    assert!(h.drain_errors().is_empty());
}

#[tokio::test]
async fn test_successful_cancel_releases_monitor_silently() {
    let mut h = Harness::new();
    let task_id = h.coordinator.queue_download("gemma").await.unwrap();
    assert!(h.coordinator.is_monitoring(&task_id));

    h.coordinator.cancel(task_id).await.unwrap().unwrap();

    assert_eq!(h.engine.task(&task_id).unwrap().status, DownloadStatus::Cancelled);
    wait_until(|| !h.coordinator.is_monitoring(&task_id)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.drain_errors().is_empty());
}

#[tokio::test]
async fn test_failed_start_reports_and_clears_busy() {
    let mut h = Harness::new();
    let mut busy = h.coordinator.subscribe_busy();
    h.engine.fail_next(
        EngineOperation::StartOrQueue,
        CollaboratorError::Failed("Disk full".to_string()),
    );

    let result = h.coordinator.queue("gemma").await.unwrap();

    assert!(matches!(result, Err(LibraryCoreError::Operation(_))));
    assert_eq!(
        h.drain_errors(),
        vec![LibraryError::DownloadFailed {
            model_id: "gemma".to_string(),
            message: "Disk full".to_string(),
        }]
    );
    assert_eq!(drain(&mut busy), vec![true, false]);
    assert_eq!(h.coordinator.active_monitor_count(), 0);
}

#[tokio::test]
async fn test_overlapping_operations_produce_one_busy_period() {
    let h = Harness::new();
    let mut busy = h.coordinator.subscribe_busy();
    h.engine.hold();

    let queue = h.coordinator.queue("a");
    let delete = h.coordinator.delete_model("b");
    wait_until(|| {
        h.engine.call_count(EngineOperation::StartOrQueue) == 1
            && h.engine.call_count(EngineOperation::DeleteModel) == 1
    })
    .await;
    assert!(h.coordinator.is_busy());

    h.engine.release();
    queue.await.unwrap().unwrap();
    delete.await.unwrap().unwrap();

    assert!(!h.coordinator.is_busy());
    assert_eq!(drain(&mut busy), vec![true, false]);
    assert_eq!(h.engine.deleted_models(), vec!["b".to_string()]);
}

#[tokio::test]
async fn test_task_commands_do_not_touch_busy() {
    let mut h = Harness::new();
    let task_id = h.coordinator.queue_download("gemma").await.unwrap();
    let mut busy = h.coordinator.subscribe_busy();

    h.coordinator.pause(task_id).await.unwrap().unwrap();
    h.coordinator.resume(task_id).await.unwrap().unwrap();
    h.engine
        .fail_next(EngineOperation::Cancel, CollaboratorError::Failed("   ".to_string()));
    let result = h.coordinator.cancel(task_id).await.unwrap();

    assert!(result.is_err());
    assert!(drain(&mut busy).is_empty());
    assert_eq!(
        h.drain_errors(),
        vec![LibraryError::CancelFailed { task_id, message: "Failed to cancel".to_string() }]
    );
}

#[tokio::test]
async fn test_panicking_engine_reports_unexpected_error() {
    let mut h = Harness::new();
    h.engine.panic_next(EngineOperation::DeleteModel, "storage driver crashed");

    let result = h.coordinator.delete_model("gemma").await.unwrap();

    assert!(matches!(result, Err(LibraryCoreError::Unexpected(_))));
    assert_eq!(
        h.drain_errors(),
        vec![LibraryError::UnexpectedError { message: "storage driver crashed".to_string() }]
    );
    assert!(!h.coordinator.is_busy());
}

#[tokio::test]
async fn test_cancelled_engine_call_is_silent() {
    let mut h = Harness::new();
    h.engine.fail_next(EngineOperation::StartOrQueue, CollaboratorError::Cancelled);

    let result = h.coordinator.queue_download("gemma").await;

    assert!(matches!(result, Err(LibraryCoreError::Cancelled)));
    assert!(h.drain_errors().is_empty());
}

#[tokio::test]
async fn test_shutdown_clears_monitors_and_rejects_new_commands() {
    let mut h = Harness::new();
    h.coordinator.queue_download("a").await.unwrap();
    h.coordinator.queue_download("b").await.unwrap();
    assert_eq!(h.coordinator.active_monitor_count(), 2);

    h.coordinator.shutdown().await;

    assert_eq!(h.coordinator.active_monitor_count(), 0);
    let late = h.coordinator.queue("c").await.unwrap();
    assert!(matches!(late, Err(LibraryCoreError::Cancelled)));
    assert_eq!(h.engine.call_count(EngineOperation::StartOrQueue), 2);
    assert!(h.drain_errors().is_empty());
}

#[tokio::test]
async fn test_observed_tasks_follow_engine() {
    let h = Harness::new();
    let mut tasks = h.coordinator.observe_tasks();

    let task_id = h.coordinator.queue_download("gemma").await.unwrap();

    let snapshot = tokio::time::timeout(common::WAIT, tasks.wait_for(|t| !t.is_empty()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(snapshot[0].task_id, task_id);

    let mut progress = h.coordinator.observe_progress(&task_id);
    h.engine.set_status(&task_id, DownloadStatus::Downloading).unwrap();
    h.engine.set_progress(&task_id, 0.5).unwrap();
    let value = *tokio::time::timeout(common::WAIT, progress.wait_for(|p| *p >= 0.5))
        .await
        .unwrap()
        .unwrap();
    assert!((value - 0.5).abs() < f32::EPSILON);
}

//! Integration tests for `BatchCoordinator` over the simulated transport.
//!
//! Verifies that one failing camera never affects its siblings, that progress
//! is reported after every settlement, that successful batch commands update
//! each controller's cached state, and that cancellation keeps results.
//! A broadcast whose caller stops waiting is retired rather than left active.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use camlink_core::{Command, CommandKind, DeviceId};
use camlink_engine::application::batch::{BatchCoordinator, BatchStatus, DEFAULT_MAX_HISTORY};
use camlink_engine::application::command_queue::QueueConfig;
use camlink_engine::application::control::{CameraController, ControlError, ControllerConfig};
use camlink_engine::application::events::BatchEvent;
use camlink_engine::infrastructure::transport::{CameraBehavior, SimulatedTransport};

// ── Helpers ───────────────────────────────────────────────────────────────────

struct Rig {
    controller: CameraController,
    batches: BatchCoordinator,
    sim: Arc<SimulatedTransport>,
    devices: Vec<DeviceId>,
}

fn rig(cameras: &[(&str, CameraBehavior)], latency: Duration, response_timeout_ms: u64) -> Rig {
    let sim = Arc::new(SimulatedTransport::new(latency));
    for (id, behavior) in cameras {
        sim.add_camera_with(*id, behavior.clone());
    }
    let controller = CameraController::new(
        sim.clone(),
        ControllerConfig {
            queue: QueueConfig {
                response_timeout: Duration::from_millis(response_timeout_ms),
                max_retries: 1,
                ..QueueConfig::default()
            },
            initialize_on_register: false,
            ..ControllerConfig::default()
        },
    );
    let devices: Vec<DeviceId> = cameras.iter().map(|(id, _)| DeviceId::new(*id)).collect();
    for device in &devices {
        controller.register_device(device.clone()).unwrap();
    }
    let batches = BatchCoordinator::new(controller.clone(), DEFAULT_MAX_HISTORY);
    Rig {
        controller,
        batches,
        sim,
        devices,
    }
}

fn rejecting() -> CameraBehavior {
    CameraBehavior::Reject {
        code: 0x0010,
        message: "card locked".into(),
    }
}

// ── Aggregation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_partial_failure_is_recorded_not_escalated() {
    // Arrange – d2 rejects, d1 and d3 answer
    let rig = rig(
        &[
            ("d1", CameraBehavior::Responsive),
            ("d2", rejecting()),
            ("d3", CameraBehavior::Responsive),
        ],
        Duration::ZERO,
        200,
    );

    // Act
    let op = rig
        .batches
        .broadcast(&rig.devices, Command::new(CommandKind::RecordingStart))
        .await
        .expect("a batch never fails as a whole");

    // Assert
    assert_eq!(op.progress_percent, 100.0);
    assert_eq!(op.status, BatchStatus::Completed);
    assert_eq!(op.succeeded(), 2);
    assert_eq!(op.failed(), 1);
    let d2 = op.result_for(&DeviceId::new("d2")).unwrap();
    assert_eq!(
        d2.error,
        Some(ControlError::Device {
            code: 0x0010,
            message: "card locked".into()
        })
    );
    assert!(op.is_finished());
}

#[tokio::test]
async fn test_batch_commands_apply_controller_side_effects() {
    // Arrange
    let rig = rig(
        &[("d1", CameraBehavior::Responsive), ("d2", rejecting())],
        Duration::ZERO,
        200,
    );

    // Act
    rig.batches.start_recording_all(&rig.devices).await.unwrap();
    rig.batches
        .update_setting_all(&rig.devices, "white_balance", json!(3200))
        .await
        .unwrap();

    // Assert
    let d1 = rig.controller.device_state(&DeviceId::new("d1")).unwrap();
    assert!(d1.is_recording);
    assert_eq!(d1.cached_settings.get("white_balance"), Some(&json!(3200)));
    let d2 = rig.controller.device_state(&DeviceId::new("d2")).unwrap();
    assert!(!d2.is_recording);
    assert!(!d2.cached_settings.contains_key("white_balance"));
}

#[tokio::test]
async fn test_progress_is_reported_after_every_settlement() {
    // Arrange
    let rig = rig(
        &[
            ("d1", CameraBehavior::Responsive),
            ("d2", CameraBehavior::Responsive),
            ("d3", CameraBehavior::Responsive),
            ("d4", rejecting()),
        ],
        Duration::ZERO,
        200,
    );
    let mut events = rig.batches.subscribe();

    // Act
    let op = rig
        .batches
        .broadcast(&rig.devices, Command::new(CommandKind::GetStatus))
        .await
        .unwrap();

    // Assert
    let mut progress = Vec::new();
    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        match event {
            BatchEvent::Progress { progress_percent, .. } => progress.push(progress_percent),
            BatchEvent::Completed { succeeded, failed, .. } => completed = Some((succeeded, failed)),
            _ => {}
        }
    }
    assert_eq!(progress, vec![25.0, 50.0, 75.0, 100.0]);
    assert_eq!(completed, Some((3, 1)));
    assert_eq!(rig.batches.history().last().map(|b| b.id), Some(op.id));
}

#[tokio::test]
async fn test_slow_device_does_not_serialise_others() {
    // Arrange – one silent camera with a 100 ms timeout and one retry
    let rig = rig(
        &[
            ("fast-1", CameraBehavior::Responsive),
            ("slow", CameraBehavior::Silent),
            ("fast-2", CameraBehavior::Responsive),
        ],
        Duration::from_millis(5),
        100,
    );
    let mut events = rig.batches.subscribe();

    // Act
    let op = rig
        .batches
        .broadcast(&rig.devices, Command::new(CommandKind::GetBatteryLevel))
        .await
        .unwrap();

    // Assert – both fast cameras settled before the silent one
    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BatchEvent::Progress { device_id, .. } = event {
            order.push(device_id);
        }
    }
    assert_eq!(order.last(), Some(&DeviceId::new("slow")));
    assert_eq!(
        op.result_for(&DeviceId::new("slow")).unwrap().error,
        Some(ControlError::Timeout { attempts: 2 })
    );
    assert_eq!(op.succeeded(), 2);
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_batch_still_records_results() {
    // Arrange
    let rig = rig(
        &[("d1", CameraBehavior::Responsive), ("d2", CameraBehavior::Responsive)],
        Duration::from_millis(30),
        500,
    );
    let mut events = rig.batches.subscribe();

    // Act
    let handle = rig
        .batches
        .spawn_broadcast(&rig.devices, Command::new(CommandKind::RecordingStart));
    rig.batches.cancel(handle.id()).unwrap();
    let op = handle.wait().await.unwrap();

    // Assert
    assert_eq!(op.status, BatchStatus::Cancelled);
    assert_eq!(op.per_device_results.len(), 2);
    assert_eq!(op.succeeded(), 2);
    assert!(rig.controller.device_state(&DeviceId::new("d1")).unwrap().is_recording);

    let mut saw_cancelled = false;
    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            BatchEvent::Cancelled { .. } => saw_cancelled = true,
            BatchEvent::Completed { .. } => saw_completed = true,
            _ => {}
        }
    }
    assert!(saw_cancelled);
    assert!(!saw_completed, "a cancelled batch never reports completion");
}

#[tokio::test]
async fn test_running_batch_is_visible_until_finished() {
    let rig = rig(&[("d1", CameraBehavior::Responsive)], Duration::from_millis(30), 500);

    let handle = rig
        .batches
        .spawn_broadcast(&rig.devices, Command::new(CommandKind::GetStatus));
    let running = rig.batches.get(handle.id()).unwrap();
    let id = handle.id();
    let finished = handle.wait().await.unwrap();

    assert_eq!(running.status, BatchStatus::Running);
    assert_eq!(rig.batches.active(), Vec::<uuid::Uuid>::new());
    assert_eq!(rig.batches.get(id), Some(finished));
    assert_eq!(rig.sim.written_to(&DeviceId::new("d1")).len(), 1);
}

#[tokio::test]
async fn test_dropped_broadcast_is_retired_as_cancelled() {
    // Arrange
    let rig = rig(&[("d1", CameraBehavior::Silent)], Duration::ZERO, 500);
    let mut events = rig.batches.subscribe();

    // Act – the caller gives up long before the camera times out
    let gave_up = tokio::time::timeout(
        Duration::from_millis(20),
        rig.batches
            .broadcast(&rig.devices, Command::new(CommandKind::RecordingStart)),
    )
    .await;

    // Assert
    assert!(gave_up.is_err());
    assert!(rig.batches.active().is_empty());
    let retired = rig.batches.history();
    assert_eq!(retired.len(), 1);
    assert_eq!(retired[0].status, BatchStatus::Cancelled);
    assert!(retired[0].is_finished());
    let mut saw_cancelled = false;
    while let Ok(event) = events.try_recv() {
        if let BatchEvent::Cancelled { batch_id } = event {
            saw_cancelled = batch_id == retired[0].id;
        }
    }
    assert!(saw_cancelled);
}

//! Batch coordinator: one command fanned out to many cameras.
//!
//! Each target gets its own `send_command` call and all of them run
//! concurrently; per-device dispatch is already independent, so the fan-out
//! never serialises devices behind each other.  A device failing is recorded
//! as a failed [`CommandResult`] and never aborts its siblings.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime};

use camlink_core::{Command, CommandKind, DeviceId};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::control::{CameraController, CommandResult};
use crate::application::events::{BatchEvent, EventPublisher, DEFAULT_EVENT_CAPACITY};

/// Finished batches kept for inspection by default.
pub const DEFAULT_MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
    /// Cancelled by the caller.  In-flight commands still settle and their
    /// results are still recorded.
    Cancelled,
}

/// Aggregate record of one broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOperation {
    pub id: Uuid,
    pub command_kind: CommandKind,
    /// De-duplicated targets in request order.
    pub target_devices: Vec<DeviceId>,
    pub per_device_results: BTreeMap<DeviceId, CommandResult>,
    /// `settled / targets * 100`.
    pub progress_percent: f64,
    pub status: BatchStatus,
    pub started_at: SystemTime,
    pub finished_at: Option<SystemTime>,
}

impl BatchOperation {
    fn new(id: Uuid, command_kind: CommandKind, target_devices: Vec<DeviceId>) -> Self {
        Self {
            id,
            command_kind,
            target_devices,
            per_device_results: BTreeMap::new(),
            progress_percent: 0.0,
            status: BatchStatus::Running,
            started_at: SystemTime::now(),
            finished_at: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.per_device_results.values().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.per_device_results.values().filter(|r| !r.success).count()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn result_for(&self, device_id: &DeviceId) -> Option<&CommandResult> {
        self.per_device_results.get(device_id)
    }

    fn settle(&mut self, device_id: DeviceId, result: CommandResult) {
        self.per_device_results.insert(device_id, result);
        self.progress_percent = if self.target_devices.is_empty() {
            100.0
        } else {
            self.per_device_results.len() as f64 / self.target_devices.len() as f64 * 100.0
        };
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch {0} not found")]
    NotFound(Uuid),

    #[error("batch {0} has already finished")]
    AlreadyFinished(Uuid),

    #[error("batch task failed: {0}")]
    Join(String),
}

/// A broadcast running on its own task.
#[derive(Debug)]
pub struct BatchHandle {
    id: Uuid,
    join: JoinHandle<Result<BatchOperation, BatchError>>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits until every target has settled.
    pub async fn wait(self) -> Result<BatchOperation, BatchError> {
        self.join.await.map_err(|e| BatchError::Join(e.to_string()))?
    }
}

#[derive(Default)]
struct Registry {
    running: HashMap<Uuid, BatchOperation>,
    finished: VecDeque<BatchOperation>,
}

struct CoordinatorInner {
    controller: CameraController,
    registry: Mutex<Registry>,
    max_history: usize,
    events: EventPublisher<BatchEvent>,
}

/// Fans commands out through a [`CameraController`].  Cheap to clone.
#[derive(Clone)]
pub struct BatchCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl BatchCoordinator {
    pub fn new(controller: CameraController, max_history: usize) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                controller,
                registry: Mutex::new(Registry::default()),
                max_history,
                events: EventPublisher::new(DEFAULT_EVENT_CAPACITY),
            }),
        }
    }

    /// Sends `command` to every device in `device_ids` and returns once all of
    /// them have settled.  Each device receives its own copy of the command
    /// with a fresh id.
    ///
    /// Precondition failures (`NotRegistered`, `DeviceUnresponsive`) are
    /// recorded as failed results like any other failure.
    pub async fn broadcast(
        &self,
        device_ids: &[DeviceId],
        command: Command,
    ) -> Result<BatchOperation, BatchError> {
        let targets = dedupe(device_ids);
        let id = self.begin(&targets, command.kind);
        self.run(id, targets, command).await
    }

    /// Like [`broadcast`](Self::broadcast) but runs on a spawned task, so the
    /// batch id is known (and cancellable) before any device settles.
    pub fn spawn_broadcast(&self, device_ids: &[DeviceId], command: Command) -> BatchHandle {
        let targets = dedupe(device_ids);
        let id = self.begin(&targets, command.kind);
        let coordinator = self.clone();
        let join = tokio::spawn(async move { coordinator.run(id, targets, command).await });
        BatchHandle { id, join }
    }

    pub async fn start_recording_all(&self, device_ids: &[DeviceId]) -> Result<BatchOperation, BatchError> {
        self.broadcast(device_ids, Command::new(CommandKind::RecordingStart))
            .await
    }

    pub async fn stop_recording_all(&self, device_ids: &[DeviceId]) -> Result<BatchOperation, BatchError> {
        self.broadcast(device_ids, Command::new(CommandKind::RecordingStop))
            .await
    }

    pub async fn update_setting_all(
        &self,
        device_ids: &[DeviceId],
        name: &str,
        value: Value,
    ) -> Result<BatchOperation, BatchError> {
        self.broadcast(device_ids, Command::set_setting(name, value))
            .await
    }

    /// Marks a running batch cancelled.  Commands already queued keep running
    /// and their results are still recorded; the batch simply never reports
    /// `Completed`.
    ///
    /// # Errors
    ///
    /// - [`BatchError::AlreadyFinished`] if every device has already settled.
    /// - [`BatchError::NotFound`] for an unknown id.
    pub fn cancel(&self, batch_id: Uuid) -> Result<(), BatchError> {
        {
            let mut guard = self.registry();
            let registry = &mut *guard;
            match registry.running.get_mut(&batch_id) {
                Some(op) if op.status == BatchStatus::Cancelled => return Ok(()),
                Some(op) => op.status = BatchStatus::Cancelled,
                None if registry.finished.iter().any(|op| op.id == batch_id) => {
                    return Err(BatchError::AlreadyFinished(batch_id));
                }
                None => return Err(BatchError::NotFound(batch_id)),
            }
        }
        info!(batch = %batch_id, "batch cancelled");
        self.inner.events.publish(BatchEvent::Cancelled { batch_id });
        Ok(())
    }

    /// Snapshot of a running or retained batch.
    pub fn get(&self, batch_id: Uuid) -> Option<BatchOperation> {
        let registry = self.registry();
        registry
            .running
            .get(&batch_id)
            .or_else(|| registry.finished.iter().find(|op| op.id == batch_id))
            .cloned()
    }

    /// Ids of batches still waiting on at least one device.
    pub fn active(&self) -> Vec<Uuid> {
        self.registry().running.keys().copied().collect()
    }

    /// Finished batches, oldest first.
    pub fn history(&self) -> Vec<BatchOperation> {
        self.registry().finished.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn begin(&self, targets: &[DeviceId], kind: CommandKind) -> Uuid {
        let id = Uuid::new_v4();
        self.registry()
            .running
            .insert(id, BatchOperation::new(id, kind, targets.to_vec()));
        info!(batch = %id, %kind, targets = targets.len(), "batch started");
        self.inner.events.publish(BatchEvent::Started {
            batch_id: id,
            kind,
            targets: targets.len(),
        });
        id
    }

    async fn run(&self, id: Uuid, targets: Vec<DeviceId>, command: Command) -> Result<BatchOperation, BatchError> {
        let _abandon = AbandonGuard { coordinator: self, id };
        let mut in_flight: FuturesUnordered<_> = targets
            .into_iter()
            .map(|device_id| {
                let controller = self.inner.controller.clone();
                let command = command.duplicate();
                async move {
                    let started = Instant::now();
                    let result = match controller.send_command(&device_id, command.clone()).await {
                        Ok(result) => result,
                        Err(error) => CommandResult::failed(&device_id, &command, error, started.elapsed()),
                    };
                    (device_id, result)
                }
            })
            .collect();

        while let Some((device_id, result)) = in_flight.next().await {
            self.record(id, device_id, result);
        }
        self.finish(id)
    }

    fn record(&self, id: Uuid, device_id: DeviceId, result: CommandResult) {
        let event = {
            let mut registry = self.registry();
            let Some(op) = registry.running.get_mut(&id) else {
                return;
            };
            let success = result.success;
            op.settle(device_id.clone(), result);
            BatchEvent::Progress {
                batch_id: id,
                device_id,
                success,
                progress_percent: op.progress_percent,
            }
        };
        if let BatchEvent::Progress { device_id, success, progress_percent, .. } = &event {
            debug!(batch = %id, device = %device_id, success, progress = progress_percent, "batch progress");
        }
        self.inner.events.publish(event);
    }

    fn finish(&self, id: Uuid) -> Result<BatchOperation, BatchError> {
        let operation = {
            let mut registry = self.registry();
            let mut op = registry.running.remove(&id).ok_or(BatchError::NotFound(id))?;
            op.progress_percent = 100.0;
            op.finished_at = Some(SystemTime::now());
            if op.status == BatchStatus::Running {
                op.status = BatchStatus::Completed;
            }
            self.retire(&mut registry, op.clone());
            op
        };

        info!(
            batch = %id,
            succeeded = operation.succeeded(),
            failed = operation.failed(),
            status = ?operation.status,
            "batch finished"
        );
        if operation.status == BatchStatus::Completed {
            self.inner.events.publish(BatchEvent::Completed {
                batch_id: id,
                succeeded: operation.succeeded(),
                failed: operation.failed(),
            });
        }
        Ok(operation)
    }

    /// Moves a batch whose future was dropped before every device settled
    /// into history as cancelled.  No-op once the batch has finished.
    fn abandon(&self, id: Uuid) {
        {
            let mut registry = self.registry();
            let Some(mut op) = registry.running.remove(&id) else {
                return;
            };
            op.status = BatchStatus::Cancelled;
            op.finished_at = Some(SystemTime::now());
            self.retire(&mut registry, op);
        }
        warn!(batch = %id, "batch dropped before all devices settled");
        self.inner.events.publish(BatchEvent::Cancelled { batch_id: id });
    }

    fn retire(&self, registry: &mut Registry, op: BatchOperation) {
        registry.finished.push_back(op);
        while registry.finished.len() > self.inner.max_history {
            registry.finished.pop_front();
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct AbandonGuard<'a> {
    coordinator: &'a BatchCoordinator,
    id: Uuid,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.abandon(self.id);
    }
}

fn dedupe(device_ids: &[DeviceId]) -> Vec<DeviceId> {
    let mut seen = HashSet::new();
    device_ids
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

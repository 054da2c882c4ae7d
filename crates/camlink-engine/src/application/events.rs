//! Typed event streams published by the controller and the batch coordinator.
//!
//! Subscribers receive every event published after they subscribe.  A slow
//! subscriber that falls more than the channel capacity behind observes
//! `RecvError::Lagged` and skips ahead; publishers never block.

use camlink_core::{CommandId, CommandKind, DeviceId, NotificationKind, Parameters};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Default capacity of each event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Thin wrapper over a `broadcast` sender that tolerates having no subscribers.
#[derive(Debug, Clone)]
pub struct EventPublisher<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventPublisher<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes `event` to every current subscriber.
    pub fn publish(&self, event: E) {
        if self.tx.send(event).is_err() {
            trace!("event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }
}

/// Observable side effects of the control facade.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ControlEvent {
    CommandSuccess {
        device_id: DeviceId,
        command_id: CommandId,
        kind: CommandKind,
        execution_time_ms: u64,
    },
    CommandError {
        device_id: DeviceId,
        command_id: CommandId,
        kind: CommandKind,
        error: String,
    },
    SettingUpdated {
        device_id: DeviceId,
        name: String,
        value: serde_json::Value,
    },
    RecordingStarted {
        device_id: DeviceId,
    },
    RecordingStopped {
        device_id: DeviceId,
    },
    DeviceRegistered {
        device_id: DeviceId,
    },
    DeviceUnregistered {
        device_id: DeviceId,
    },
    /// A command exhausted its retries without any answer.
    DeviceUnresponsive {
        device_id: DeviceId,
    },
    /// A previously unresponsive device answered again.
    DeviceResponsive {
        device_id: DeviceId,
    },
    /// An unsolicited camera notification, re-emitted after its state effects
    /// were applied.
    Notification {
        device_id: DeviceId,
        kind: NotificationKind,
        data: Parameters,
    },
}

impl ControlEvent {
    /// Kebab-case event name, e.g. `"command-success"`.  Notifications use
    /// the notification's own name (`"battery-low"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::CommandSuccess { .. } => "command-success",
            ControlEvent::CommandError { .. } => "command-error",
            ControlEvent::SettingUpdated { .. } => "setting-updated",
            ControlEvent::RecordingStarted { .. } => "recording-started",
            ControlEvent::RecordingStopped { .. } => "recording-stopped",
            ControlEvent::DeviceRegistered { .. } => "device-registered",
            ControlEvent::DeviceUnregistered { .. } => "device-unregistered",
            ControlEvent::DeviceUnresponsive { .. } => "device-unresponsive",
            ControlEvent::DeviceResponsive { .. } => "device-responsive",
            ControlEvent::Notification { kind, .. } => kind.name(),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        match self {
            ControlEvent::CommandSuccess { device_id, .. }
            | ControlEvent::CommandError { device_id, .. }
            | ControlEvent::SettingUpdated { device_id, .. }
            | ControlEvent::RecordingStarted { device_id }
            | ControlEvent::RecordingStopped { device_id }
            | ControlEvent::DeviceRegistered { device_id }
            | ControlEvent::DeviceUnregistered { device_id }
            | ControlEvent::DeviceUnresponsive { device_id }
            | ControlEvent::DeviceResponsive { device_id }
            | ControlEvent::Notification { device_id, .. } => device_id,
        }
    }
}

/// Lifecycle of a multi-device batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BatchEvent {
    Started {
        batch_id: Uuid,
        kind: CommandKind,
        targets: usize,
    },
    /// One device settled.
    Progress {
        batch_id: Uuid,
        device_id: DeviceId,
        success: bool,
        progress_percent: f64,
    },
    Completed {
        batch_id: Uuid,
        succeeded: usize,
        failed: usize,
    },
    Cancelled {
        batch_id: Uuid,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> Uuid {
        match self {
            BatchEvent::Started { batch_id, .. }
            | BatchEvent::Progress { batch_id, .. }
            | BatchEvent::Completed { batch_id, .. }
            | BatchEvent::Cancelled { batch_id } => *batch_id,
        }
    }
}

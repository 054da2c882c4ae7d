//! CameraController: the public control surface over many cameras.
//!
//! The controller owns one [`DeviceState`] and one [`DeviceCommandQueue`] per
//! registered camera.  Callers hand it commands; it checks preconditions,
//! queues them, waits for settlement, and applies side effects to the cached
//! state before returning a [`CommandResult`].
//!
//! Inbound bytes take the reverse path: the transport callback feeds the
//! device's [`FrameAssembler`], decoded notifications update the cached state,
//! and every message is handed to the [`ResponseCorrelator`].
//!
//! # Failure reporting
//!
//! Precondition failures (`NotRegistered`, `DeviceUnresponsive`) are returned
//! as `Err` before anything reaches the transport.  Once a command has been
//! queued, its failure is data: `send_command` returns `Ok(CommandResult)`
//! with `success == false`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use camlink_core::protocol::FrameAssembler;
use camlink_core::{
    Command, CommandId, CommandKind, DeviceId, DeviceMessage, DeviceState, NotificationKind,
    Parameters, Priority,
};
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::application::command_queue::{DeviceCommandQueue, QueueConfig, QueueError, QueueStats};
use crate::application::correlator::{NotificationSubscription, ResponseCorrelator};
use crate::application::events::{ControlEvent, EventPublisher, DEFAULT_EVENT_CAPACITY};
use crate::application::transport::{NotificationCallback, Transport};

/// Queries issued after registration to populate the cached state.
const INITIALIZATION_QUERIES: [CommandKind; 3] = [
    CommandKind::GetBatteryLevel,
    CommandKind::GetFirmwareVersion,
    CommandKind::GetStatus,
];

/// Controller tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub queue: QueueConfig,
    /// Run the LOW-priority initialization queries after registration.
    pub initialize_on_register: bool,
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            initialize_on_register: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Error type for controller operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("device {0} is not registered")]
    NotRegistered(DeviceId),

    #[error("device {0} is already registered")]
    AlreadyRegistered(DeviceId),

    /// The device timed out earlier and the command was not forced.
    #[error("device {0} is not responding")]
    DeviceUnresponsive(DeviceId),

    #[error("no response after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("device error 0x{code:04X}: {message}")]
    Device { code: u16, message: String },

    #[error("device {device} did not report a value for {name}")]
    MissingValue { device: DeviceId, name: String },

    #[error(transparent)]
    Queue(QueueError),
}

impl ControlError {
    fn from_queue(device_id: &DeviceId, error: QueueError) -> Self {
        match error {
            QueueError::Timeout { attempts } => ControlError::Timeout { attempts },
            QueueError::Device { code, message } => ControlError::Device { code, message },
            QueueError::Unregistered => ControlError::NotRegistered(device_id.clone()),
            other => ControlError::Queue(other),
        }
    }
}

/// Outcome record of one command on one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub command_id: CommandId,
    pub device_id: DeviceId,
    pub kind: CommandKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Parameters>,
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ControlError>,
    pub execution_time_ms: u64,
    /// Milliseconds since the Unix epoch when the command settled.
    pub timestamp_ms: u64,
}

impl CommandResult {
    pub fn succeeded(device_id: &DeviceId, command: &Command, response: Parameters, elapsed: Duration) -> Self {
        Self {
            command_id: command.id,
            device_id: device_id.clone(),
            kind: command.kind,
            success: true,
            response: Some(response),
            error: None,
            execution_time_ms: elapsed.as_millis() as u64,
            timestamp_ms: now_ms(),
        }
    }

    pub fn failed(device_id: &DeviceId, command: &Command, error: ControlError, elapsed: Duration) -> Self {
        Self {
            command_id: command.id,
            device_id: device_id.clone(),
            kind: command.kind,
            success: false,
            response: None,
            error: Some(error),
            execution_time_ms: elapsed.as_millis() as u64,
            timestamp_ms: now_ms(),
        }
    }

    /// Converts the record back into a `Result`.
    pub fn into_response(self) -> Result<Parameters, ControlError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.response.unwrap_or_default()),
        }
    }
}

fn serialize_error<S: Serializer>(error: &Option<ControlError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct DeviceHandle {
    state: Mutex<DeviceState>,
    assembler: Mutex<FrameAssembler>,
    queue: DeviceCommandQueue,
}

struct ControllerInner {
    config: ControllerConfig,
    transport: Arc<dyn Transport>,
    correlator: Arc<ResponseCorrelator>,
    devices: RwLock<HashMap<DeviceId, Arc<DeviceHandle>>>,
    events: EventPublisher<ControlEvent>,
}

/// Multi-camera control facade.  Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CameraController {
    inner: Arc<ControllerInner>,
}

impl CameraController {
    pub fn new(transport: Arc<dyn Transport>, config: ControllerConfig) -> Self {
        let correlator = Arc::new(ResponseCorrelator::new(config.event_capacity));
        let events = EventPublisher::new(config.event_capacity);
        Self {
            inner: Arc::new(ControllerInner {
                config,
                transport,
                correlator,
                devices: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Creates the device's state and queue and subscribes to its
    /// notifications.
    ///
    /// When `initialize_on_register` is set, the battery, firmware, and status
    /// queries run in the background at LOW priority.  Their failures are
    /// logged and never undo the registration.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::AlreadyRegistered`] for a known device.
    pub fn register_device(&self, device_id: DeviceId) -> Result<(), ControlError> {
        {
            let mut devices = self.inner.write_devices();
            if devices.contains_key(&device_id) {
                return Err(ControlError::AlreadyRegistered(device_id));
            }
            let queue = DeviceCommandQueue::spawn(
                device_id.clone(),
                self.inner.config.queue.clone(),
                Arc::clone(&self.inner.transport),
                Arc::clone(&self.inner.correlator),
            );
            devices.insert(
                device_id.clone(),
                Arc::new(DeviceHandle {
                    state: Mutex::new(DeviceState::new(device_id.clone())),
                    assembler: Mutex::new(FrameAssembler::new()),
                    queue,
                }),
            );
        }

        let weak = Arc::downgrade(&self.inner);
        let source = device_id.clone();
        let callback: NotificationCallback = Arc::new(move |bytes: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_inbound(&source, bytes);
            }
        });
        self.inner.transport.on_notification(&device_id, callback);

        info!(device = %device_id, "device registered");
        self.inner.events.publish(ControlEvent::DeviceRegistered {
            device_id: device_id.clone(),
        });

        if self.inner.config.initialize_on_register {
            let controller = self.clone();
            tokio::spawn(async move {
                controller.initialize_device(&device_id).await;
            });
        }
        Ok(())
    }

    /// Runs the initialization queries sequentially and returns their results.
    /// Stops early if a precondition fails (for example the device became
    /// unresponsive during the sequence).
    pub async fn initialize_device(&self, device_id: &DeviceId) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(INITIALIZATION_QUERIES.len());
        for kind in INITIALIZATION_QUERIES {
            let command = Command::new(kind).with_priority(Priority::Low);
            match self.send_command(device_id, command).await {
                Ok(result) => {
                    if let Some(error) = &result.error {
                        warn!(device = %device_id, %kind, "initialization query failed: {error}");
                    }
                    results.push(result);
                }
                Err(e) => {
                    warn!(device = %device_id, "initialization stopped: {e}");
                    break;
                }
            }
        }
        debug!(device = %device_id, completed = results.len(), "initialization finished");
        results
    }

    /// Removes the device.  Every queued and in-flight command settles with
    /// [`ControlError::NotRegistered`] before this returns; late frames from
    /// the device are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotRegistered`] for an unknown device.
    pub async fn unregister_device(&self, device_id: &DeviceId) -> Result<(), ControlError> {
        let handle = self
            .inner
            .write_devices()
            .remove(device_id)
            .ok_or_else(|| ControlError::NotRegistered(device_id.clone()))?;

        let rejected = handle.queue.shutdown();
        lock(&handle.assembler).clear();

        if let Err(e) = self.inner.transport.disconnect(device_id).await {
            warn!(device = %device_id, "disconnect failed: {e}");
        }

        info!(device = %device_id, rejected, "device unregistered");
        self.inner.events.publish(ControlEvent::DeviceUnregistered {
            device_id: device_id.clone(),
        });
        Ok(())
    }

    /// Unregisters every device.
    pub async fn shutdown(&self) {
        for device_id in self.registered_devices() {
            if let Err(e) = self.unregister_device(&device_id).await {
                debug!(device = %device_id, "{e}");
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Queues `command` for the device and waits for it to settle.
    ///
    /// # Errors
    ///
    /// - [`ControlError::NotRegistered`] for an unknown device.
    /// - [`ControlError::DeviceUnresponsive`] when the device is marked
    ///   unresponsive and the command is not forced.
    pub async fn send_command(
        &self,
        device_id: &DeviceId,
        command: Command,
    ) -> Result<CommandResult, ControlError> {
        let handle = self.inner.handle(device_id)?;
        if !command.force_execution && !lock(&handle.state).is_responding {
            return Err(ControlError::DeviceUnresponsive(device_id.clone()));
        }
        Ok(self.inner.execute(device_id, &handle, command).await)
    }

    /// Changes one setting.  The cached value is updated only on success.
    pub async fn update_setting(
        &self,
        device_id: &DeviceId,
        name: &str,
        value: Value,
    ) -> Result<(), ControlError> {
        self.send_command(device_id, Command::set_setting(name, value))
            .await?
            .into_response()
            .map(|_| ())
    }

    /// Returns the cached value, querying the device only on a cache miss.
    pub async fn get_setting(&self, device_id: &DeviceId, name: &str) -> Result<Value, ControlError> {
        let handle = self.inner.handle(device_id)?;
        let cached = lock(&handle.state).cached_settings.get(name).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }

        let command = Command::new(CommandKind::GetSetting).with_param("name", name);
        let body = self.send_command(device_id, command).await?.into_response()?;
        body.get("value").cloned().ok_or_else(|| ControlError::MissingValue {
            device: device_id.clone(),
            name: name.to_string(),
        })
    }

    pub async fn start_recording(&self, device_id: &DeviceId) -> Result<(), ControlError> {
        self.send_command(device_id, Command::new(CommandKind::RecordingStart))
            .await?
            .into_response()
            .map(|_| ())
    }

    pub async fn stop_recording(&self, device_id: &DeviceId) -> Result<(), ControlError> {
        self.send_command(device_id, Command::new(CommandKind::RecordingStop))
            .await?
            .into_response()
            .map(|_| ())
    }

    /// Asks the device for its status and merges the reported fields into the
    /// cached state.
    pub async fn query_status(&self, device_id: &DeviceId) -> Result<Parameters, ControlError> {
        self.send_command(device_id, Command::new(CommandKind::GetStatus))
            .await?
            .into_response()
    }

    /// Sends a forced HIGH-priority heartbeat.  An answer marks the device
    /// responsive again.  Returns the round-trip time.
    pub async fn ping(&self, device_id: &DeviceId) -> Result<Duration, ControlError> {
        let command = Command::new(CommandKind::Heartbeat)
            .with_priority(Priority::High)
            .forced();
        let result = self.send_command(device_id, command).await?;
        let elapsed = Duration::from_millis(result.execution_time_ms);
        result.into_response().map(|_| elapsed)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn device_state(&self, device_id: &DeviceId) -> Result<DeviceState, ControlError> {
        let handle = self.inner.handle(device_id)?;
        let state = lock(&handle.state).clone();
        Ok(state)
    }

    pub fn queue_stats(&self, device_id: &DeviceId) -> Result<QueueStats, ControlError> {
        Ok(self.inner.handle(device_id)?.queue.stats())
    }

    pub fn is_registered(&self, device_id: &DeviceId) -> bool {
        self.inner.read_devices().contains_key(device_id)
    }

    /// Registered device ids in sorted order.
    pub fn registered_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.inner.read_devices().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Subscribes to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribes to raw camera notifications, optionally filtered.
    pub fn subscribe_notifications(
        &self,
        device: Option<DeviceId>,
        kind: Option<NotificationKind>,
    ) -> NotificationSubscription {
        self.inner.correlator.subscribe(device, kind)
    }
}

impl ControllerInner {
    fn handle(&self, device_id: &DeviceId) -> Result<Arc<DeviceHandle>, ControlError> {
        self.read_devices()
            .get(device_id)
            .cloned()
            .ok_or_else(|| ControlError::NotRegistered(device_id.clone()))
    }

    async fn execute(&self, device_id: &DeviceId, handle: &DeviceHandle, command: Command) -> CommandResult {
        let started = Instant::now();
        let outcome = handle.queue.enqueue(command.clone()).wait().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(body) => {
                self.apply_success(device_id, handle, &command, &body);
                self.events.publish(ControlEvent::CommandSuccess {
                    device_id: device_id.clone(),
                    command_id: command.id,
                    kind: command.kind,
                    execution_time_ms: elapsed.as_millis() as u64,
                });
                CommandResult::succeeded(device_id, &command, body, elapsed)
            }
            Err(error) => {
                let timed_out = matches!(error, QueueError::Timeout { .. });
                let error = ControlError::from_queue(device_id, error);
                lock(&handle.state).last_command_time = Some(SystemTime::now());
                if timed_out {
                    self.mark_unresponsive(device_id, handle);
                }
                debug!(device = %device_id, kind = %command.kind, "command failed: {error}");
                self.events.publish(ControlEvent::CommandError {
                    device_id: device_id.clone(),
                    command_id: command.id,
                    kind: command.kind,
                    error: error.to_string(),
                });
                CommandResult::failed(device_id, &command, error, elapsed)
            }
        }
    }

    /// State changes implied by a successful command, keyed by its kind.
    fn apply_success(&self, device_id: &DeviceId, handle: &DeviceHandle, command: &Command, body: &Parameters) {
        let mut events = Vec::new();
        {
            let mut state = lock(&handle.state);
            state.last_command_time = Some(SystemTime::now());
            if !state.is_responding {
                state.is_responding = true;
                info!(device = %device_id, "device responsive again");
                events.push(ControlEvent::DeviceResponsive {
                    device_id: device_id.clone(),
                });
            }

            match command.kind {
                CommandKind::RecordingStart => {
                    state.is_recording = true;
                    events.push(ControlEvent::RecordingStarted {
                        device_id: device_id.clone(),
                    });
                }
                CommandKind::RecordingStop => {
                    state.is_recording = false;
                    events.push(ControlEvent::RecordingStopped {
                        device_id: device_id.clone(),
                    });
                }
                CommandKind::GetSetting => {
                    let name = command.parameters.get("name").and_then(Value::as_str);
                    if let (Some(name), Some(value)) = (name, body.get("value")) {
                        state.cached_settings.insert(name.to_string(), value.clone());
                    }
                }
                CommandKind::GetStatus
                | CommandKind::GetBatteryLevel
                | CommandKind::GetFirmwareVersion
                | CommandKind::GetStorageInfo => merge_reported_fields(&mut state, body),
                _ => {}
            }

            if let Some(name) = command.target_setting() {
                if let Some(value) = command.parameters.get("value") {
                    state.cached_settings.insert(name.clone(), value.clone());
                    events.push(ControlEvent::SettingUpdated {
                        device_id: device_id.clone(),
                        name,
                        value: value.clone(),
                    });
                }
            }
        }
        for event in events {
            self.events.publish(event);
        }
    }

    fn mark_unresponsive(&self, device_id: &DeviceId, handle: &DeviceHandle) {
        let was_responding = {
            let mut state = lock(&handle.state);
            std::mem::replace(&mut state.is_responding, false)
        };
        if was_responding {
            warn!(device = %device_id, "device marked unresponsive");
            self.events.publish(ControlEvent::DeviceUnresponsive {
                device_id: device_id.clone(),
            });
        }
    }

    /// Transport callback body.  Runs on whatever thread the transport uses.
    fn handle_inbound(&self, device_id: &DeviceId, bytes: &[u8]) {
        let Some(handle) = self.read_devices().get(device_id).cloned() else {
            debug!(device = %device_id, len = bytes.len(), "dropping bytes from unregistered device");
            return;
        };

        let messages = lock(&handle.assembler).push(device_id, bytes);
        for message in messages {
            if let DeviceMessage::Notification { kind, data, .. } = &message {
                self.apply_notification(device_id, &handle, *kind, data);
            }
            self.correlator.route(device_id, message);
        }
    }

    fn apply_notification(
        &self,
        device_id: &DeviceId,
        handle: &DeviceHandle,
        kind: NotificationKind,
        data: &Parameters,
    ) {
        let mut events = Vec::new();
        {
            let mut state = lock(&handle.state);
            match kind {
                NotificationKind::RecordingStarted if !state.is_recording => {
                    state.is_recording = true;
                    events.push(ControlEvent::RecordingStarted {
                        device_id: device_id.clone(),
                    });
                }
                NotificationKind::RecordingStopped if state.is_recording => {
                    state.is_recording = false;
                    events.push(ControlEvent::RecordingStopped {
                        device_id: device_id.clone(),
                    });
                }
                NotificationKind::BatteryLevel | NotificationKind::BatteryLow => {
                    if let Some(level) = data.get("level").or_else(|| data.get("battery_level")) {
                        state
                            .cached_settings
                            .insert("battery_level".to_string(), level.clone());
                    }
                }
                NotificationKind::SettingChanged => {
                    let name = data.get("name").and_then(Value::as_str);
                    if let (Some(name), Some(value)) = (name, data.get("value")) {
                        state.cached_settings.insert(name.to_string(), value.clone());
                        events.push(ControlEvent::SettingUpdated {
                            device_id: device_id.clone(),
                            name: name.to_string(),
                            value: value.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        if matches!(kind, NotificationKind::BatteryLow | NotificationKind::StorageFull | NotificationKind::OverheatWarning) {
            warn!(device = %device_id, notification = %kind, "camera warning");
        }
        events.push(ControlEvent::Notification {
            device_id: device_id.clone(),
            kind,
            data: data.clone(),
        });
        for event in events {
            self.events.publish(event);
        }
    }

    fn read_devices(&self) -> RwLockReadGuard<'_, HashMap<DeviceId, Arc<DeviceHandle>>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_devices(&self) -> RwLockWriteGuard<'_, HashMap<DeviceId, Arc<DeviceHandle>>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Folds query answers into the cached state.  A boolean `recording` field
/// updates the recording flag; every other field is cached as-is.
fn merge_reported_fields(state: &mut DeviceState, body: &Parameters) {
    for (key, value) in body {
        match (key.as_str(), value.as_bool()) {
            ("recording", Some(recording)) => state.is_recording = recording,
            _ => {
                state.cached_settings.insert(key.clone(), value.clone());
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

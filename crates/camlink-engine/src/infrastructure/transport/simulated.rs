//! In-process camera simulator behind the [`Transport`] port.
//!
//! Each simulated camera decodes the frames written to it, updates its own
//! state (recording flag, settings), and answers with a RESPONSE, ERROR, or
//! HEARTBEAT frame through the installed notification callback.  Replies are
//! delivered after the configured latency, optionally split into chunks to
//! exercise frame reassembly.
//!
//! Per-camera [`CameraBehavior`] injects failures deterministically: a camera
//! can stay silent, drop its first N answers, or reject every command.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use camlink_core::protocol::{decode_frame, encode_message, parse_frame, MessageType};
use camlink_core::{
    CommandKind, DeviceErrorInfo, DeviceId, DeviceMessage, NotificationKind, Parameters,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::application::transport::{NotificationCallback, Transport, TransportError};

/// ERROR frame codes produced by the simulator.
pub const ERR_MISSING_PARAMETER: u16 = 0x0001;
pub const ERR_UNKNOWN_SETTING: u16 = 0x0002;
pub const ERR_UNSUPPORTED_COMMAND: u16 = 0x0004;

/// How a simulated camera answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CameraBehavior {
    #[default]
    Responsive,
    /// Never answers; every command times out.
    Silent,
    /// Ignores the first `count` frames, then answers normally.
    DropFirst { count: u32 },
    /// Answers every command with an ERROR frame.  Heartbeats are still echoed.
    Reject { code: u16, message: String },
}

/// Observable state of one simulated camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedCamera {
    pub recording: bool,
    pub battery_level: u8,
    pub firmware_version: String,
    pub storage_free_mb: u64,
    pub storage_total_mb: u64,
    pub settings: Parameters,
    pub connected: bool,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        let mut settings = Parameters::new();
        settings.insert("iso".into(), json!(800));
        settings.insert("shutter_speed".into(), json!("1/50"));
        settings.insert("aperture".into(), json!(2.8));
        settings.insert("white_balance".into(), json!(5600));
        settings.insert("resolution".into(), json!("4K"));
        settings.insert("frame_rate".into(), json!(24));
        settings.insert("codec".into(), json!("ProRes 422"));
        Self {
            recording: false,
            battery_level: 87,
            firmware_version: "2.4.1".to_string(),
            storage_free_mb: 412_000,
            storage_total_mb: 512_000,
            settings,
            connected: true,
        }
    }
}

/// One frame the simulator received, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFrame {
    pub message_type: MessageType,
    pub command_code: u16,
    pub sequence_number: u16,
    pub kind: CommandKind,
    pub parameters: Parameters,
}

#[derive(Debug, Default)]
struct CameraSlot {
    camera: SimulatedCamera,
    behavior: CameraBehavior,
    dropped: u32,
    notification_sequence: u16,
}

impl CameraSlot {
    fn answer(&mut self, message: DeviceMessage) -> Option<DeviceMessage> {
        let (kind, sequence_number, parameters) = match message {
            DeviceMessage::Command {
                kind,
                sequence_number,
                parameters,
            } => (kind, sequence_number, parameters),
            DeviceMessage::Heartbeat { sequence_number } => (CommandKind::Heartbeat, sequence_number, Parameters::new()),
            other => {
                debug!(?other, "simulator ignoring non-command frame");
                return None;
            }
        };

        match &self.behavior {
            CameraBehavior::Silent => return None,
            CameraBehavior::DropFirst { count } if self.dropped < *count => {
                self.dropped += 1;
                return None;
            }
            CameraBehavior::Reject { code, message } if kind != CommandKind::Heartbeat => {
                return Some(DeviceMessage::Error {
                    kind,
                    sequence_number,
                    error: DeviceErrorInfo {
                        code: *code,
                        message: message.clone(),
                    },
                });
            }
            _ => {}
        }

        if kind == CommandKind::Heartbeat {
            return Some(DeviceMessage::Heartbeat { sequence_number });
        }

        Some(match self.execute(kind, &parameters) {
            Ok(body) => DeviceMessage::Response {
                kind,
                sequence_number,
                body,
            },
            Err(error) => DeviceMessage::Error {
                kind,
                sequence_number,
                error,
            },
        })
    }

    fn execute(&mut self, kind: CommandKind, parameters: &Parameters) -> Result<Parameters, DeviceErrorInfo> {
        let camera = &mut self.camera;
        let mut body = Parameters::new();
        match kind {
            CommandKind::GetStatus => {
                body.insert("recording".into(), json!(camera.recording));
                body.insert("battery_level".into(), json!(camera.battery_level));
                body.insert("storage_free_mb".into(), json!(camera.storage_free_mb));
            }
            CommandKind::GetBatteryLevel => {
                body.insert("battery_level".into(), json!(camera.battery_level));
            }
            CommandKind::GetFirmwareVersion => {
                body.insert("firmware_version".into(), json!(camera.firmware_version));
            }
            CommandKind::GetStorageInfo => {
                body.insert("storage_free_mb".into(), json!(camera.storage_free_mb));
                body.insert("storage_total_mb".into(), json!(camera.storage_total_mb));
            }
            CommandKind::GetSetting => {
                let name = required_str(parameters, "name")?;
                let value = camera.settings.get(name).cloned().ok_or_else(|| DeviceErrorInfo {
                    code: ERR_UNKNOWN_SETTING,
                    message: format!("unknown setting {name}"),
                })?;
                body.insert("name".into(), json!(name));
                body.insert("value".into(), value);
            }
            CommandKind::RecordingStart | CommandKind::RecordingStop => {
                camera.recording = kind == CommandKind::RecordingStart;
                body.insert("recording".into(), json!(camera.recording));
            }
            _ if kind.is_setting_change() => {
                let name = match kind.setting_name() {
                    Some(name) => name.to_string(),
                    None => required_str(parameters, "name")?.to_string(),
                };
                let value = parameters.get("value").cloned().ok_or_else(|| missing("value"))?;
                camera.settings.insert(name.clone(), value.clone());
                body.insert("name".into(), json!(name));
                body.insert("value".into(), value);
            }
            _ => {
                return Err(DeviceErrorInfo {
                    code: ERR_UNSUPPORTED_COMMAND,
                    message: format!("unsupported command 0x{:04X}", kind.code()),
                })
            }
        }
        Ok(body)
    }
}

fn required_str<'a>(parameters: &'a Parameters, key: &str) -> Result<&'a str, DeviceErrorInfo> {
    parameters.get(key).and_then(Value::as_str).ok_or_else(|| missing(key))
}

fn missing(key: &str) -> DeviceErrorInfo {
    DeviceErrorInfo {
        code: ERR_MISSING_PARAMETER,
        message: format!("missing parameter {key}"),
    }
}

/// Deterministic multi-camera simulator.
#[derive(Default)]
pub struct SimulatedTransport {
    latency: Duration,
    chunk_size: Option<usize>,
    cameras: Mutex<HashMap<DeviceId, CameraSlot>>,
    callbacks: Mutex<HashMap<DeviceId, NotificationCallback>>,
    written: Mutex<Vec<(DeviceId, WrittenFrame)>>,
}

impl SimulatedTransport {
    /// Simulator whose replies arrive `latency` after each write.  With zero
    /// latency, replies are delivered from inside `write`.
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Splits every delivery into notifications of at most `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Adds (or resets) a responsive camera.
    pub fn add_camera(&self, device_id: impl Into<DeviceId>) {
        self.add_camera_with(device_id, CameraBehavior::Responsive);
    }

    pub fn add_camera_with(&self, device_id: impl Into<DeviceId>, behavior: CameraBehavior) {
        let device_id = device_id.into();
        debug!(device = %device_id, ?behavior, "simulated camera added");
        lock(&self.cameras).insert(
            device_id,
            CameraSlot {
                behavior,
                ..CameraSlot::default()
            },
        );
    }

    /// Changes how a camera answers from now on.  Returns `false` for an
    /// unknown camera.
    pub fn set_behavior(&self, device_id: &DeviceId, behavior: CameraBehavior) -> bool {
        match lock(&self.cameras).get_mut(device_id) {
            Some(slot) => {
                slot.behavior = behavior;
                slot.dropped = 0;
                true
            }
            None => false,
        }
    }

    pub fn camera_snapshot(&self, device_id: &DeviceId) -> Option<SimulatedCamera> {
        lock(&self.cameras).get(device_id).map(|slot| slot.camera.clone())
    }

    /// Every frame written so far, across all cameras, in write order.
    pub fn written(&self) -> Vec<(DeviceId, WrittenFrame)> {
        lock(&self.written).clone()
    }

    pub fn written_to(&self, device_id: &DeviceId) -> Vec<WrittenFrame> {
        lock(&self.written)
            .iter()
            .filter(|(id, _)| id == device_id)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Emits an unsolicited NOTIFICATION frame from the camera.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] for an unknown or disconnected
    /// camera.
    pub fn notify(
        &self,
        device_id: &DeviceId,
        kind: NotificationKind,
        data: Parameters,
    ) -> Result<(), TransportError> {
        let sequence_number = {
            let mut cameras = lock(&self.cameras);
            let slot = cameras
                .get_mut(device_id)
                .filter(|slot| slot.camera.connected)
                .ok_or_else(|| TransportError::NotConnected(device_id.clone()))?;
            slot.notification_sequence = slot.notification_sequence.wrapping_add(1);
            slot.notification_sequence
        };
        let message = DeviceMessage::Notification {
            kind,
            sequence_number,
            data,
        };
        let bytes = encode_message(&message).map_err(|e| TransportError::WriteFailed {
            device: device_id.clone(),
            reason: e.to_string(),
        })?;
        self.deliver(device_id, bytes);
        Ok(())
    }

    /// Hands raw bytes to the device's callback immediately, bypassing
    /// latency and chunking.  Returns `false` if no callback is installed.
    pub fn inject(&self, device_id: &DeviceId, bytes: &[u8]) -> bool {
        let callback = lock(&self.callbacks).get(device_id).cloned();
        match callback {
            Some(callback) => {
                callback(bytes);
                true
            }
            None => false,
        }
    }

    fn deliver(&self, device_id: &DeviceId, bytes: Vec<u8>) {
        let Some(callback) = lock(&self.callbacks).get(device_id).cloned() else {
            trace!(device = %device_id, "no callback installed; reply dropped");
            return;
        };
        let chunk_size = self.chunk_size.unwrap_or(bytes.len().max(1));

        if self.latency.is_zero() {
            for chunk in bytes.chunks(chunk_size) {
                callback(chunk);
            }
            return;
        }

        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            for chunk in bytes.chunks(chunk_size) {
                callback(chunk);
            }
        });
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn write(&self, device_id: &DeviceId, bytes: &[u8]) -> Result<(), TransportError> {
        let write_failed = |reason: String| TransportError::WriteFailed {
            device: device_id.clone(),
            reason,
        };
        let (frame, _) = decode_frame(bytes).map_err(|e| write_failed(e.to_string()))?;
        let message = parse_frame(&frame).map_err(|e| write_failed(e.to_string()))?;

        let reply = {
            let mut cameras = lock(&self.cameras);
            let slot = cameras
                .get_mut(device_id)
                .filter(|slot| slot.camera.connected)
                .ok_or_else(|| TransportError::NotConnected(device_id.clone()))?;

            let (kind, parameters) = match &message {
                DeviceMessage::Command { kind, parameters, .. } => (*kind, parameters.clone()),
                _ => (CommandKind::from_code(frame.header.command_code), Parameters::new()),
            };
            lock(&self.written).push((
                device_id.clone(),
                WrittenFrame {
                    message_type: frame.header.message_type,
                    command_code: frame.header.command_code,
                    sequence_number: frame.header.sequence_number,
                    kind,
                    parameters,
                },
            ));

            slot.answer(message)
        };

        match reply {
            Some(reply) => {
                let bytes = encode_message(&reply).map_err(|e| write_failed(e.to_string()))?;
                self.deliver(device_id, bytes);
            }
            None => trace!(device = %device_id, seq = frame.header.sequence_number, "simulated camera stayed silent"),
        }
        Ok(())
    }

    fn on_notification(&self, device_id: &DeviceId, callback: NotificationCallback) {
        if !lock(&self.cameras).contains_key(device_id) {
            warn!(device = %device_id, "callback installed for a camera the simulator does not know");
        }
        lock(&self.callbacks).insert(device_id.clone(), callback);
    }

    async fn disconnect(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        lock(&self.callbacks).remove(device_id);
        let mut cameras = lock(&self.cameras);
        let slot = cameras
            .get_mut(device_id)
            .ok_or_else(|| TransportError::NotConnected(device_id.clone()))?;
        slot.camera.connected = false;
        debug!(device = %device_id, "simulated camera disconnected");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

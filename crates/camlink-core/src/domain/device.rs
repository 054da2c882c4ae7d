//! Device identity, cached device state, and the notification catalog.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::domain::command::Parameters;

/// Identifier of a camera as known to the transport (BLE peripheral id, MAC, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Last known state of one registered camera.
///
/// Owned by the control facade.  Mutated by successful command results and by
/// unsolicited notifications; dropped when the device is unregistered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: DeviceId,
    pub is_recording: bool,
    /// Cleared when a command exhausts its retries without any answer.
    pub is_responding: bool,
    /// Write-through cache of setting values keyed by setting name.
    pub cached_settings: Parameters,
    pub last_command_time: Option<SystemTime>,
}

impl DeviceState {
    /// Fresh state for a newly registered device: idle, assumed responsive.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            is_recording: false,
            is_responding: true,
            cached_settings: Parameters::new(),
            last_command_time: None,
        }
    }
}

/// Kinds of unsolicited NOTIFICATION frames a camera may push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    BatteryLow,
    BatteryLevel,
    RecordingStarted,
    RecordingStopped,
    StorageLow,
    StorageFull,
    SettingChanged,
    OverheatWarning,
    /// Code outside the catalog; delivered to subscribers unchanged.
    Unknown(u16),
}

impl NotificationKind {
    pub fn code(self) -> u16 {
        match self {
            NotificationKind::BatteryLow => 0x8001,
            NotificationKind::BatteryLevel => 0x8002,
            NotificationKind::RecordingStarted => 0x8003,
            NotificationKind::RecordingStopped => 0x8004,
            NotificationKind::StorageLow => 0x8005,
            NotificationKind::StorageFull => 0x8006,
            NotificationKind::SettingChanged => 0x8007,
            NotificationKind::OverheatWarning => 0x8008,
            NotificationKind::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x8001 => NotificationKind::BatteryLow,
            0x8002 => NotificationKind::BatteryLevel,
            0x8003 => NotificationKind::RecordingStarted,
            0x8004 => NotificationKind::RecordingStopped,
            0x8005 => NotificationKind::StorageLow,
            0x8006 => NotificationKind::StorageFull,
            0x8007 => NotificationKind::SettingChanged,
            0x8008 => NotificationKind::OverheatWarning,
            other => NotificationKind::Unknown(other),
        }
    }

    /// Kebab-case name used by subscribers and log output.
    pub fn name(self) -> &'static str {
        match self {
            NotificationKind::BatteryLow => "battery-low",
            NotificationKind::BatteryLevel => "battery-level",
            NotificationKind::RecordingStarted => "recording-started",
            NotificationKind::RecordingStopped => "recording-stopped",
            NotificationKind::StorageLow => "storage-low",
            NotificationKind::StorageFull => "storage-full",
            NotificationKind::SettingChanged => "setting-changed",
            NotificationKind::OverheatWarning => "overheat-warning",
            NotificationKind::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Unknown(code) => write!(f, "unknown(0x{code:04X})"),
            other => f.write_str(other.name()),
        }
    }
}

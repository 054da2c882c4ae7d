//! Logical commands and the command catalog.
//!
//! A [`Command`] is what a caller asks a camera to do.  It is built once,
//! handed to the engine by value, and consumed exactly once by the device's
//! command queue.
//!
//! # The command catalog (for beginners)
//!
//! Every command kind maps to a fixed 16-bit `commandCode` that travels in the
//! frame header.  The table below is part of the protocol contract: camera
//! firmware decodes the same numbers, so codes must never be renumbered.
//!
//! | Range           | Meaning                      |
//! |-----------------|------------------------------|
//! | `0x0000`        | Heartbeat (link keepalive)   |
//! | `0x0001–0x000F` | Queries                      |
//! | `0x0010–0x001F` | Recording control            |
//! | `0x0020–0x002F` | Setting changes              |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String-keyed parameter map carried as a command payload.
///
/// A `BTreeMap` keeps key order deterministic, so the same parameters always
/// serialize to the same bytes (and therefore the same checksum).
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Opaque identifier of a single command instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(Uuid);

impl CommandId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority tier used to order a device's pending commands.
///
/// The derived `Ord` follows declaration order, so `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// All tiers, highest first.  This is the order the dispatcher drains them.
    pub const DESCENDING: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Stable index used for per-tier storage (`High = 0`).
    pub fn tier_index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Every command kind understood by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Heartbeat,
    GetStatus,
    GetBatteryLevel,
    GetFirmwareVersion,
    GetStorageInfo,
    GetSetting,
    RecordingStart,
    RecordingStop,
    SetIso,
    SetShutterSpeed,
    SetAperture,
    SetWhiteBalance,
    SetExposureCompensation,
    SetResolution,
    SetFrameRate,
    SetCodec,
    /// Generic setting change; the setting name travels in the `name` parameter.
    SetSetting,
    /// Vendor code outside the catalog, passed through untouched.  Catalog
    /// codes are reserved; build custom kinds with [`CommandKind::custom`].
    Custom(u16),
}

impl CommandKind {
    /// Returns the wire `commandCode` for this kind.
    pub fn code(self) -> u16 {
        match self {
            CommandKind::Heartbeat => 0x0000,
            CommandKind::GetStatus => 0x0001,
            CommandKind::GetBatteryLevel => 0x0002,
            CommandKind::GetFirmwareVersion => 0x0003,
            CommandKind::GetStorageInfo => 0x0004,
            CommandKind::GetSetting => 0x0005,
            CommandKind::RecordingStart => 0x0010,
            CommandKind::RecordingStop => 0x0011,
            CommandKind::SetIso => 0x0020,
            CommandKind::SetShutterSpeed => 0x0021,
            CommandKind::SetAperture => 0x0022,
            CommandKind::SetWhiteBalance => 0x0023,
            CommandKind::SetExposureCompensation => 0x0024,
            CommandKind::SetResolution => 0x0025,
            CommandKind::SetFrameRate => 0x0026,
            CommandKind::SetCodec => 0x0027,
            CommandKind::SetSetting => 0x002F,
            CommandKind::Custom(code) => code,
        }
    }

    /// Maps a wire `commandCode` back to a kind.  Unknown codes become
    /// [`CommandKind::Custom`], so the mapping never fails.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => CommandKind::Heartbeat,
            0x0001 => CommandKind::GetStatus,
            0x0002 => CommandKind::GetBatteryLevel,
            0x0003 => CommandKind::GetFirmwareVersion,
            0x0004 => CommandKind::GetStorageInfo,
            0x0005 => CommandKind::GetSetting,
            0x0010 => CommandKind::RecordingStart,
            0x0011 => CommandKind::RecordingStop,
            0x0020 => CommandKind::SetIso,
            0x0021 => CommandKind::SetShutterSpeed,
            0x0022 => CommandKind::SetAperture,
            0x0023 => CommandKind::SetWhiteBalance,
            0x0024 => CommandKind::SetExposureCompensation,
            0x0025 => CommandKind::SetResolution,
            0x0026 => CommandKind::SetFrameRate,
            0x0027 => CommandKind::SetCodec,
            0x002F => CommandKind::SetSetting,
            other => CommandKind::Custom(other),
        }
    }

    /// Whether this kind travels as a HEARTBEAT frame.
    pub fn is_heartbeat(self) -> bool {
        self.code() == CommandKind::Heartbeat.code()
    }

    /// Kind for a raw vendor code.  Codes already in the catalog resolve to
    /// their catalog kind, so the kind survives an encode/decode round trip.
    pub fn custom(code: u16) -> Self {
        Self::from_code(code)
    }

    /// Returns the dedicated setter for a well-known setting name, or the
    /// generic [`CommandKind::SetSetting`] for anything else.
    pub fn for_setting(name: &str) -> Self {
        match name {
            "iso" => CommandKind::SetIso,
            "shutter_speed" => CommandKind::SetShutterSpeed,
            "aperture" => CommandKind::SetAperture,
            "white_balance" => CommandKind::SetWhiteBalance,
            "exposure_compensation" => CommandKind::SetExposureCompensation,
            "resolution" => CommandKind::SetResolution,
            "frame_rate" => CommandKind::SetFrameRate,
            "codec" => CommandKind::SetCodec,
            _ => CommandKind::SetSetting,
        }
    }

    /// Setting name written by a dedicated setter, `None` for every other kind
    /// (including the generic `SetSetting`, whose name is a parameter).
    pub fn setting_name(self) -> Option<&'static str> {
        match self {
            CommandKind::SetIso => Some("iso"),
            CommandKind::SetShutterSpeed => Some("shutter_speed"),
            CommandKind::SetAperture => Some("aperture"),
            CommandKind::SetWhiteBalance => Some("white_balance"),
            CommandKind::SetExposureCompensation => Some("exposure_compensation"),
            CommandKind::SetResolution => Some("resolution"),
            CommandKind::SetFrameRate => Some("frame_rate"),
            CommandKind::SetCodec => Some("codec"),
            _ => None,
        }
    }

    /// Whether this kind changes a camera setting.
    pub fn is_setting_change(self) -> bool {
        self.setting_name().is_some() || self == CommandKind::SetSetting
    }

    /// Default priority when the caller does not choose one.
    ///
    /// Recording control always jumps the queue so that a stop issued behind a
    /// long run of setting changes is not delayed.
    pub fn default_priority(self) -> Priority {
        match self {
            CommandKind::RecordingStart | CommandKind::RecordingStop => Priority::High,
            _ => Priority::Normal,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Custom(code) => write!(f, "Custom(0x{code:04X})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// A single logical command addressed to one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub kind: CommandKind,
    pub parameters: Parameters,
    pub priority: Priority,
    /// When `false` the command settles as soon as the transport write finishes.
    pub requires_response: bool,
    /// Dispatch even when the device is currently marked unresponsive.
    pub force_execution: bool,
}

impl Command {
    /// Creates a command with the kind's default priority, expecting a response.
    ///
    /// A `Custom` kind carrying a catalog code is normalized to the catalog kind.
    pub fn new(kind: CommandKind) -> Self {
        let kind = CommandKind::from_code(kind.code());
        Self {
            id: CommandId::new(),
            kind,
            parameters: Parameters::new(),
            priority: kind.default_priority(),
            requires_response: true,
            force_execution: false,
        }
    }

    /// Builds the setting-change command for `name = value`.
    pub fn set_setting(name: &str, value: serde_json::Value) -> Self {
        let kind = CommandKind::for_setting(name);
        let command = Self::new(kind).with_param("value", value);
        if kind == CommandKind::SetSetting {
            command.with_param("name", name)
        } else {
            command
        }
    }

    /// Adds (or replaces) one parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the command as fire-and-forget.
    pub fn without_response(mut self) -> Self {
        self.requires_response = false;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force_execution = true;
        self
    }

    /// Returns a copy with a fresh [`CommandId`].  Used when one logical
    /// command is fanned out to several devices.
    pub fn duplicate(&self) -> Self {
        Self {
            id: CommandId::new(),
            ..self.clone()
        }
    }

    /// The setting this command changes, if any.
    pub fn target_setting(&self) -> Option<String> {
        match self.kind.setting_name() {
            Some(name) => Some(name.to_string()),
            None if self.kind == CommandKind::SetSetting => self
                .parameters
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            None => None,
        }
    }
}

//! Wire-level message types for the CamLink camera control protocol.
//!
//! Frame layout (all multi-byte integers little-endian):
//!
//! ```text
//! [version:1][message_type:1][command_code:2][payload_length:4][sequence_number:2][payload:N][checksum:2]
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::command::{CommandKind, Parameters};
use crate::domain::device::NotificationKind;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the fixed header preceding the payload.
pub const HEADER_SIZE: usize = 10;

/// Size of the trailing checksum.
pub const CHECKSUM_SIZE: usize = 2;

/// Largest payload a frame may claim.  Larger claims are treated as malformed.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024;

/// Largest complete frame on the wire.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + CHECKSUM_SIZE;

// ── Message type codes ────────────────────────────────────────────────────────

/// The `message_type` header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Command = 0x01,
    Response = 0x02,
    Notification = 0x03,
    Error = 0x04,
    Heartbeat = 0x05,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Command),
            0x02 => Ok(MessageType::Response),
            0x03 => Ok(MessageType::Notification),
            0x04 => Ok(MessageType::Error),
            0x05 => Ok(MessageType::Heartbeat),
            _ => Err(()),
        }
    }
}

// ── Header and raw frame ──────────────────────────────────────────────────────

/// 10-byte header prepended to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Protocol version; always [`PROTOCOL_VERSION`] on frames we accept.
    pub version: u8,
    pub message_type: MessageType,
    /// Command catalog code (or notification code for NOTIFICATION frames).
    pub command_code: u16,
    /// Exact byte length of the payload that follows the header.
    pub payload_length: u32,
    /// Per-device counter correlating a response with its request.
    pub sequence_number: u16,
}

/// One complete, checksum-verified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
    pub checksum: u16,
}

// ── Logical messages ──────────────────────────────────────────────────────────

/// Error code and text carried by an ERROR frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceErrorInfo {
    pub code: u16,
    pub message: String,
}

/// A decoded frame interpreted according to its message type.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    /// Host → camera request.
    Command {
        kind: CommandKind,
        sequence_number: u16,
        parameters: Parameters,
    },
    /// Camera → host answer to the command with the same sequence number.
    Response {
        kind: CommandKind,
        sequence_number: u16,
        body: Parameters,
    },
    /// Unsolicited camera → host event; never correlated to a request.
    Notification {
        kind: NotificationKind,
        sequence_number: u16,
        data: Parameters,
    },
    /// Camera rejected the command with the same sequence number.
    Error {
        kind: CommandKind,
        sequence_number: u16,
        error: DeviceErrorInfo,
    },
    /// Link keepalive.  Carries no payload.
    Heartbeat { sequence_number: u16 },
}

impl DeviceMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            DeviceMessage::Command { .. } => MessageType::Command,
            DeviceMessage::Response { .. } => MessageType::Response,
            DeviceMessage::Notification { .. } => MessageType::Notification,
            DeviceMessage::Error { .. } => MessageType::Error,
            DeviceMessage::Heartbeat { .. } => MessageType::Heartbeat,
        }
    }

    pub fn sequence_number(&self) -> u16 {
        match self {
            DeviceMessage::Command { sequence_number, .. }
            | DeviceMessage::Response { sequence_number, .. }
            | DeviceMessage::Notification { sequence_number, .. }
            | DeviceMessage::Error { sequence_number, .. }
            | DeviceMessage::Heartbeat { sequence_number } => *sequence_number,
        }
    }

    /// The header `command_code` this message is framed with.
    pub fn command_code(&self) -> u16 {
        match self {
            DeviceMessage::Command { kind, .. }
            | DeviceMessage::Response { kind, .. }
            | DeviceMessage::Error { kind, .. } => kind.code(),
            DeviceMessage::Notification { kind, .. } => kind.code(),
            DeviceMessage::Heartbeat { .. } => CommandKind::Heartbeat.code(),
        }
    }
}

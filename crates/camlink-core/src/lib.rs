//! # camlink-core
//!
//! Shared library for CamLink containing the camera control wire protocol,
//! per-device sequence numbering, and the command and device domain types.
//!
//! This crate has no async runtime and no transport dependency.  The
//! `camlink-engine` crate builds the command queue, response correlation,
//! and multi-camera control on top of it.
//!
//! - **`protocol`** – Frame layout, checksum, encoding and decoding of
//!   COMMAND / RESPONSE / NOTIFICATION / ERROR / HEARTBEAT frames, plus a
//!   reassembler for frames split across transport notifications.
//!
//! - **`domain`** – The command catalog, priorities, device identity and the
//!   cached per-device state.

pub mod domain;
pub mod protocol;

pub use domain::command::{Command, CommandId, CommandKind, Parameters, Priority};
pub use domain::device::{DeviceId, DeviceState, NotificationKind};
pub use protocol::codec::{decode_frames, encode_command, encode_message, ProtocolError};
pub use protocol::messages::{DeviceErrorInfo, DeviceMessage, MessageType};

//! Binary codec for encoding and decoding CamLink protocol frames.
//!
//! Wire format:
//! ```text
//! [version:1][message_type:1][command_code:2][payload_length:4][sequence_number:2][payload:N][checksum:2]
//! ```
//! Header size: 10 bytes.  All multi-byte integers are little-endian.
//!
//! The checksum is a 16-bit XOR fold: `command_code ^ payload_length ^
//! sequence_number`, then every payload byte XOR-ed in, masked to 16 bits.
//! It is weak (the message type byte is not covered at all) but it is what
//! camera firmware computes, so it is kept bit-exact.

use thiserror::Error;
use tracing::{trace, warn};

use crate::domain::command::{Command, CommandKind, Parameters};
use crate::domain::device::{DeviceId, NotificationKind};
use crate::protocol::messages::{
    DeviceErrorInfo, DeviceMessage, Frame, MessageHeader, MessageType, CHECKSUM_SIZE,
    HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame it starts.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The header claims (or the caller supplied) a payload above the limit.
    #[error("payload of {declared} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { declared: usize, max: usize },

    /// The trailing checksum does not match the recomputed one.
    #[error("checksum mismatch: frame carries 0x{received:04X}, computed 0x{computed:04X}")]
    ChecksumMismatch { received: u16, computed: u16 },

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Result of scanning one transport notification for frames.
#[derive(Debug, Default, PartialEq)]
pub struct DecodeOutcome {
    /// Messages decoded in arrival order.
    pub messages: Vec<DeviceMessage>,
    /// Bytes consumed from the front of the buffer.  Anything after this is an
    /// incomplete trailing frame.
    pub consumed: usize,
    /// Number of frames discarded as malformed.
    pub dropped: usize,
}

// ── Checksum ──────────────────────────────────────────────────────────────────

/// Computes the 16-bit XOR-fold checksum over the header fields and payload.
pub fn checksum(command_code: u16, payload_length: u32, sequence_number: u16, payload: &[u8]) -> u16 {
    let mut acc = u32::from(command_code) ^ payload_length ^ u32::from(sequence_number);
    for &byte in payload {
        acc ^= u32::from(byte);
    }
    (acc & 0xFFFF) as u16
}

// ── Public API: encoding ──────────────────────────────────────────────────────

/// Frames raw payload bytes behind a header and appends the checksum.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] when `payload` exceeds
/// [`MAX_PAYLOAD_SIZE`].
pub fn encode_frame(
    message_type: MessageType,
    command_code: u16,
    sequence_number: u16,
    payload: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            declared: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let payload_length = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    buf.push(PROTOCOL_VERSION);
    buf.push(message_type as u8);
    buf.extend_from_slice(&command_code.to_le_bytes());
    buf.extend_from_slice(&payload_length.to_le_bytes());
    buf.extend_from_slice(&sequence_number.to_le_bytes());
    buf.extend_from_slice(payload);

    let sum = checksum(command_code, payload_length, sequence_number, payload);
    buf.extend_from_slice(&sum.to_le_bytes());
    Ok(buf)
}

/// Encodes an outbound command for `device_id` using `sequence_number`.
///
/// Heartbeat commands are framed as HEARTBEAT; everything else as COMMAND.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the parameters cannot be serialized or are too
/// large for one frame.
///
/// # Examples
///
/// ```rust
/// use camlink_core::protocol::{decode_frames, encode_command};
/// use camlink_core::{Command, CommandKind, DeviceId};
///
/// let device = DeviceId::new("cam-a");
/// let cmd = Command::new(CommandKind::SetIso).with_param("value", 800);
/// let bytes = encode_command(&device, &cmd, 7).unwrap();
/// let outcome = decode_frames(&device, &bytes);
/// assert_eq!(outcome.messages.len(), 1);
/// assert_eq!(outcome.consumed, bytes.len());
/// ```
pub fn encode_command(
    device_id: &DeviceId,
    command: &Command,
    sequence_number: u16,
) -> Result<Vec<u8>, ProtocolError> {
    let message_type = if command.kind.is_heartbeat() {
        MessageType::Heartbeat
    } else {
        MessageType::Command
    };
    let payload = encode_parameters(&command.parameters)?;
    let bytes = encode_frame(message_type, command.kind.code(), sequence_number, &payload)?;
    trace!(
        device = %device_id,
        kind = %command.kind,
        seq = sequence_number,
        len = bytes.len(),
        "encoded command frame"
    );
    Ok(bytes)
}

/// Encodes any logical message.  Used by camera-side code and simulators to
/// produce responses, errors, and notifications.
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails or the payload is too large.
pub fn encode_message(msg: &DeviceMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = match msg {
        DeviceMessage::Command { parameters, .. } => encode_parameters(parameters)?,
        DeviceMessage::Response { body, .. } => encode_parameters(body)?,
        DeviceMessage::Notification { data, .. } => encode_parameters(data)?,
        DeviceMessage::Error { error, .. } => serde_json::to_vec(error)
            .map_err(|e| ProtocolError::MalformedPayload(format!("error payload: {e}")))?,
        DeviceMessage::Heartbeat { .. } => Vec::new(),
    };
    encode_frame(msg.message_type(), msg.command_code(), msg.sequence_number(), &payload)
}

// ── Public API: decoding ──────────────────────────────────────────────────────

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the frame and the number of bytes it occupied (header + payload +
/// checksum), so the caller can advance their read cursor.
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] when the frame is not complete yet.
/// - [`ProtocolError::UnsupportedVersion`] / [`ProtocolError::PayloadTooLarge`]
///   when the header cannot be trusted at all.
/// - [`ProtocolError::ChecksumMismatch`] / [`ProtocolError::UnknownMessageType`]
///   when the frame bounds are known but the content is bad.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let type_byte = bytes[1];
    let command_code = u16::from_le_bytes([bytes[2], bytes[3]]);
    let payload_length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let sequence_number = u16::from_le_bytes([bytes[8], bytes[9]]);

    let payload_len = payload_length as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            declared: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let total = HEADER_SIZE + payload_len + CHECKSUM_SIZE;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    let received = u16::from_le_bytes([bytes[total - 2], bytes[total - 1]]);
    let computed = checksum(command_code, payload_length, sequence_number, payload);
    if received != computed {
        return Err(ProtocolError::ChecksumMismatch { received, computed });
    }

    let message_type =
        MessageType::try_from(type_byte).map_err(|_| ProtocolError::UnknownMessageType(type_byte))?;

    Ok((
        Frame {
            header: MessageHeader {
                version,
                message_type,
                command_code,
                payload_length,
                sequence_number,
            },
            payload: payload.to_vec(),
            checksum: received,
        },
        total,
    ))
}

/// Interprets a verified frame according to its message type.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the payload is not valid for
/// the message type.
pub fn parse_frame(frame: &Frame) -> Result<DeviceMessage, ProtocolError> {
    let header = &frame.header;
    let sequence_number = header.sequence_number;
    match header.message_type {
        MessageType::Command => Ok(DeviceMessage::Command {
            kind: CommandKind::from_code(header.command_code),
            sequence_number,
            parameters: decode_parameters(&frame.payload)?,
        }),
        MessageType::Response => Ok(DeviceMessage::Response {
            kind: CommandKind::from_code(header.command_code),
            sequence_number,
            body: decode_parameters(&frame.payload)?,
        }),
        MessageType::Notification => Ok(DeviceMessage::Notification {
            kind: NotificationKind::from_code(header.command_code),
            sequence_number,
            data: decode_parameters(&frame.payload)?,
        }),
        MessageType::Error => Ok(DeviceMessage::Error {
            kind: CommandKind::from_code(header.command_code),
            sequence_number,
            error: decode_error_info(&frame.payload)?,
        }),
        MessageType::Heartbeat => Ok(DeviceMessage::Heartbeat { sequence_number }),
    }
}

/// Scans `bytes` for concatenated frames and decodes every complete one.
///
/// - An unsupported version or an oversized length claim aborts the rest of
///   the buffer: nothing after such a header can be located reliably.
/// - A checksum mismatch, unknown message type, or malformed payload drops
///   only that frame; scanning resumes just past its claimed bounds.
/// - An incomplete trailing frame stops the scan and is left unconsumed.
///
/// Dropped frames are logged and never reported as errors; the command that
/// expected them will time out and be retried.
pub fn decode_frames(device_id: &DeviceId, bytes: &[u8]) -> DecodeOutcome {
    let mut outcome = DecodeOutcome::default();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        match decode_frame(rest) {
            Ok((frame, used)) => {
                offset += used;
                match parse_frame(&frame) {
                    Ok(msg) => outcome.messages.push(msg),
                    Err(e) => {
                        warn!(device = %device_id, seq = frame.header.sequence_number, "dropping frame: {e}");
                        outcome.dropped += 1;
                    }
                }
            }
            Err(ProtocolError::InsufficientData { .. }) => break,
            Err(e @ (ProtocolError::UnsupportedVersion(_) | ProtocolError::PayloadTooLarge { .. })) => {
                warn!(
                    device = %device_id,
                    discarded = rest.len(),
                    "aborting buffer: {e}"
                );
                outcome.dropped += 1;
                offset = bytes.len();
            }
            Err(e) => {
                // Header fields were readable, so the claimed length is usable
                // for resynchronisation.
                let skip = claimed_frame_len(rest).unwrap_or(rest.len()).min(rest.len());
                warn!(device = %device_id, skipped = skip, "dropping frame: {e}");
                outcome.dropped += 1;
                offset += skip;
            }
        }
    }

    outcome.consumed = offset;
    outcome
}

// ── Payload encoding ──────────────────────────────────────────────────────────

/// Serializes parameters as a JSON object.  An empty map is an empty payload.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if JSON serialization fails.
pub fn encode_parameters(parameters: &Parameters) -> Result<Vec<u8>, ProtocolError> {
    if parameters.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::to_vec(parameters).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

/// Parses a JSON object payload.  An empty payload is an empty map.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the bytes are not a JSON object.
pub fn decode_parameters(payload: &[u8]) -> Result<Parameters, ProtocolError> {
    if payload.is_empty() {
        return Ok(Parameters::new());
    }
    serde_json::from_slice(payload)
        .map_err(|e| ProtocolError::MalformedPayload(format!("parameters: {e}")))
}

fn decode_error_info(payload: &[u8]) -> Result<DeviceErrorInfo, ProtocolError> {
    if payload.is_empty() {
        return Ok(DeviceErrorInfo {
            code: 0,
            message: "unspecified device error".to_string(),
        });
    }
    serde_json::from_slice(payload)
        .map_err(|e| ProtocolError::MalformedPayload(format!("error payload: {e}")))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

/// Total frame length claimed by a header, if the header is present.
fn claimed_frame_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let payload_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    Some(HEADER_SIZE + payload_len + CHECKSUM_SIZE)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::Priority;
    use serde_json::json;

    fn device() -> DeviceId {
        DeviceId::new("cam-test")
    }

    fn round_trip(msg: &DeviceMessage) -> DeviceMessage {
        let encoded = encode_message(msg).expect("encode failed");
        let (frame, consumed) = decode_frame(&encoded).expect("decode failed");
        assert_eq!(consumed, encoded.len(), "consumed bytes should equal total encoded size");
        parse_frame(&frame).expect("parse failed")
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> Parameters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // ── Header layout ─────────────────────────────────────────────────────────

    #[test]
    fn test_header_layout_is_bit_exact() {
        let bytes = encode_frame(MessageType::Command, 0x0020, 0x1234, &[0xAA, 0xBB]).unwrap();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(&bytes[2..4], &[0x20, 0x00], "command code little-endian");
        assert_eq!(&bytes[4..8], &[0x02, 0x00, 0x00, 0x00], "payload length little-endian");
        assert_eq!(&bytes[8..10], &[0x34, 0x12], "sequence little-endian");
        assert_eq!(&bytes[10..12], &[0xAA, 0xBB]);
        assert_eq!(bytes.len(), HEADER_SIZE + 2 + CHECKSUM_SIZE);
    }

    #[test]
    fn test_checksum_is_xor_fold_of_header_fields_and_payload() {
        // 0x0020 ^ 0x00000002 ^ 0x1234 = 0x1216; ^ 0xAA ^ 0xBB = 0x1207
        assert_eq!(checksum(0x0020, 2, 0x1234, &[0xAA, 0xBB]), 0x1207);
        let bytes = encode_frame(MessageType::Command, 0x0020, 0x1234, &[0xAA, 0xBB]).unwrap();
        assert_eq!(u16::from_le_bytes([bytes[12], bytes[13]]), 0x1207);
    }

    #[test]
    fn test_checksum_masks_high_bits_of_payload_length() {
        assert_eq!(checksum(0, 0x0001_0000, 0, &[]), 0);
    }

    #[test]
    fn test_empty_payload_frame_is_header_plus_checksum() {
        let bytes = encode_frame(MessageType::Heartbeat, 0, 9, &[]).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + CHECKSUM_SIZE);
    }

    #[test]
    fn test_encode_frame_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let result = encode_frame(MessageType::Command, 1, 0, &payload);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }

    // ── Round trips ───────────────────────────────────────────────────────────

    #[test]
    fn test_command_round_trip_preserves_code_sequence_and_parameters() {
        let cmd = Command::new(CommandKind::SetWhiteBalance)
            .with_param("value", 5600)
            .with_priority(Priority::Low);
        let bytes = encode_command(&device(), &cmd, 42).unwrap();

        let outcome = decode_frames(&device(), &bytes);

        assert_eq!(
            outcome.messages,
            vec![DeviceMessage::Command {
                kind: CommandKind::SetWhiteBalance,
                sequence_number: 42,
                parameters: params(&[("value", json!(5600))]),
            }]
        );
    }

    #[test]
    fn test_heartbeat_command_is_framed_as_heartbeat() {
        let bytes = encode_command(&device(), &Command::new(CommandKind::Heartbeat), 5).unwrap();
        assert_eq!(bytes[1], MessageType::Heartbeat as u8);
        let outcome = decode_frames(&device(), &bytes);
        assert_eq!(outcome.messages, vec![DeviceMessage::Heartbeat { sequence_number: 5 }]);
    }

    #[test]
    fn test_response_round_trip() {
        let msg = DeviceMessage::Response {
            kind: CommandKind::GetStatus,
            sequence_number: 65535,
            body: params(&[("battery_level", json!(87)), ("recording", json!(false))]),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_notification_round_trip() {
        let msg = DeviceMessage::Notification {
            kind: NotificationKind::StorageLow,
            sequence_number: 0,
            data: params(&[("remaining_mb", json!(512))]),
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_error_round_trip() {
        let msg = DeviceMessage::Error {
            kind: CommandKind::SetIso,
            sequence_number: 17,
            error: DeviceErrorInfo {
                code: 0x0003,
                message: "ISO 100000 out of range".to_string(),
            },
        };
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_error_frame_with_empty_payload_decodes_as_unspecified() {
        let bytes = encode_frame(MessageType::Error, 0x0020, 1, &[]).unwrap();
        let outcome = decode_frames(&device(), &bytes);
        assert!(matches!(
            outcome.messages.as_slice(),
            [DeviceMessage::Error { error: DeviceErrorInfo { code: 0, .. }, .. }]
        ));
    }

    // ── Multi-frame buffers ───────────────────────────────────────────────────

    #[test]
    fn test_decode_frames_handles_concatenated_frames() {
        let mut buf = encode_message(&DeviceMessage::Heartbeat { sequence_number: 1 }).unwrap();
        buf.extend(
            encode_message(&DeviceMessage::Response {
                kind: CommandKind::RecordingStart,
                sequence_number: 2,
                body: Parameters::new(),
            })
            .unwrap(),
        );

        let outcome = decode_frames(&device(), &buf);

        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.consumed, buf.len());
        assert_eq!(outcome.dropped, 0);
    }

    #[test]
    fn test_decode_frames_leaves_truncated_trailing_frame_unconsumed() {
        let first = encode_message(&DeviceMessage::Heartbeat { sequence_number: 1 }).unwrap();
        let second = encode_command(
            &device(),
            &Command::new(CommandKind::SetIso).with_param("value", 400),
            2,
        )
        .unwrap();
        let mut buf = first.clone();
        buf.extend_from_slice(&second[..second.len() - 3]);

        let outcome = decode_frames(&device(), &buf);

        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.consumed, first.len());
        assert_eq!(outcome.dropped, 0);
    }

    #[test]
    fn test_checksum_mismatch_drops_frame_and_resyncs_to_next() {
        let mut bad = encode_message(&DeviceMessage::Heartbeat { sequence_number: 1 }).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let good = encode_message(&DeviceMessage::Heartbeat { sequence_number: 2 }).unwrap();
        let mut buf = bad;
        buf.extend_from_slice(&good);

        let outcome = decode_frames(&device(), &buf);

        assert_eq!(outcome.messages, vec![DeviceMessage::Heartbeat { sequence_number: 2 }]);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.consumed, buf.len());
    }

    #[test]
    fn test_unsupported_version_aborts_whole_buffer() {
        let mut bad = encode_message(&DeviceMessage::Heartbeat { sequence_number: 1 }).unwrap();
        bad[0] = 0x02;
        let good = encode_message(&DeviceMessage::Heartbeat { sequence_number: 2 }).unwrap();
        let mut buf = bad;
        buf.extend_from_slice(&good);

        let outcome = decode_frames(&device(), &buf);

        assert!(outcome.messages.is_empty(), "nothing after a bad version is trusted");
        assert_eq!(outcome.consumed, buf.len());
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn test_oversized_length_claim_is_rejected_as_malformed() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0] = PROTOCOL_VERSION;
        bytes[1] = MessageType::Response as u8;
        bytes[4..8].copy_from_slice(&((MAX_PAYLOAD_SIZE as u32) + 1).to_le_bytes());

        assert!(matches!(
            decode_frame(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
        let outcome = decode_frames(&device(), &bytes);
        assert!(outcome.messages.is_empty());
        assert_eq!(outcome.consumed, bytes.len(), "an untrustworthy header is not kept for later");
    }

    #[test]
    fn test_unknown_message_type_with_valid_checksum_is_skipped() {
        let mut bytes = encode_frame(MessageType::Response, 1, 3, &[]).unwrap();
        bytes[1] = 0x7F;
        assert_eq!(decode_frame(&bytes), Err(ProtocolError::UnknownMessageType(0x7F)));

        let outcome = decode_frames(&device(), &bytes);
        assert!(outcome.messages.is_empty());
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.consumed, bytes.len());
    }

    #[test]
    fn test_non_json_payload_is_dropped_not_propagated() {
        let bytes = encode_frame(MessageType::Response, 1, 3, b"not json").unwrap();
        let outcome = decode_frames(&device(), &bytes);
        assert!(outcome.messages.is_empty());
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn test_inverting_any_single_byte_rejects_the_frame() {
        // Payload shorter than 128 bytes so an inverted low length byte always
        // claims more bytes than are present.
        let original = encode_message(&DeviceMessage::Response {
            kind: CommandKind::SetIso,
            sequence_number: 300,
            body: params(&[("value", json!(1600))]),
        })
        .unwrap();
        assert!(original.len() - HEADER_SIZE - CHECKSUM_SIZE < 128);

        for index in 0..original.len() {
            let mut corrupted = original.clone();
            corrupted[index] ^= 0xFF;
            let outcome = decode_frames(&device(), &corrupted);
            assert!(
                outcome.messages.is_empty(),
                "flipping byte {index} must not yield a message"
            );
        }
    }

    // ── Error conditions ──────────────────────────────────────────────────────

    #[test]
    fn test_decode_empty_bytes_returns_insufficient_data() {
        assert!(matches!(
            decode_frame(&[]),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_header_returns_insufficient_data() {
        assert!(matches!(
            decode_frame(&[PROTOCOL_VERSION, 0x02, 0x00]),
            Err(ProtocolError::InsufficientData { needed: HEADER_SIZE, available: 3 })
        ));
    }

    #[test]
    fn test_decode_parameters_rejects_json_array() {
        assert!(matches!(
            decode_parameters(b"[1,2,3]"),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }
}

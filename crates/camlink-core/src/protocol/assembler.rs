//! Reassembles frames that a transport splits across several notifications.
//!
//! BLE characteristics deliver at most one MTU per notification, so a single
//! protocol frame can arrive in pieces and a single notification can carry the
//! tail of one frame and the head of the next.  The assembler keeps whatever
//! [`decode_frames`] did not consume and prepends it to the next chunk.

use tracing::{debug, warn};

use crate::domain::device::DeviceId;
use crate::protocol::codec::decode_frames;
use crate::protocol::messages::{DeviceMessage, MAX_FRAME_SIZE};

/// Per-device receive buffer.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every message completed by it.
    ///
    /// Malformed frames are dropped inside [`decode_frames`].  If the leftover
    /// ever exceeds [`MAX_FRAME_SIZE`] it cannot be the prefix of a valid frame
    /// and is discarded.
    pub fn push(&mut self, device_id: &DeviceId, chunk: &[u8]) -> Vec<DeviceMessage> {
        self.buffer.extend_from_slice(chunk);

        let outcome = decode_frames(device_id, &self.buffer);
        self.buffer.drain(..outcome.consumed);

        if self.buffer.len() > MAX_FRAME_SIZE {
            warn!(
                device = %device_id,
                buffered = self.buffer.len(),
                "receive buffer exceeds maximum frame size; discarding"
            );
            self.buffer.clear();
        } else if !self.buffer.is_empty() {
            debug!(device = %device_id, buffered = self.buffer.len(), "holding partial frame");
        }

        outcome.messages
    }

    /// Bytes currently held waiting for the rest of a frame.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

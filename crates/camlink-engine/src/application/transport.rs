//! Transport port: the three operations the engine needs from a camera link.
//!
//! The engine never inspects connection state, GATT services, or
//! characteristic UUIDs.  A real BLE adapter and the in-process simulator in
//! `infrastructure::transport` both sit behind this trait, and unit tests use
//! the `mockall`-generated `MockTransport`.

use std::sync::Arc;

use async_trait::async_trait;
use camlink_core::DeviceId;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Invoked by the transport with every chunk of bytes a device notifies.
///
/// Chunks need not align with frame boundaries.
pub type NotificationCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Error type for transport operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The device is unknown to the transport or has been disconnected.
    #[error("device {0} is not connected")]
    NotConnected(DeviceId),

    /// The write was attempted but did not complete.
    #[error("write to {device} failed: {reason}")]
    WriteFailed { device: DeviceId, reason: String },
}

/// Byte-level link to one or more cameras.
///
/// Implementations serialize their own writes per device.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes one encoded frame to the device.
    async fn write(&self, device_id: &DeviceId, bytes: &[u8]) -> Result<(), TransportError>;

    /// Installs the callback receiving the device's notification bytes.
    /// Replaces any callback previously installed for the same device.
    fn on_notification(&self, device_id: &DeviceId, callback: NotificationCallback);

    /// Drops the link to the device and its notification callback.
    async fn disconnect(&self, device_id: &DeviceId) -> Result<(), TransportError>;
}

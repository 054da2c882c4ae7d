//! ResponseCorrelator: matches inbound frames to the requests that caused them.
//!
//! Pending requests are keyed by `(DeviceId, sequence_number)`.  RESPONSE and
//! ERROR frames settle the matching entry exactly once; a frame with no
//! matching entry (late reply to a timed-out attempt, stray retransmission) is
//! logged and discarded so it can never resurrect a finished command.
//!
//! A HEARTBEAT frame only settles an entry registered for a heartbeat
//! command.  Cameras send their own keepalives with their own counter, so a
//! heartbeat that lands on any other entry is treated as unmatched.
//!
//! NOTIFICATION frames are never correlated.  They are published to
//! subscribers that filter by device and notification kind.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use camlink_core::{CommandKind, DeviceErrorInfo, DeviceId, DeviceMessage, NotificationKind, Parameters};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, trace, warn};

/// Error type for correlation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelatorError {
    /// A request with the same key has not settled yet.
    #[error("a request with sequence {sequence} is already pending for {device}")]
    AlreadyPending { device: DeviceId, sequence: u16 },

    /// The device answered with an ERROR frame.
    #[error("device rejected the command: 0x{code:04X} {message}")]
    Rejected { code: u16, message: String },

    /// The entry was cancelled before any answer arrived.
    #[error("pending request cancelled: {0}")]
    Cancelled(String),
}

type Settlement = Result<Parameters, CorrelatorError>;

type PendingMap = HashMap<(DeviceId, u16), PendingEntry>;

struct PendingEntry {
    kind: CommandKind,
    tx: oneshot::Sender<Settlement>,
}

/// Waitable handle returned by [`ResponseCorrelator::register_pending`].
#[derive(Debug)]
pub struct PendingResponse {
    device_id: DeviceId,
    sequence_number: u16,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingResponse {
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Waits for the entry to settle.
    ///
    /// Entries removed without an explicit settlement (for example by
    /// [`ResponseCorrelator::discard`]) report [`CorrelatorError::Cancelled`].
    pub async fn wait(self) -> Settlement {
        self.rx
            .await
            .unwrap_or_else(|_| Err(CorrelatorError::Cancelled("entry discarded".to_string())))
    }
}

/// An unsolicited NOTIFICATION frame tagged with its source device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceNotification {
    pub device_id: DeviceId,
    pub kind: NotificationKind,
    pub sequence_number: u16,
    pub data: Parameters,
}

/// What [`ResponseCorrelator::route`] did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Resolved,
    Rejected,
    Published,
    /// RESPONSE/ERROR without a pending entry, or a HEARTBEAT that does not
    /// answer a pending heartbeat command.
    Unmatched,
    /// Host-bound COMMAND frames have no meaning on this side of the link.
    Ignored,
}

/// Filtered view of the notification stream.
pub struct NotificationSubscription {
    rx: broadcast::Receiver<DeviceNotification>,
    device: Option<DeviceId>,
    kind: Option<NotificationKind>,
}

impl NotificationSubscription {
    /// Next notification matching the filter, or `None` once the correlator
    /// is dropped.
    pub async fn recv(&mut self) -> Option<DeviceNotification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if self.matches(&n) => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, n: &DeviceNotification) -> bool {
        self.device.as_ref().map_or(true, |d| *d == n.device_id)
            && self.kind.map_or(true, |k| k == n.kind)
    }
}

/// Registry of in-flight requests plus the notification fan-out.
pub struct ResponseCorrelator {
    pending: Mutex<PendingMap>,
    notifications: broadcast::Sender<DeviceNotification>,
}

impl ResponseCorrelator {
    /// Creates a correlator whose notification channel buffers `capacity`
    /// messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (notifications, _) = broadcast::channel(capacity.max(1));
        Self {
            pending: Mutex::new(HashMap::new()),
            notifications,
        }
    }

    /// Registers a pending request for a command of `kind`.  Must be called
    /// before the request is written so a fast answer cannot outrun
    /// registration.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelatorError::AlreadyPending`] if the key is in use.
    pub fn register_pending(
        &self,
        device_id: &DeviceId,
        sequence_number: u16,
        kind: CommandKind,
    ) -> Result<PendingResponse, CorrelatorError> {
        let mut pending = self.lock();
        let key = (device_id.clone(), sequence_number);
        if pending.contains_key(&key) {
            return Err(CorrelatorError::AlreadyPending {
                device: device_id.clone(),
                sequence: sequence_number,
            });
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(key, PendingEntry { kind, tx });
        trace!(device = %device_id, seq = sequence_number, %kind, "registered pending request");
        Ok(PendingResponse {
            device_id: device_id.clone(),
            sequence_number,
            rx,
        })
    }

    /// Settles the entry with a response payload.  Returns `false` when no
    /// entry matched.
    pub fn resolve(&self, device_id: &DeviceId, sequence_number: u16, body: Parameters) -> bool {
        self.settle(device_id, sequence_number, Ok(body))
    }

    /// Settles the entry with the device's error.  Returns `false` when no
    /// entry matched.
    pub fn reject(&self, device_id: &DeviceId, sequence_number: u16, error: DeviceErrorInfo) -> bool {
        self.settle(
            device_id,
            sequence_number,
            Err(CorrelatorError::Rejected {
                code: error.code,
                message: error.message,
            }),
        )
    }

    /// Settles the entry as cancelled.
    pub fn cancel(&self, device_id: &DeviceId, sequence_number: u16, reason: &str) -> bool {
        self.settle(
            device_id,
            sequence_number,
            Err(CorrelatorError::Cancelled(reason.to_string())),
        )
    }

    /// Removes the entry without notifying its waiter.  Used after a timeout,
    /// when nobody is waiting any more.
    pub fn discard(&self, device_id: &DeviceId, sequence_number: u16) -> bool {
        self.lock()
            .remove(&(device_id.clone(), sequence_number))
            .is_some()
    }

    /// Cancels every entry for `device_id`.  Returns how many were cancelled.
    pub fn cancel_device(&self, device_id: &DeviceId, reason: &str) -> usize {
        let mut pending = self.lock();
        let keys: Vec<_> = pending
            .keys()
            .filter(|(d, _)| d == device_id)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(entry) = pending.remove(key) {
                let _ = entry.tx.send(Err(CorrelatorError::Cancelled(reason.to_string())));
            }
        }
        if !keys.is_empty() {
            debug!(device = %device_id, count = keys.len(), "cancelled pending requests");
        }
        keys.len()
    }

    /// Number of unsettled entries across all devices.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Dispatches one decoded inbound message.
    pub fn route(&self, device_id: &DeviceId, message: DeviceMessage) -> RouteOutcome {
        match message {
            DeviceMessage::Response {
                sequence_number,
                body,
                kind,
            } => {
                if self.resolve(device_id, sequence_number, body) {
                    RouteOutcome::Resolved
                } else {
                    debug!(device = %device_id, seq = sequence_number, %kind, "discarding unmatched response");
                    RouteOutcome::Unmatched
                }
            }
            DeviceMessage::Error {
                sequence_number,
                error,
                kind,
            } => {
                if self.reject(device_id, sequence_number, error) {
                    RouteOutcome::Rejected
                } else {
                    debug!(device = %device_id, seq = sequence_number, %kind, "discarding unmatched error");
                    RouteOutcome::Unmatched
                }
            }
            DeviceMessage::Heartbeat { sequence_number } => {
                if self.resolve_heartbeat(device_id, sequence_number) {
                    RouteOutcome::Resolved
                } else {
                    trace!(device = %device_id, seq = sequence_number, "keepalive");
                    RouteOutcome::Unmatched
                }
            }
            DeviceMessage::Notification {
                kind,
                sequence_number,
                data,
            } => {
                trace!(device = %device_id, %kind, "publishing notification");
                let _ = self.notifications.send(DeviceNotification {
                    device_id: device_id.clone(),
                    kind,
                    sequence_number,
                    data,
                });
                RouteOutcome::Published
            }
            DeviceMessage::Command { kind, .. } => {
                warn!(device = %device_id, %kind, "ignoring COMMAND frame sent by device");
                RouteOutcome::Ignored
            }
        }
    }

    /// Subscribes to notifications, optionally filtered by device and kind.
    pub fn subscribe(
        &self,
        device: Option<DeviceId>,
        kind: Option<NotificationKind>,
    ) -> NotificationSubscription {
        NotificationSubscription {
            rx: self.notifications.subscribe(),
            device,
            kind,
        }
    }

    /// Settles the entry with an empty body, but only when it belongs to a
    /// heartbeat command.
    fn resolve_heartbeat(&self, device_id: &DeviceId, sequence_number: u16) -> bool {
        let key = (device_id.clone(), sequence_number);
        let entry = {
            let mut pending = self.lock();
            let answers_heartbeat = pending
                .get(&key)
                .is_some_and(|entry| entry.kind.is_heartbeat());
            if answers_heartbeat {
                pending.remove(&key)
            } else {
                None
            }
        };
        let Some(entry) = entry else {
            return false;
        };
        if entry.tx.send(Ok(Parameters::new())).is_err() {
            trace!(device = %device_id, seq = sequence_number, "waiter already gone");
        }
        true
    }

    fn settle(&self, device_id: &DeviceId, sequence_number: u16, outcome: Settlement) -> bool {
        let Some(entry) = self.lock().remove(&(device_id.clone(), sequence_number)) else {
            return false;
        };
        if entry.tx.send(outcome).is_err() {
            trace!(device = %device_id, seq = sequence_number, "waiter already gone");
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResponseCorrelator {
    fn default() -> Self {
        Self::new(crate::application::events::DEFAULT_EVENT_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cam(id: &str) -> DeviceId {
        DeviceId::new(id)
    }

    fn body(value: i64) -> Parameters {
        let mut p = Parameters::new();
        p.insert("value".into(), json!(value));
        p
    }

    #[tokio::test]
    async fn test_response_resolves_matching_entry() {
        // Arrange
        let correlator = ResponseCorrelator::default();
        let pending = correlator.register_pending(&cam("a"), 7, CommandKind::GetStatus).unwrap();

        // Act
        let outcome = correlator.route(
            &cam("a"),
            DeviceMessage::Response {
                kind: CommandKind::GetSetting,
                sequence_number: 7,
                body: body(400),
            },
        );

        // Assert
        assert_eq!(outcome, RouteOutcome::Resolved);
        assert_eq!(pending.wait().await, Ok(body(400)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_frame_rejects_with_device_code() {
        let correlator = ResponseCorrelator::default();
        let pending = correlator.register_pending(&cam("a"), 1, CommandKind::GetStatus).unwrap();

        correlator.route(
            &cam("a"),
            DeviceMessage::Error {
                kind: CommandKind::SetIso,
                sequence_number: 1,
                error: DeviceErrorInfo {
                    code: 3,
                    message: "out of range".into(),
                },
            },
        );

        assert_eq!(
            pending.wait().await,
            Err(CorrelatorError::Rejected {
                code: 3,
                message: "out of range".into()
            })
        );
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let correlator = ResponseCorrelator::default();
        let _first = correlator.register_pending(&cam("a"), 9, CommandKind::GetStatus).unwrap();

        let second = correlator.register_pending(&cam("a"), 9, CommandKind::GetStatus);

        assert!(matches!(second, Err(CorrelatorError::AlreadyPending { sequence: 9, .. })));
    }

    #[test]
    fn test_same_sequence_on_different_devices_does_not_collide() {
        let correlator = ResponseCorrelator::default();
        assert!(correlator.register_pending(&cam("a"), 9, CommandKind::GetStatus).is_ok());
        assert!(correlator.register_pending(&cam("b"), 9, CommandKind::GetStatus).is_ok());
        assert_eq!(correlator.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_response_does_not_resurrect_discarded_entry() {
        // Arrange – the entry timed out and was discarded
        let correlator = ResponseCorrelator::default();
        let pending = correlator.register_pending(&cam("a"), 3, CommandKind::GetStatus).unwrap();
        assert!(correlator.discard(&cam("a"), 3));

        // Act – the late answer arrives
        let outcome = correlator.route(
            &cam("a"),
            DeviceMessage::Response {
                kind: CommandKind::GetStatus,
                sequence_number: 3,
                body: Parameters::new(),
            },
        );

        // Assert
        assert_eq!(outcome, RouteOutcome::Unmatched);
        assert!(matches!(pending.wait().await, Err(CorrelatorError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_cancel_device_only_touches_that_device() {
        let correlator = ResponseCorrelator::default();
        let a1 = correlator.register_pending(&cam("a"), 1, CommandKind::GetStatus).unwrap();
        let a2 = correlator.register_pending(&cam("a"), 2, CommandKind::GetStatus).unwrap();
        let _b = correlator.register_pending(&cam("b"), 1, CommandKind::GetStatus).unwrap();

        let cancelled = correlator.cancel_device(&cam("a"), "device unregistered");

        assert_eq!(cancelled, 2);
        assert_eq!(correlator.pending_count(), 1);
        assert_eq!(
            a1.wait().await,
            Err(CorrelatorError::Cancelled("device unregistered".into()))
        );
        assert!(a2.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_resolves_pending_entry_with_empty_body() {
        let correlator = ResponseCorrelator::default();
        let pending = correlator.register_pending(&cam("a"), 4, CommandKind::Heartbeat).unwrap();

        let outcome = correlator.route(&cam("a"), DeviceMessage::Heartbeat { sequence_number: 4 });

        assert_eq!(outcome, RouteOutcome::Resolved);
        assert_eq!(pending.wait().await, Ok(Parameters::new()));
    }

    #[tokio::test]
    async fn test_keepalive_does_not_settle_non_heartbeat_entry() {
        // Arrange – a recording command is waiting on sequence 0
        let correlator = ResponseCorrelator::default();
        let pending = correlator.register_pending(&cam("a"), 0, CommandKind::RecordingStart).unwrap();

        // Act – the camera's own keepalive happens to carry sequence 0
        let outcome = correlator.route(&cam("a"), DeviceMessage::Heartbeat { sequence_number: 0 });

        // Assert – still pending, and the real answer settles it
        assert_eq!(outcome, RouteOutcome::Unmatched);
        assert_eq!(correlator.pending_count(), 1);
        let answered = correlator.route(
            &cam("a"),
            DeviceMessage::Response {
                kind: CommandKind::RecordingStart,
                sequence_number: 0,
                body: body(1),
            },
        );
        assert_eq!(answered, RouteOutcome::Resolved);
        assert_eq!(pending.wait().await, Ok(body(1)));
    }

    #[test]
    fn test_unsolicited_heartbeat_is_unmatched() {
        let correlator = ResponseCorrelator::default();
        let outcome = correlator.route(&cam("a"), DeviceMessage::Heartbeat { sequence_number: 4 });
        assert_eq!(outcome, RouteOutcome::Unmatched);
    }

    #[tokio::test]
    async fn test_notification_reaches_only_matching_subscribers() {
        // Arrange
        let correlator = ResponseCorrelator::default();
        let mut battery_a = correlator.subscribe(Some(cam("a")), Some(NotificationKind::BatteryLow));
        let mut everything = correlator.subscribe(None, None);
        let pending = correlator.register_pending(&cam("a"), 0, CommandKind::GetStatus).unwrap();

        // Act
        let noise = DeviceMessage::Notification {
            kind: NotificationKind::StorageLow,
            sequence_number: 0,
            data: Parameters::new(),
        };
        let wanted = DeviceMessage::Notification {
            kind: NotificationKind::BatteryLow,
            sequence_number: 0,
            data: Parameters::new(),
        };
        assert_eq!(correlator.route(&cam("b"), wanted.clone()), RouteOutcome::Published);
        correlator.route(&cam("a"), noise);
        correlator.route(&cam("a"), wanted);

        // Assert
        let got = battery_a.recv().await.unwrap();
        assert_eq!(got.device_id, cam("a"));
        assert_eq!(got.kind, NotificationKind::BatteryLow);
        assert_eq!(everything.recv().await.unwrap().device_id, cam("b"));
        assert_eq!(correlator.pending_count(), 1, "notifications never settle requests");
        drop(pending);
    }
}

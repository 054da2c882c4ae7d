//! DeviceCommandQueue: per-device priority queue with single-flight dispatch.
//!
//! Each registered camera gets one queue and one worker task.  The worker
//! drains three FIFO tiers (HIGH, NORMAL, LOW) and keeps at most one command
//! in flight, so a response can only ever belong to the command the worker is
//! waiting on.
//!
//! # Dispatch cycle
//!
//! ```text
//! IDLE ─pop─▶ DISPATCHING ─write ok─▶ AWAITING_RESPONSE ─answer─▶ IDLE
//!                 │                          │
//!            write failed                 timeout
//!                 ▼                          ▼
//!           RETRY_PENDING ◀──── attempts left? ────▶ settled as failure
//! ```
//!
//! Every attempt allocates a fresh sequence number, and the pending entry is
//! registered with the correlator *before* the bytes hit the transport.  A
//! retried command goes back to the front of its own tier, so it keeps its
//! place relative to same-priority peers but still yields to anything of a
//! higher priority that arrived meanwhile.
//!
//! Explicit ERROR frames are never retried.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camlink_core::protocol::{encode_command, SequenceCounter};
use camlink_core::{Command, CommandId, DeviceId, Parameters, Priority};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, trace, warn};

use crate::application::correlator::{CorrelatorError, ResponseCorrelator};
use crate::application::transport::Transport;

/// Default time to wait for an answer after a successful write.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default number of re-sends after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default bound on commands waiting behind the in-flight one.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 64;

/// Tunables for one device queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub response_timeout: Duration,
    pub max_retries: u32,
    /// When `false`, the first timeout or write failure is final.
    pub auto_recovery: bool,
    /// Commands waiting behind the in-flight one.
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            auto_recovery: true,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// Why a queued command did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// No answer arrived within the deadline on any attempt.
    #[error("no response after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// The device answered with an ERROR frame.
    #[error("device rejected the command: 0x{code:04X} {message}")]
    Device { code: u16, message: String },

    /// The queue was full and this command was the one dropped.
    #[error("command queue full; command dropped")]
    Overflow,

    /// Every attempt failed at the transport write.
    #[error("transport failure after {attempts} attempt(s): {reason}")]
    Transport { attempts: u32, reason: String },

    /// The command could not be framed.
    #[error("failed to encode command: {0}")]
    Encode(String),

    /// The device was unregistered before the command settled.
    #[error("device unregistered")]
    Unregistered,

    /// The pending entry was cancelled by someone other than this queue.
    #[error("command cancelled: {0}")]
    Cancelled(String),
}

/// Where the worker is in the dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    #[default]
    Idle,
    Dispatching,
    AwaitingResponse,
    RetryPending,
}

/// Snapshot of a queue's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending_high: usize,
    pub pending_normal: usize,
    pub pending_low: usize,
    pub in_flight: bool,
    /// Commands settled successfully.
    pub processed: u64,
    /// Commands settled with any error, including overflow and unregistration.
    pub failed: u64,
    /// Re-sends after a timeout or write failure.
    pub retried: u64,
    /// Commands discarded because the queue was full.
    pub dropped: u64,
    pub state: DispatchState,
}

impl QueueStats {
    pub fn pending(&self) -> usize {
        self.pending_high + self.pending_normal + self.pending_low
    }
}

type Outcome = Result<Parameters, QueueError>;

/// Handle to one enqueued command.
#[derive(Debug)]
pub struct CommandTicket {
    command_id: CommandId,
    rx: oneshot::Receiver<Outcome>,
}

impl CommandTicket {
    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// Waits until the command settles.
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Err(QueueError::Unregistered))
    }
}

struct QueuedCommand {
    command: Command,
    attempts: u32,
    completion: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct QueueState {
    /// Indexed by [`Priority::tier_index`].
    tiers: [VecDeque<QueuedCommand>; 3],
    in_flight: Option<QueuedCommand>,
    state: DispatchState,
    closed: bool,
    processed: u64,
    failed: u64,
    retried: u64,
    dropped: u64,
}

impl QueueState {
    fn pending_len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn pop_next(&mut self) -> Option<QueuedCommand> {
        self.tiers.iter_mut().find_map(|tier| tier.pop_front())
    }

    fn push_back(&mut self, queued: QueuedCommand) {
        let tier = queued.command.priority.tier_index();
        self.tiers[tier].push_back(queued);
    }

    fn push_front(&mut self, queued: QueuedCommand) {
        let tier = queued.command.priority.tier_index();
        self.tiers[tier].push_front(queued);
    }
}

struct QueueShared {
    device_id: DeviceId,
    config: QueueConfig,
    transport: Arc<dyn Transport>,
    correlator: Arc<ResponseCorrelator>,
    sequence: SequenceCounter,
    state: Mutex<QueueState>,
    wake: Notify,
}

/// Priority queue and dispatch worker for a single device.
///
/// Dropping the queue has the same effect as [`shutdown`](Self::shutdown).
pub struct DeviceCommandQueue {
    shared: Arc<QueueShared>,
}

impl DeviceCommandQueue {
    /// Creates the queue and spawns its worker on the current Tokio runtime.
    pub fn spawn(
        device_id: DeviceId,
        config: QueueConfig,
        transport: Arc<dyn Transport>,
        correlator: Arc<ResponseCorrelator>,
    ) -> Self {
        Self::spawn_with_counter(device_id, config, transport, correlator, SequenceCounter::new())
    }

    /// Like [`spawn`](Self::spawn) with an explicit starting sequence counter.
    pub fn spawn_with_counter(
        device_id: DeviceId,
        config: QueueConfig,
        transport: Arc<dyn Transport>,
        correlator: Arc<ResponseCorrelator>,
        sequence: SequenceCounter,
    ) -> Self {
        let shared = Arc::new(QueueShared {
            device_id,
            config,
            transport,
            correlator,
            sequence,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
        });
        tokio::spawn(run_worker(Arc::clone(&shared)));
        Self { shared }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.shared.device_id
    }

    /// Queues `command` behind every pending command of equal or higher
    /// priority.
    ///
    /// When the queue is full the oldest LOW-priority entry is evicted with
    /// [`QueueError::Overflow`].  If there is no LOW entry to evict, the new
    /// command itself settles with `Overflow`; higher tiers are never dropped
    /// to make room.
    pub fn enqueue(&self, command: Command) -> CommandTicket {
        let (tx, rx) = oneshot::channel();
        let ticket = CommandTicket {
            command_id: command.id,
            rx,
        };
        let queued = QueuedCommand {
            command,
            attempts: 0,
            completion: tx,
        };

        let mut st = self.shared.lock();
        if st.closed {
            drop(st);
            let _ = queued.completion.send(Err(QueueError::Unregistered));
            return ticket;
        }

        if st.pending_len() >= self.shared.config.max_queue_size {
            st.dropped += 1;
            st.failed += 1;
            let evicted = st.tiers[Priority::Low.tier_index()].pop_front();
            match evicted {
                Some(evicted) => {
                    warn!(
                        device = %self.shared.device_id,
                        evicted = %evicted.command.kind,
                        "queue full; dropping oldest low-priority command"
                    );
                    let _ = evicted.completion.send(Err(QueueError::Overflow));
                }
                None => {
                    warn!(
                        device = %self.shared.device_id,
                        kind = %queued.command.kind,
                        "queue full; rejecting command"
                    );
                    drop(st);
                    let _ = queued.completion.send(Err(QueueError::Overflow));
                    return ticket;
                }
            }
        }

        trace!(
            device = %self.shared.device_id,
            kind = %queued.command.kind,
            priority = ?queued.command.priority,
            "enqueued"
        );
        st.push_back(queued);
        drop(st);
        self.shared.wake.notify_one();
        ticket
    }

    /// Enqueues `command` and waits for it to settle.
    pub async fn execute(&self, command: Command) -> Outcome {
        self.enqueue(command).wait().await
    }

    pub fn stats(&self) -> QueueStats {
        let st = self.shared.lock();
        QueueStats {
            pending_high: st.tiers[Priority::High.tier_index()].len(),
            pending_normal: st.tiers[Priority::Normal.tier_index()].len(),
            pending_low: st.tiers[Priority::Low.tier_index()].len(),
            in_flight: st.in_flight.is_some(),
            processed: st.processed,
            failed: st.failed,
            retried: st.retried,
            dropped: st.dropped,
            state: st.state,
        }
    }

    /// Settles every queued and in-flight command with
    /// [`QueueError::Unregistered`], cancels the device's correlator entries,
    /// and stops the worker.
    ///
    /// Settlement happens before this returns.  A transport write already in
    /// progress is allowed to finish, but its outcome is ignored.
    pub fn shutdown(&self) -> usize {
        let mut rejected = Vec::new();
        {
            let mut st = self.shared.lock();
            if st.closed {
                return 0;
            }
            st.closed = true;
            for tier in st.tiers.iter_mut() {
                rejected.extend(tier.drain(..));
            }
            if let Some(in_flight) = st.in_flight.take() {
                rejected.push(in_flight);
            }
            st.failed += rejected.len() as u64;
            st.state = DispatchState::Idle;
        }

        let count = rejected.len();
        for queued in rejected {
            let _ = queued.completion.send(Err(QueueError::Unregistered));
        }
        self.shared
            .correlator
            .cancel_device(&self.shared.device_id, "device unregistered");
        self.shared.wake.notify_one();

        if count > 0 {
            info!(device = %self.shared.device_id, count, "rejected pending commands on shutdown");
        }
        count
    }
}

impl Drop for DeviceCommandQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_worker(shared: Arc<QueueShared>) {
    debug!(device = %shared.device_id, "command queue worker started");
    loop {
        let next = {
            let mut st = shared.lock();
            if st.closed {
                break;
            }
            st.pop_next()
        };
        match next {
            Some(queued) => shared.dispatch(queued).await,
            None => shared.wake.notified().await,
        }
    }
    debug!(device = %shared.device_id, "command queue worker stopped");
}

impl QueueShared {
    async fn dispatch(&self, mut queued: QueuedCommand) {
        queued.attempts += 1;
        let attempt = queued.attempts;
        let seq = self.sequence.next();
        let command = queued.command.clone();

        let pending = if command.requires_response {
            match self.correlator.register_pending(&self.device_id, seq, command.kind) {
                Ok(pending) => Some(pending),
                Err(e) => {
                    warn!(device = %self.device_id, seq, "{e}");
                    self.finish(queued, Err(QueueError::Cancelled(e.to_string())));
                    return;
                }
            }
        } else {
            None
        };

        let bytes = match encode_command(&self.device_id, &command, seq) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.correlator.discard(&self.device_id, seq);
                self.finish(queued, Err(QueueError::Encode(e.to_string())));
                return;
            }
        };

        {
            let mut st = self.lock();
            if st.closed {
                drop(st);
                self.correlator.discard(&self.device_id, seq);
                let _ = queued.completion.send(Err(QueueError::Unregistered));
                return;
            }
            st.state = DispatchState::Dispatching;
            st.in_flight = Some(queued);
        }

        debug!(
            device = %self.device_id,
            kind = %command.kind,
            seq,
            attempt,
            "dispatching"
        );

        if let Err(e) = self.transport.write(&self.device_id, &bytes).await {
            self.correlator.discard(&self.device_id, seq);
            let Some(queued) = self.take_in_flight() else {
                return;
            };
            warn!(device = %self.device_id, kind = %command.kind, attempt, "write failed: {e}");
            self.retry_or_fail(
                queued,
                QueueError::Transport {
                    attempts: attempt,
                    reason: e.to_string(),
                },
            );
            return;
        }

        let Some(pending) = pending else {
            if let Some(queued) = self.take_in_flight() {
                self.finish(queued, Ok(Parameters::new()));
            }
            return;
        };

        self.set_state(DispatchState::AwaitingResponse);

        match tokio::time::timeout(self.config.response_timeout, pending.wait()).await {
            Ok(settled) => {
                let Some(queued) = self.take_in_flight() else {
                    return;
                };
                let outcome = settled.map_err(|e| match e {
                    CorrelatorError::Rejected { code, message } => QueueError::Device { code, message },
                    other => QueueError::Cancelled(other.to_string()),
                });
                self.finish(queued, outcome);
            }
            Err(_elapsed) => {
                self.correlator.discard(&self.device_id, seq);
                let Some(queued) = self.take_in_flight() else {
                    return;
                };
                debug!(device = %self.device_id, kind = %command.kind, seq, attempt, "response timed out");
                self.retry_or_fail(queued, QueueError::Timeout { attempts: attempt });
            }
        }
    }

    fn retry_or_fail(&self, queued: QueuedCommand, error: QueueError) {
        let retryable = self.config.auto_recovery && queued.attempts <= self.config.max_retries;
        if !retryable {
            warn!(
                device = %self.device_id,
                kind = %queued.command.kind,
                attempts = queued.attempts,
                "giving up: {error}"
            );
            self.finish(queued, Err(error));
            return;
        }

        let mut st = self.lock();
        if st.closed {
            drop(st);
            let _ = queued.completion.send(Err(QueueError::Unregistered));
            return;
        }
        st.retried += 1;
        st.state = DispatchState::RetryPending;
        debug!(
            device = %self.device_id,
            kind = %queued.command.kind,
            next_attempt = queued.attempts + 1,
            "scheduling retry"
        );
        st.push_front(queued);
    }

    fn finish(&self, queued: QueuedCommand, outcome: Outcome) {
        {
            let mut st = self.lock();
            st.state = DispatchState::Idle;
            if outcome.is_ok() {
                st.processed += 1;
            } else {
                st.failed += 1;
            }
        }
        if queued.completion.send(outcome).is_err() {
            trace!(device = %self.device_id, kind = %queued.command.kind, "caller stopped waiting");
        }
    }

    fn take_in_flight(&self) -> Option<QueuedCommand> {
        self.lock().in_flight.take()
    }

    fn set_state(&self, state: DispatchState) {
        self.lock().state = state;
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Application layer of the camera control engine.
//!
//! Everything here is transport-agnostic: use cases depend on the
//! [`transport::Transport`] port and never on a concrete adapter, so the
//! simulator, a real BLE link, or a test double can sit underneath.
//!
//! # Sub-modules
//!
//! - **`transport`** – The port the engine writes frames to and receives
//!   notification bytes from.
//!
//! - **`correlator`** – Matches RESPONSE/ERROR frames to the pending request
//!   with the same `(device, sequence)` key and fans notifications out to
//!   subscribers.
//!
//! - **`command_queue`** – One priority queue and dispatch worker per device:
//!   single-flight dispatch, response timeout, and bounded retry.
//!
//! - **`control`** – `CameraController`, the public surface.  Owns the cached
//!   per-device state and the event stream.
//!
//! - **`batch`** – Fans one command out to many devices and aggregates the
//!   per-device outcomes.
//!
//! - **`events`** – Typed event enums and the broadcast publisher behind them.

pub mod batch;
pub mod command_queue;
pub mod control;
pub mod correlator;
pub mod events;
pub mod transport;

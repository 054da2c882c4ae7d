//! Transport adapters implementing [`crate::application::transport::Transport`].
//!
//! Only the in-process simulator lives here today.  A BLE adapter would sit
//! beside it and map `write` / `on_notification` / `disconnect` onto a GATT
//! characteristic pair.

pub mod simulated;

pub use simulated::{CameraBehavior, SimulatedCamera, SimulatedTransport, WrittenFrame};

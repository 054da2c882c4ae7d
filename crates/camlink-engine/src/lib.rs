//! camlink-engine library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `camlink` binary share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::batch::{BatchCoordinator, BatchError, BatchOperation, BatchStatus};
pub use application::control::{CameraController, CommandResult, ControlError, ControllerConfig};
pub use application::events::{BatchEvent, ControlEvent};
pub use application::transport::{Transport, TransportError};

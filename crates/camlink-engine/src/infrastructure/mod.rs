//! Infrastructure layer for the camera control engine.
//!
//! Contains the adapters the application layer is wired to at startup: the
//! simulated camera transport and TOML configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `camlink_core`, but MUST NOT be imported by the `application` layer.

pub mod storage;
pub mod transport;

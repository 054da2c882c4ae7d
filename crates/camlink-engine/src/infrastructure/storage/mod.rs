//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the platform
//! directory (or an explicit path), writes it back, and supplies defaults
//! when no file exists yet.

pub mod config;

//! Domain types shared by the codec and the control engine.

pub mod command;
pub mod device;

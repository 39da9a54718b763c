#![cfg_attr(not(test), no_std)]

// must come first so the logging macros are visible to every module
mod fmt;

pub mod bridge;
pub mod broadcast;
pub mod bus;
pub mod config;
pub mod dbc;
pub mod diag;
pub mod encoder;
pub mod engine;
pub mod frame;
pub mod ids;
pub mod mapped;
pub mod standalone;
pub mod state;
pub mod tasks;

pub use bridge::Shared;
pub use bus::{Bus, BusDriver, CanPort, ReadySet, SendError};
pub use frame::CanFrame;
pub use state::{ControlState, Generation, Mode, Telemetry};

#![no_std]
//! Power and clock gating for a shared peripheral bus.
//!
//! The bus controller is only powered while at least one party holds a
//! vote on it. The last release turns the clocks off, drops the runtime
//! power reference and completes the "powered down" signal that suspend
//! paths wait on.

mod domain;
mod error;
mod gate;

pub use domain::{Clock, PowerDomain};
pub use error::GateError;
pub use gate::BusGate;

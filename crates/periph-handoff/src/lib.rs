//! Secure peripheral hand-off.
//!
//! Moves exclusive ownership of a shared peripheral (one interrupt line and
//! its I/O windows) from the primary VM to a trusted VM and back, through a
//! privileged resource-manager [`Arbiter`].
//!
//! A [`SessionController`] owns the session and serializes transitions.
//! Lending and reclaiming go through an [`ArbiterClient`], which bounds every
//! call and hands out single-use [`LendHandle`]s. The trusted side's two
//! release notices are merged by a [`NotificationJoin`], and any failure is
//! unwound to idle by the abort path.
//!
//! Bus power is voted through a [`bus_gate::BusGate`] that may be shared
//! with other users of the same bus.
//!
//! The crate is `no_std`. Logging goes to `defmt` or `log` depending on the
//! enabled feature.
#![cfg_attr(not(test), no_std)]

mod fmt;

mod abort;
mod arbiter;
mod config;
mod controller;
mod descriptor;
mod error;
mod join;
mod peripheral;
mod state;
mod status;

pub use abort::AbortReport;
pub use arbiter::{
    AccessGrant, AccessPerms, Arbiter, ArbiterClient, IrqLabel, LendHandle, LendRequest,
    MemTag, ReleaseTicket, ResourceKind, VmId,
};
pub use config::{
    BoardConfig, ConfigError, HandoffConfig, HandoffMode, Profile, Timeouts,
    DEFAULT_RELEASE_TIMEOUT_MS, DEFAULT_STEP_TIMEOUT_MS, DEFAULT_UNMASK_SETTLE_MS,
};
pub use controller::SessionController;
pub use descriptor::{DescriptorError, MemWindow, ResourceDescriptor, MAX_WINDOWS};
pub use error::{EventCode, HandoffError, RmError, Step};
pub use join::{NotificationJoin, RecordOutcome, ReleaseFlags, ReleaseSignal};
pub use peripheral::Peripheral;
pub use state::{Held, OwnershipState, SessionSnapshot};
pub use status::{HandoffStatus, StatusChannel, STATUS_RECEIVERS};

/// Errors that can occur while gating the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateError<E: core::fmt::Debug> {
    /// The power domain failed to come up. Nothing is left enabled.
    Domain(E),
    /// `release` was called while the bus was already off.
    NotAcquired,
}

impl<E: core::fmt::Debug> core::fmt::Display for GateError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GateError::Domain(e) => write!(f, "bus power domain error: {:?}", e),
            GateError::NotAcquired => write!(f, "bus released without a vote"),
        }
    }
}

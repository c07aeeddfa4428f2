use core::fmt;

/// Individual steps of a hand-off, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    BusAcquire,
    MemoryLend,
    MemoryNotify,
    InterruptLend,
    InterruptNotify,
    ReleaseRequest,
    AwaitRelease,
    MemoryReclaim,
    InterruptReclaim,
    BusRelease,
}

impl Step {
    /// The event published when this step fails.
    pub const fn failure_code(self) -> EventCode {
        match self {
            Step::BusAcquire | Step::BusRelease => EventCode::BusFailure,
            Step::MemoryLend | Step::InterruptLend => EventCode::LendFailure,
            Step::MemoryNotify | Step::InterruptNotify => {
                EventCode::LendNotifyFailure
            }
            Step::ReleaseRequest => EventCode::ReleaseFailure,
            Step::AwaitRelease => EventCode::ReleaseTimeout,
            Step::MemoryReclaim | Step::InterruptReclaim => {
                EventCode::ReclaimFailure
            }
        }
    }
}

/// Return code from the resource-manager transport, negative errno style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RmError(pub i32);

/// Codes published on the status channel.
///
/// Negative values are failures and double as abort codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventCode {
    None,
    Enabled,
    Disabled,
    NotificationsPending,
    LendFailure,
    LendNotifyFailure,
    AcceptFailure,
    FunctionalFailure,
    BusFailure,
    ReclaimFailure,
    ReleaseFailure,
    ReleaseTimeout,
    Shutdown,
    /// A fault code supplied by another subsystem.
    Other(i32),
}

impl EventCode {
    pub const fn value(self) -> i32 {
        match self {
            EventCode::None => 0,
            EventCode::Enabled => 1,
            EventCode::Disabled => 2,
            EventCode::NotificationsPending => 5,
            EventCode::LendFailure => -1,
            EventCode::LendNotifyFailure => -2,
            EventCode::AcceptFailure => -3,
            EventCode::FunctionalFailure => -4,
            EventCode::BusFailure => -5,
            EventCode::ReclaimFailure => -6,
            EventCode::ReleaseFailure => -7,
            EventCode::ReleaseTimeout => -8,
            EventCode::Shutdown => -9,
            EventCode::Other(v) => v,
        }
    }

    pub const fn from_value(value: i32) -> Self {
        match value {
            0 => EventCode::None,
            1 => EventCode::Enabled,
            2 => EventCode::Disabled,
            5 => EventCode::NotificationsPending,
            -1 => EventCode::LendFailure,
            -2 => EventCode::LendNotifyFailure,
            -3 => EventCode::AcceptFailure,
            -4 => EventCode::FunctionalFailure,
            -5 => EventCode::BusFailure,
            -6 => EventCode::ReclaimFailure,
            -7 => EventCode::ReleaseFailure,
            -8 => EventCode::ReleaseTimeout,
            -9 => EventCode::Shutdown,
            v => EventCode::Other(v),
        }
    }

    pub const fn is_failure(self) -> bool {
        self.value() < 0
    }
}

/// Errors returned by the public hand-off operations.
///
/// Whatever the variant, the controller is back in a usable state when the
/// caller sees it: either untouched, or unwound to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandoffError {
    /// Already enabled, or another transition holds the lock.
    Busy,
    /// The arbiter refused to lend a resource.
    LendFailure(Step),
    /// The arbiter refused a notification (lend notify or release request).
    NotifyFailure(Step),
    /// A resource could not be reclaimed.
    ReclaimFailure(Step),
    /// A step did not finish within its bound.
    Timeout(Step),
    /// The operation does not apply to the current state.
    InvalidState,
    /// The bus power domain did not come up.
    PowerFailure,
    /// Hand-off is not enabled for this board.
    Unsupported,
    /// Unknown value written to the control surface.
    InvalidValue(u32),
    /// A reported fault cancelled the transition.
    Aborted(EventCode),
}

impl HandoffError {
    /// The event code an abort triggered by this error records.
    pub const fn event_code(self) -> EventCode {
        match self {
            HandoffError::LendFailure(step)
            | HandoffError::NotifyFailure(step)
            | HandoffError::ReclaimFailure(step)
            | HandoffError::Timeout(step) => step.failure_code(),
            HandoffError::PowerFailure => EventCode::BusFailure,
            HandoffError::Aborted(code) => code,
            HandoffError::Busy
            | HandoffError::InvalidState
            | HandoffError::Unsupported
            | HandoffError::InvalidValue(_) => EventCode::None,
        }
    }
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffError::Busy => write!(f, "hand-off busy"),
            HandoffError::LendFailure(step) => {
                write!(f, "lend failed at {:?}", step)
            }
            HandoffError::NotifyFailure(step) => {
                write!(f, "notification failed at {:?}", step)
            }
            HandoffError::ReclaimFailure(step) => {
                write!(f, "reclaim failed at {:?}", step)
            }
            HandoffError::Timeout(step) => write!(f, "timed out at {:?}", step),
            HandoffError::InvalidState => {
                write!(f, "operation invalid in current state")
            }
            HandoffError::PowerFailure => write!(f, "bus power-up failed"),
            HandoffError::Unsupported => {
                write!(f, "hand-off not supported on this board")
            }
            HandoffError::InvalidValue(v) => {
                write!(f, "unsupported control value: {}", v)
            }
            HandoffError::Aborted(code) => {
                write!(f, "aborted with code {}", code.value())
            }
        }
    }
}

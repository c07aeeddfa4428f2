use bitflags::bitflags;

use crate::arbiter::LendHandle;
use crate::error::EventCode;
use crate::join::ReleaseFlags;

/// Where a session is in the hand-off.
///
/// Outside a transition only `Idle` and `AwaitingRelease` are observable;
/// the others are passed through while the transition lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OwnershipState {
    Idle,
    ResourcesAcquired,
    InterruptMasked,
    MemoryLent,
    InterruptLent,
    /// Lent to the trusted VM. Carries the notices received so far.
    AwaitingRelease(ReleaseFlags),
    AllReleased,
    MemoryReclaimed,
    InterruptReclaimed,
    ResourcesReleased,
}

impl OwnershipState {
    /// Whether the trusted VM currently owns the peripheral.
    pub fn is_enabled(self) -> bool {
        matches!(self, OwnershipState::AwaitingRelease(_))
    }
}

bitflags! {
    /// Everything a session may have to give back.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Held: u8 {
        /// A vote on the bus power gate.
        const BUS = 1 << 0;
        /// The peripheral interrupt is masked on the primary side.
        const MASKED = 1 << 1;
        /// I/O windows lent, possibly not yet notified.
        const MEMORY = 1 << 2;
        /// Interrupt lent, or a lend whose outcome is unknown.
        const INTERRUPT = 1 << 3;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Held {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Held({=u8:#x})", self.bits())
    }
}

/// Mutable record of one hand-off session. Lives behind the controller's
/// transition lock.
#[derive(Debug)]
pub(crate) struct Session {
    pub generation: u32,
    pub state: OwnershipState,
    pub abort_code: Option<EventCode>,
    pub held: Held,
    pub memory: Option<LendHandle>,
    pub interrupt: Option<LendHandle>,
}

impl Session {
    pub const fn new() -> Self {
        Self {
            generation: 0,
            state: OwnershipState::Idle,
            abort_code: None,
            held: Held::empty(),
            memory: None,
            interrupt: None,
        }
    }

    /// Start a new session and return its generation.
    pub fn begin(&mut self) -> u32 {
        self.generation = self.generation.wrapping_add(1);
        self.abort_code = None;
        self.generation
    }

    pub fn advance(&mut self, held: Held, state: OwnershipState) {
        self.held |= held;
        self.state = state;
        trace!("Hand-off state {:?}", state);
    }

    pub fn give_back(&mut self, held: Held, state: OwnershipState) {
        self.held.remove(held);
        self.state = state;
        trace!("Hand-off state {:?}", state);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.generation,
            state: self.state,
            abort_code: self.abort_code,
            held: self.held,
        }
    }
}

/// Copy of the session fields visible outside the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionSnapshot {
    pub generation: u32,
    pub state: OwnershipState,
    pub abort_code: Option<EventCode>,
    pub held: Held,
}

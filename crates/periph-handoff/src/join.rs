use core::cell::RefCell;

use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::signal::Signal;

use crate::arbiter::{MemTag, ReleaseTicket};
use crate::error::EventCode;

bitflags! {
    /// Release notices received so far in the current session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReleaseFlags: u8 {
        const MEMORY = 1 << 0;
        const INTERRUPT = 1 << 1;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ReleaseFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ReleaseFlags({=u8:#x})", self.bits())
    }
}

/// Which lent resource a release notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReleaseSignal {
    Memory,
    Interrupt,
}

impl ReleaseSignal {
    pub const fn flag(self) -> ReleaseFlags {
        match self {
            ReleaseSignal::Memory => ReleaseFlags::MEMORY,
            ReleaseSignal::Interrupt => ReleaseFlags::INTERRUPT,
        }
    }
}

/// What [`NotificationJoin::record`] did with a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordOutcome {
    /// From another generation, or nothing is armed. Ignored.
    Stale,
    /// Tag or parcel did not match the lent memory. Ignored.
    Rejected,
    /// Recorded; still waiting for the rest.
    Pending(ReleaseFlags),
    /// This notice completed the set.
    AllReleased,
    /// The set already completed this generation. Ignored.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinEvent {
    AllReleased(u32),
    Cancelled(EventCode),
}

struct JoinState {
    armed: bool,
    generation: u32,
    flags: ReleaseFlags,
    fired: bool,
    tag: Option<MemTag>,
    parcel: Option<u32>,
}

impl JoinState {
    const fn new() -> Self {
        Self {
            armed: false,
            generation: 0,
            flags: ReleaseFlags::empty(),
            fired: false,
            tag: None,
            parcel: None,
        }
    }
}

/// Collects the two independent release notices of a session and wakes the
/// waiter once both are in, whatever order they arrive in.
///
/// Notices are accepted from any context, including interrupt handlers;
/// recording only takes a blocking mutex for a few instructions.
pub struct NotificationJoin<M: RawMutex> {
    state: BlockingMutex<M, RefCell<JoinState>>,
    event: Signal<M, JoinEvent>,
}

impl<M: RawMutex> Default for NotificationJoin<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> NotificationJoin<M> {
    pub const fn new() -> Self {
        Self {
            state: BlockingMutex::new(RefCell::new(JoinState::new())),
            event: Signal::new(),
        }
    }

    /// Start accepting notices for `generation`. Anything recorded for an
    /// earlier session is discarded.
    pub fn arm(&self, generation: u32, tag: MemTag) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            *s = JoinState::new();
            s.armed = true;
            s.generation = generation;
            s.tag = Some(tag);
        });
        self.event.reset();
    }

    /// Remember which parcel the memory notice must name.
    pub fn bind_parcel(&self, parcel: u32) {
        self.state.lock(|s| s.borrow_mut().parcel = Some(parcel));
    }

    /// Stop accepting notices. Everything arriving afterwards is stale.
    pub fn disarm(&self) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.armed = false;
            s.flags = ReleaseFlags::empty();
        });
        self.event.reset();
    }

    /// Record a release notice.
    pub fn record(&self, signal: ReleaseSignal, generation: u32) -> RecordOutcome {
        let outcome = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if !s.armed || s.generation != generation {
                return RecordOutcome::Stale;
            }
            if s.fired {
                return RecordOutcome::Duplicate;
            }

            s.flags |= signal.flag();
            if s.flags.is_all() {
                s.flags = ReleaseFlags::empty();
                s.fired = true;
                RecordOutcome::AllReleased
            } else {
                RecordOutcome::Pending(s.flags)
            }
        });

        match outcome {
            RecordOutcome::AllReleased => {
                debug!("All resources released for generation {}", generation);
                self.event.signal(JoinEvent::AllReleased(generation));
            }
            RecordOutcome::Stale => {
                debug!("Ignoring {:?} notice from generation {}", signal, generation);
            }
            _ => {}
        }
        outcome
    }

    /// Record a notice carried by its ticket.
    pub fn record_ticket(&self, ticket: ReleaseTicket) -> RecordOutcome {
        self.record(ticket.signal, ticket.generation)
    }

    /// Record a memory release notice, checking that it names the memory
    /// this session lent.
    pub fn record_memory_release(
        &self,
        tag: MemTag,
        parcel: u32,
        generation: u32,
    ) -> RecordOutcome {
        let valid = self.state.lock(|s| {
            let s = s.borrow();
            s.tag == Some(tag) && s.parcel == Some(parcel)
        });
        if !valid {
            warn!("Memory release for unknown parcel {} ({:?})", parcel, tag);
            return RecordOutcome::Rejected;
        }
        self.record(ReleaseSignal::Memory, generation)
    }

    /// Notices recorded since arming that have not yet completed the set.
    pub fn pending(&self) -> ReleaseFlags {
        self.state.lock(|s| s.borrow().flags)
    }

    /// Generation currently accepted, if armed.
    pub fn generation(&self) -> Option<u32> {
        self.state.lock(|s| {
            let s = s.borrow();
            s.armed.then_some(s.generation)
        })
    }

    /// Wake the waiter with a fault instead of a completion.
    pub fn cancel(&self, code: EventCode) {
        self.event.signal(JoinEvent::Cancelled(code));
    }

    /// Resolves once both notices for `generation` are in, or with the
    /// fault code if the wait was cancelled.
    pub async fn wait_all_released(&self, generation: u32) -> Result<(), EventCode> {
        loop {
            match self.event.wait().await {
                JoinEvent::AllReleased(g) if g == generation => return Ok(()),
                JoinEvent::AllReleased(g) => {
                    debug!("Dropping completion for generation {}", g);
                }
                JoinEvent::Cancelled(code) => return Err(code),
            }
        }
    }
}

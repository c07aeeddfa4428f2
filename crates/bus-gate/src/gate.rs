use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicUsize, Ordering};

use crate::domain::{Clock, PowerDomain};
use crate::error::GateError;

/// Phase state machine for the bus power lifecycle.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Clocks off, no runtime reference held.
    Off,
    /// Runtime reference held and clocks running.
    On,
}

/// Power steps that may have taken effect.
///
/// A step is recorded before it is awaited and cleared only once its undo
/// has completed, so a transition dropped mid-await leaves behind
/// everything it might have done.
#[derive(Clone, Copy)]
struct Progress {
    runtime: bool,
    interface: bool,
    core: bool,
}

impl Progress {
    fn clock(&mut self, clock: Clock) -> &mut bool {
        match clock {
            Clock::Interface => &mut self.interface,
            Clock::Core => &mut self.core,
        }
    }

    fn is_clear(&self) -> bool {
        !(self.runtime || self.interface || self.core)
    }
}

struct Inner<D> {
    domain: D,
    phase: Phase,
    progress: Progress,
}

impl<D: PowerDomain> Inner<D> {
    async fn power_up(&mut self) -> Result<(), D::Error> {
        self.progress.runtime = true;
        if let Err(e) = self.domain.runtime_get().await {
            self.progress.runtime = false;
            return Err(e);
        }
        if !self.domain.has_clocks() {
            return Ok(());
        }

        for clock in [Clock::Interface, Clock::Core] {
            *self.progress.clock(clock) = true;
            if let Err(e) = self.domain.clock_enable(clock).await {
                *self.progress.clock(clock) = false;
                self.power_down().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undo every recorded step, clocks first.
    async fn power_down(&mut self) {
        for clock in [Clock::Core, Clock::Interface] {
            let on = self.progress.clock(clock);
            if *on {
                *on = false;
                self.domain.clock_disable(clock);
            }
        }
        if self.progress.runtime {
            self.domain.runtime_put().await;
            self.progress.runtime = false;
        }
    }
}

/// Vote-counted power gate for a shared bus.
///
/// The first [`acquire`](Self::acquire) powers the domain up, the last
/// [`release`](Self::release) powers it down. Power transitions happen
/// under the gate's mutex, so a concurrent acquire never observes a
/// half-powered bus.
///
/// Both calls may be dropped mid-transition (for instance by a timeout).
/// Whatever the dropped transition left behind is undone by
/// [`settle`](Self::settle) or by the next acquire.
pub struct BusGate<M: RawMutex, D: PowerDomain> {
    inner: Mutex<M, Inner<D>>,
    users: AtomicUsize,
    powered_down: Signal<M, ()>,
}

impl<M: RawMutex, D: PowerDomain> BusGate<M, D> {
    /// Create a gate around a domain that is currently off.
    pub const fn new(domain: D) -> Self {
        Self {
            inner: Mutex::new(Inner {
                domain,
                phase: Phase::Off,
                progress: Progress {
                    runtime: false,
                    interface: false,
                    core: false,
                },
            }),
            users: AtomicUsize::new(0),
            powered_down: Signal::new(),
        }
    }

    /// Take a vote on the bus, powering it up if this is the first one.
    ///
    /// On failure every step already taken is rolled back and no vote is
    /// recorded. The vote is only counted once power-up has completed.
    pub async fn acquire(&self) -> Result<(), GateError<D::Error>> {
        let mut inner = self.inner.lock().await;

        if inner.phase == Phase::Off {
            // Leftovers from a dropped transition.
            inner.power_down().await;
            inner.power_up().await.map_err(GateError::Domain)?;
            inner.phase = Phase::On;
            self.powered_down.reset();
        }
        self.users.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop a vote. The last vote powers the bus down and completes
    /// [`wait_powered_down`](Self::wait_powered_down).
    ///
    /// The vote is dropped on the first poll, before any await, so a
    /// release that is cancelled later never needs repeating.
    pub async fn release(&self) -> Result<(), GateError<D::Error>> {
        let remaining = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| GateError::NotAcquired)?
            - 1;
        if remaining == 0 {
            self.settle().await;
        }
        Ok(())
    }

    /// Power the bus down if nobody holds a vote, finishing whatever a
    /// dropped acquire or release left half done.
    pub async fn settle(&self) {
        let mut inner = self.inner.lock().await;
        if self.users.load(Ordering::Acquire) > 0 {
            return;
        }

        inner.phase = Phase::Off;
        inner.power_down().await;
        self.powered_down.signal(());
    }

    /// Resolves once the bus has no votes and is fully powered off.
    pub async fn wait_powered_down(&self) {
        while !self.is_settled() {
            self.powered_down.wait().await;
        }
    }

    fn is_settled(&self) -> bool {
        self.users.load(Ordering::Acquire) == 0
            && self
                .inner
                .try_lock()
                .is_ok_and(|inner| inner.phase == Phase::Off && inner.progress.is_clear())
    }

    /// Returns the current number of votes.
    pub fn user_count(&self) -> usize {
        self.users.load(Ordering::Relaxed)
    }

    /// Returns `Some(true)` if powered, `Some(false)` if off, `None` if a
    /// transition is in progress.
    ///
    /// This is a non-blocking best-effort check using `try_lock`.
    pub fn is_powered(&self) -> Option<bool> {
        self.inner
            .try_lock()
            .ok()
            .map(|inner| inner.phase == Phase::On)
    }
}

//! Unwinding a session back to idle.
//!
//! The abort path walks back from whatever the session holds, never from
//! where it thinks it got to: each [`Held`] bit is given back in reverse
//! acquisition order, interrupt before memory, then the interrupt mask, then
//! the bus. A resource that cannot be given back is logged and dropped; the
//! session still ends up idle.

use bus_gate::{BusGate, PowerDomain};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{with_timeout, Duration};

use crate::arbiter::{Arbiter, ArbiterClient, LendHandle};
use crate::error::EventCode;
use crate::peripheral::Peripheral;
use crate::state::{Held, OwnershipState, Session};

/// What an abort managed to give back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AbortReport {
    pub code: EventCode,
    /// Resources returned to the primary VM.
    pub reversed: Held,
    /// Resources that could not be returned and were abandoned.
    pub degraded: Held,
}

impl AbortReport {
    pub(crate) fn noop(code: EventCode) -> Self {
        Self {
            code,
            reversed: Held::empty(),
            degraded: Held::empty(),
        }
    }

    /// Nothing was held when the abort ran.
    pub fn is_noop(&self) -> bool {
        self.reversed.is_empty() && self.degraded.is_empty()
    }

    /// Everything held was given back.
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }
}

pub(crate) struct AbortHandler<'h, M, A, D, P>
where
    M: RawMutex,
    A: Arbiter,
    D: PowerDomain,
{
    pub arbiter: &'h mut ArbiterClient<A>,
    pub peripheral: &'h mut P,
    pub gate: &'h BusGate<M, D>,
    pub step_timeout: Duration,
}

impl<M, A, D, P> AbortHandler<'_, M, A, D, P>
where
    M: RawMutex,
    A: Arbiter,
    D: PowerDomain,
    P: Peripheral,
{
    pub async fn unwind(mut self, session: &mut Session, code: EventCode) -> AbortReport {
        let mut report = AbortReport::noop(code);
        let held = session.held;
        warn!("Aborting hand-off with code {}, holding {:?}", code.value(), held);

        if let Some(interrupt) = session.interrupt.take() {
            if self.reclaim_interrupt(interrupt).await {
                report.reversed |= Held::INTERRUPT;
            } else {
                report.degraded |= Held::INTERRUPT;
            }
        }

        match session.memory.take() {
            Some(memory) => {
                if self.reclaim_memory(memory).await {
                    report.reversed |= Held::MEMORY;
                } else {
                    report.degraded |= Held::MEMORY;
                }
            }
            None if held.contains(Held::MEMORY) => {
                error!("Memory lend outcome unknown, no parcel to reclaim");
                report.degraded |= Held::MEMORY;
            }
            None => {}
        }

        if held.contains(Held::MASKED) {
            self.peripheral.unmask_interrupt();
            report.reversed |= Held::MASKED;
        }

        // Released at most once; the gate drops the vote on the first poll.
        if held.contains(Held::BUS) {
            match with_timeout(self.step_timeout, self.gate.release()).await {
                Ok(Ok(())) => report.reversed |= Held::BUS,
                Ok(Err(_)) => {
                    error!("Bus release failed during abort");
                    report.degraded |= Held::BUS;
                }
                Err(_) => {
                    error!("Bus power-down overran during abort, deferred");
                    report.degraded |= Held::BUS;
                }
            }
        }

        session.held = Held::empty();
        session.state = OwnershipState::Idle;
        session.abort_code = Some(code);

        if !report.is_clean() {
            error!("Abort left {:?} unrecovered", report.degraded);
        }
        report
    }

    /// One retry, then the handle is abandoned.
    async fn reclaim_interrupt(&mut self, interrupt: LendHandle) -> bool {
        let interrupt = match self.arbiter.reclaim_interrupt(interrupt).await {
            Ok(()) => return true,
            Err((_, interrupt)) => interrupt,
        };
        warn!("Retrying interrupt reclaim");
        match self.arbiter.reclaim_interrupt(interrupt).await {
            Ok(()) => true,
            Err((e, interrupt)) => {
                error!("Abandoning {:?} after {:?}", interrupt, e);
                false
            }
        }
    }

    async fn reclaim_memory(&mut self, memory: LendHandle) -> bool {
        let memory = match self.arbiter.reclaim_memory(memory).await {
            Ok(()) => return true,
            Err((_, memory)) => memory,
        };
        warn!("Retrying memory reclaim");
        match self.arbiter.reclaim_memory(memory).await {
            Ok(()) => true,
            Err((e, memory)) => {
                error!("Abandoning {:?} after {:?}", memory, e);
                false
            }
        }
    }
}

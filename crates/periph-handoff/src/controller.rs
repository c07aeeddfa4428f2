use bus_gate::{BusGate, PowerDomain};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Timer};
use portable_atomic::{AtomicI32, Ordering};

use crate::abort::{AbortHandler, AbortReport};
use crate::arbiter::{Arbiter, ArbiterClient, ReleaseTicket};
use crate::config::{HandoffConfig, HandoffMode};
use crate::descriptor::ResourceDescriptor;
use crate::error::{EventCode, HandoffError, Step};
use crate::join::{NotificationJoin, ReleaseFlags, ReleaseSignal};
use crate::peripheral::Peripheral;
use crate::state::{Held, OwnershipState, Session, SessionSnapshot};
use crate::status::{HandoffStatus, StatusChannel};

const NO_FAULT: i32 = 0;

struct Inner<A: Arbiter, P> {
    session: Session,
    arbiter: ArbiterClient<A>,
    peripheral: P,
}

/// Drives one peripheral's hand-off between the primary and trusted VMs.
///
/// `enable`, `disable` and `abort` are serialized by a single transition
/// lock. `enable` and `disable` never queue behind a transition in flight;
/// they fail with [`HandoffError::Busy`] instead. Release notices and fault
/// reports bypass the lock entirely: the former go to the
/// [`NotificationJoin`], the latter to [`report_fault`](Self::report_fault).
///
/// Every failure unwinds to idle before the error is returned.
pub struct SessionController<'a, M, A, D, P>
where
    M: RawMutex,
    A: Arbiter,
    D: PowerDomain,
    P: Peripheral,
{
    config: HandoffConfig,
    inner: Mutex<M, Inner<A, P>>,
    gate: &'a BusGate<M, D>,
    join: &'a NotificationJoin<M>,
    status: &'a StatusChannel<M>,
    pending_fault: AtomicI32,
}

impl<'a, M, A, D, P> SessionController<'a, M, A, D, P>
where
    M: RawMutex,
    A: Arbiter,
    D: PowerDomain,
    P: Peripheral,
{
    pub fn new(
        config: HandoffConfig,
        arbiter: A,
        peripheral: P,
        gate: &'a BusGate<M, D>,
        join: &'a NotificationJoin<M>,
        status: &'a StatusChannel<M>,
    ) -> Self {
        let arbiter = ArbiterClient::new(arbiter, config.profile, config.timeouts.step);
        Self {
            config,
            inner: Mutex::new(Inner {
                session: Session::new(),
                arbiter,
                peripheral,
            }),
            gate,
            join,
            status,
            pending_fault: AtomicI32::new(NO_FAULT),
        }
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    /// Active hand-off profile, `"primary"` or `"secondary"`.
    pub fn profile(&self) -> &'static str {
        self.config.profile.as_str()
    }

    pub fn status(&self) -> HandoffStatus {
        self.status.snapshot()
    }

    /// Session fields, or `None` while a transition holds the lock.
    pub fn session(&self) -> Option<SessionSnapshot> {
        let inner = self.inner.try_lock().ok()?;
        let mut snapshot = inner.session.snapshot();
        if snapshot.state.is_enabled() {
            snapshot.state = OwnershipState::AwaitingRelease(self.join.pending());
        }
        Some(snapshot)
    }

    pub fn state(&self) -> Option<OwnershipState> {
        self.session().map(|s| s.state)
    }

    /// Run `f` against the arbiter transport, unless a transition is in flight.
    pub fn with_arbiter<R>(&self, f: impl FnOnce(&A) -> R) -> Option<R> {
        let inner = self.inner.try_lock().ok()?;
        Some(f(inner.arbiter.arbiter()))
    }

    /// Lend the peripheral to the trusted VM.
    pub async fn enable(&self) -> Result<(), HandoffError> {
        let HandoffMode::Vm(resources) = &self.config.mode else {
            warn!("Hand-off not supported on this board");
            return Err(HandoffError::Unsupported);
        };
        let Ok(mut inner) = self.inner.try_lock() else {
            warn!("Hand-off transition already in progress");
            return Err(HandoffError::Busy);
        };
        if inner.session.state != OwnershipState::Idle {
            warn!("Hand-off already enabled");
            return Err(HandoffError::Busy);
        }
        if !inner.peripheral.is_powered() {
            error!("Peripheral not powered, refusing hand-off");
            return Err(HandoffError::InvalidState);
        }

        self.pending_fault.store(NO_FAULT, Ordering::Release);
        let generation = inner.session.begin();
        self.join.arm(generation, self.config.profile.mem_tag());
        info!("Enabling {} hand-off, generation {}", self.profile(), generation);

        match self.lend(&mut inner, resources, generation).await {
            Ok(()) => {
                inner.session.advance(
                    Held::empty(),
                    OwnershipState::AwaitingRelease(ReleaseFlags::empty()),
                );
                self.status.update(|s| {
                    s.enabled = true;
                    s.last_event = EventCode::Enabled.value();
                    s.generation = generation;
                });
                info!("Hand-off enabled");
                Ok(())
            }
            Err(e) => {
                error!("Hand-off enable failed: {:?}", e);
                self.unwind(&mut inner, e.event_code()).await;
                Err(e)
            }
        }
    }

    async fn lend(
        &self,
        inner: &mut Inner<A, P>,
        resources: &ResourceDescriptor,
        generation: u32,
    ) -> Result<(), HandoffError> {
        let Inner { session, arbiter, peripheral } = inner;

        match with_timeout(self.config.timeouts.step, self.gate.acquire()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                error!("Bus power-up failed");
                return Err(HandoffError::PowerFailure);
            }
            Err(_) => {
                error!("Bus power-up timed out");
                self.settle_bus().await;
                return Err(HandoffError::Timeout(Step::BusAcquire));
            }
        }
        session.advance(Held::BUS, OwnershipState::ResourcesAcquired);

        peripheral.mask_interrupt();
        session.advance(Held::MASKED, OwnershipState::InterruptMasked);
        peripheral.release_all_contacts();

        let memory = match arbiter.lend_memory(resources, generation).await {
            Ok(memory) => memory,
            Err(e @ HandoffError::Timeout(_)) => {
                // The arbiter may have lent without answering.
                session.held |= Held::MEMORY;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.join.bind_parcel(memory.raw());
        session.advance(Held::MEMORY, OwnershipState::MemoryLent);
        let memory = session.memory.insert(memory);
        arbiter.notify_memory_lent(memory).await?;

        let ticket = ReleaseTicket { signal: ReleaseSignal::Interrupt, generation };
        let interrupt = match arbiter.lend_interrupt(memory, resources.irq(), ticket).await {
            Ok(interrupt) => interrupt,
            Err(e @ HandoffError::Timeout(_)) => {
                // Reclaimed by label, so an unanswered lend can still be undone.
                session.interrupt = Some(arbiter.interrupt_handle(generation));
                session.held |= Held::INTERRUPT;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        session.advance(Held::INTERRUPT, OwnershipState::InterruptLent);
        let interrupt = session.interrupt.insert(interrupt);
        arbiter.notify_interrupt_lent(interrupt).await?;

        match self.take_fault() {
            Some(code) => Err(HandoffError::Aborted(code)),
            None => Ok(()),
        }
    }

    /// Take the peripheral back from the trusted VM.
    pub async fn disable(&self) -> Result<(), HandoffError> {
        let Ok(mut inner) = self.inner.try_lock() else {
            warn!("Hand-off transition already in progress");
            return Err(HandoffError::Busy);
        };
        if !inner.session.state.is_enabled() {
            if let Some(code) = self.take_fault() {
                debug!("Dropping fault {} reported while idle", code.value());
            }
            return Err(HandoffError::InvalidState);
        }
        if let Some(code) = self.take_fault() {
            self.unwind(&mut inner, code).await;
            return Err(HandoffError::Aborted(code));
        }

        let generation = inner.session.generation;
        info!("Disabling hand-off, generation {}", generation);

        match self.reclaim(&mut inner, generation).await {
            Ok(()) => {
                self.status.update(|s| {
                    s.enabled = false;
                    s.last_event = EventCode::Disabled.value();
                });
                info!("Hand-off disabled");
                Ok(())
            }
            Err(e) => {
                error!("Hand-off disable failed: {:?}", e);
                self.unwind(&mut inner, e.event_code()).await;
                Err(e)
            }
        }
    }

    async fn reclaim(
        &self,
        inner: &mut Inner<A, P>,
        generation: u32,
    ) -> Result<(), HandoffError> {
        let Inner { session, arbiter, peripheral } = inner;
        let step = self.config.timeouts.step;

        let Some(memory) = session.memory.as_ref() else {
            return Err(HandoffError::InvalidState);
        };
        arbiter.request_release(memory).await?;

        self.status.notify_event(EventCode::NotificationsPending);
        match with_timeout(
            self.config.timeouts.release,
            self.join.wait_all_released(generation),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(code)) => return Err(HandoffError::Aborted(code)),
            Err(_) => {
                error!("Release incomplete, received {:?}", self.join.pending());
                return Err(HandoffError::Timeout(Step::AwaitRelease));
            }
        }
        self.join.disarm();
        session.advance(Held::empty(), OwnershipState::AllReleased);

        if let Some(memory) = session.memory.take() {
            if let Err((e, memory)) = arbiter.reclaim_memory(memory).await {
                session.memory = Some(memory);
                return Err(e);
            }
        }
        session.give_back(Held::MEMORY, OwnershipState::MemoryReclaimed);

        if let Some(interrupt) = session.interrupt.take() {
            if let Err((e, interrupt)) = arbiter.reclaim_interrupt(interrupt).await {
                session.interrupt = Some(interrupt);
                return Err(e);
            }
        }
        session.give_back(Held::INTERRUPT, OwnershipState::InterruptReclaimed);

        Timer::after(self.config.timeouts.unmask_settle).await;
        peripheral.unmask_interrupt();
        session.held.remove(Held::MASKED);

        // The vote is gone once release has been polled, even if the
        // power-down behind it overruns.
        let released = with_timeout(step, self.gate.release()).await;
        session.give_back(Held::BUS, OwnershipState::ResourcesReleased);
        match released {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(HandoffError::ReclaimFailure(Step::BusRelease)),
            Err(_) => {
                warn!("Bus power-down deferred to the next acquire");
                return Err(HandoffError::Timeout(Step::BusRelease));
            }
        }
        session.state = OwnershipState::Idle;
        Ok(())
    }

    /// Undo whatever a dropped power transition left on the bus.
    async fn settle_bus(&self) {
        if with_timeout(self.config.timeouts.step, self.gate.settle())
            .await
            .is_err()
        {
            warn!("Bus settle timed out, deferred to the next acquire");
        }
    }

    /// Unwind whatever the session holds and return to idle.
    ///
    /// Cancels a `disable` blocked on release notices, then waits for the
    /// transition lock. With nothing held this is a no-op.
    pub async fn abort(&self, code: EventCode) -> AbortReport {
        self.report_fault(code);
        let mut inner = self.inner.lock().await;

        if inner.session.held.is_empty() && inner.session.state == OwnershipState::Idle {
            self.take_fault();
            debug!("Abort with nothing held");
            return AbortReport::noop(code);
        }
        self.unwind(&mut inner, code).await
    }

    /// Record a fault from another subsystem.
    ///
    /// Safe from any context. An in-flight `disable` unwinds as soon as it
    /// sees the fault; otherwise the next `disable` or `abort` picks it up.
    pub fn report_fault(&self, code: EventCode) {
        let code = match code {
            EventCode::None => EventCode::FunctionalFailure,
            code => code,
        };
        warn!("Fault reported: {}", code.value());
        self.pending_fault.store(code.value(), Ordering::Release);
        self.join.cancel(code);
    }

    /// Fault reported but not yet acted on.
    pub fn pending_fault(&self) -> Option<EventCode> {
        match self.pending_fault.load(Ordering::Acquire) {
            NO_FAULT => None,
            value => Some(EventCode::from_value(value)),
        }
    }

    fn take_fault(&self) -> Option<EventCode> {
        match self.pending_fault.swap(NO_FAULT, Ordering::AcqRel) {
            NO_FAULT => None,
            value => Some(EventCode::from_value(value)),
        }
    }

    async fn unwind(&self, inner: &mut Inner<A, P>, code: EventCode) -> AbortReport {
        self.take_fault();
        self.join.disarm();

        let Inner { session, arbiter, peripheral } = inner;
        let report = AbortHandler {
            arbiter,
            peripheral,
            gate: self.gate,
            step_timeout: self.config.timeouts.step,
        }
        .unwind(session, code)
        .await;

        self.status.update(|s| {
            s.enabled = false;
            s.last_event = code.value();
            s.last_abort = Some(code.value());
        });
        report
    }

    /// Control surface: `1` enables, `0` disables.
    pub async fn write_control(&self, value: u32) -> Result<(), HandoffError> {
        if self.config.mode == HandoffMode::NotSupported {
            warn!("Hand-off not supported on this board");
            return Err(HandoffError::Unsupported);
        }

        match value {
            0 => {
                if let Some(code) = self.pending_fault() {
                    self.abort(code).await;
                    return Ok(());
                }
                match self.disable().await {
                    Err(HandoffError::InvalidState) => {
                        info!("Hand-off already disabled");
                        Ok(())
                    }
                    result => result,
                }
            }
            1 => self.enable().await,
            other => {
                warn!("Unsupported control value {}", other);
                Err(HandoffError::InvalidValue(other))
            }
        }
    }

    pub fn read_control(&self) -> u32 {
        self.status.snapshot().enabled as u32
    }

    /// Tear the session down, aborting with [`EventCode::Shutdown`] if the
    /// peripheral is not idle.
    pub async fn shutdown(&self) -> Option<AbortReport> {
        let mut inner = self.inner.lock().await;
        let report = if inner.session.held.is_empty()
            && inner.session.state == OwnershipState::Idle
        {
            None
        } else {
            Some(self.unwind(&mut inner, EventCode::Shutdown).await)
        };
        self.join.disarm();
        self.settle_bus().await;
        info!("Hand-off shut down");
        report
    }
}

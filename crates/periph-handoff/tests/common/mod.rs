#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use bus_gate::{BusGate, Clock, PowerDomain};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Timer};
use periph_handoff::{
    Arbiter, HandoffConfig, IrqLabel, LendRequest, MemTag, MemWindow, NotificationJoin,
    Peripheral, Profile, ReleaseTicket, ResourceDescriptor, RmError, SessionController,
    StatusChannel, Timeouts,
};

pub type Raw = CriticalSectionRawMutex;
pub type Gate = BusGate<Raw, MockDomain>;
pub type Join = NotificationJoin<Raw>;
pub type Status = StatusChannel<Raw>;
pub type Controller<'a> = SessionController<'a, Raw, MockArbiter<'a>, MockDomain, MockPeripheral>;

pub const PARCEL: u32 = 0x5a;
pub const SLOW_CALL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Mock arbiter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    MemLend,
    MemNotify,
    IrqLend,
    IrqNotify,
    RequestRelease,
    MemReclaim,
    IrqReclaim,
}

/// Order in which the trusted side answers a release request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOrder {
    MemoryFirst,
    InterruptFirst,
    MemoryOnly,
    Never,
}

/// Shared between a test and the arbiter it hands to the controller.
#[derive(Debug)]
pub struct ArbiterLog {
    pub calls: Vec<Call>,
    pub order: ReleaseOrder,
    /// Fails every call of this kind with rc -22.
    pub fail: Option<Call>,
    /// Never answers calls of this kind.
    pub hang: Option<Call>,
    /// Answers calls of this kind after [`SLOW_CALL`].
    pub slow: Option<Call>,
    pub scatter: Vec<MemWindow>,
    pub tag: Option<MemTag>,
    pub label: Option<IrqLabel>,
    pub mem_ticket: Option<ReleaseTicket>,
    pub irq_ticket: Option<ReleaseTicket>,
}

impl ArbiterLog {
    fn new(order: ReleaseOrder) -> Self {
        Self {
            calls: Vec::new(),
            order,
            fail: None,
            hang: None,
            slow: None,
            scatter: Vec::new(),
            tag: None,
            label: None,
            mem_ticket: None,
            irq_ticket: None,
        }
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    pub fn position(&self, call: Call) -> Option<usize> {
        self.calls.iter().position(|c| *c == call)
    }
}

pub struct MockArbiter<'a> {
    log: Rc<RefCell<ArbiterLog>>,
    join: &'a Join,
}

impl MockArbiter<'_> {
    async fn enter(&self, call: Call) -> Result<(), RmError> {
        let (fail, hang, slow) = {
            let mut log = self.log.borrow_mut();
            log.calls.push(call);
            (log.fail == Some(call), log.hang == Some(call), log.slow == Some(call))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if slow {
            Timer::after(SLOW_CALL).await;
        }
        if fail {
            return Err(RmError(-22));
        }
        Ok(())
    }

    fn deliver(&self, parcel: u32) {
        let log = self.log.borrow();
        let (Some(mem), Some(irq), Some(tag)) = (log.mem_ticket, log.irq_ticket, log.tag) else {
            return;
        };
        match log.order {
            ReleaseOrder::MemoryFirst => {
                self.join.record_memory_release(tag, parcel, mem.generation);
                self.join.record_ticket(irq);
            }
            ReleaseOrder::InterruptFirst => {
                self.join.record_ticket(irq);
                self.join.record_memory_release(tag, parcel, mem.generation);
            }
            ReleaseOrder::MemoryOnly => {
                self.join.record_memory_release(tag, parcel, mem.generation);
            }
            ReleaseOrder::Never => {}
        }
    }
}

impl Arbiter for MockArbiter<'_> {
    async fn mem_lend(&mut self, request: LendRequest<'_>) -> Result<u32, RmError> {
        self.enter(Call::MemLend).await?;
        let mut log = self.log.borrow_mut();
        log.scatter = request.scatter.to_vec();
        log.tag = Some(request.tag);
        log.mem_ticket = Some(request.ticket);
        Ok(PARCEL)
    }

    async fn mem_notify(&mut self, parcel: u32, _tag: MemTag) -> Result<(), RmError> {
        assert_eq!(parcel, PARCEL);
        self.enter(Call::MemNotify).await
    }

    async fn irq_lend(
        &mut self,
        label: IrqLabel,
        _irq: u32,
        ticket: ReleaseTicket,
    ) -> Result<(), RmError> {
        self.enter(Call::IrqLend).await?;
        let mut log = self.log.borrow_mut();
        log.label = Some(label);
        log.irq_ticket = Some(ticket);
        Ok(())
    }

    async fn irq_lend_notify(&mut self, _label: IrqLabel) -> Result<(), RmError> {
        self.enter(Call::IrqNotify).await
    }

    async fn request_release(&mut self, parcel: u32, _label: IrqLabel) -> Result<(), RmError> {
        self.enter(Call::RequestRelease).await?;
        self.deliver(parcel);
        Ok(())
    }

    async fn mem_reclaim(&mut self, parcel: u32) -> Result<(), RmError> {
        assert_eq!(parcel, PARCEL);
        self.enter(Call::MemReclaim).await
    }

    async fn irq_reclaim(&mut self, _label: IrqLabel) -> Result<(), RmError> {
        self.enter(Call::IrqReclaim).await
    }
}

// ---------------------------------------------------------------------------
// Mock peripheral and bus domain
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PanelState {
    pub powered: bool,
    pub masked: bool,
    pub flushes: usize,
}

pub struct MockPeripheral(Rc<RefCell<PanelState>>);

impl Peripheral for MockPeripheral {
    fn is_powered(&self) -> bool {
        self.0.borrow().powered
    }

    fn mask_interrupt(&mut self) {
        let mut panel = self.0.borrow_mut();
        assert!(!panel.masked, "interrupt masked twice");
        panel.masked = true;
    }

    fn unmask_interrupt(&mut self) {
        let mut panel = self.0.borrow_mut();
        assert!(panel.masked, "interrupt unmasked while not masked");
        panel.masked = false;
    }

    fn release_all_contacts(&mut self) {
        self.0.borrow_mut().flushes += 1;
    }
}

#[derive(Debug)]
pub struct MockError;

/// Bus power as seen by a test.
#[derive(Debug, Default)]
pub struct BusState {
    pub refs: i32,
    pub fail: bool,
    /// Delay before the core clock comes up.
    pub slow_clock: Option<Duration>,
    /// Delay before the runtime reference is dropped.
    pub slow_put: Option<Duration>,
}

pub struct MockDomain(Rc<RefCell<BusState>>);

impl PowerDomain for MockDomain {
    type Error = MockError;

    async fn runtime_get(&mut self) -> Result<(), MockError> {
        let mut bus = self.0.borrow_mut();
        if bus.fail {
            return Err(MockError);
        }
        bus.refs += 1;
        Ok(())
    }

    async fn runtime_put(&mut self) {
        let delay = self.0.borrow().slow_put;
        if let Some(delay) = delay {
            Timer::after(delay).await;
        }
        let mut bus = self.0.borrow_mut();
        assert!(bus.refs > 0, "runtime reference dropped twice");
        bus.refs -= 1;
    }

    async fn clock_enable(&mut self, clock: Clock) -> Result<(), MockError> {
        let delay = self.0.borrow().slow_clock;
        if let (Clock::Core, Some(delay)) = (clock, delay) {
            Timer::after(delay).await;
        }
        Ok(())
    }

    fn clock_disable(&mut self, _clock: Clock) {}
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// Handles a test keeps after the mocks move into the controller.
pub struct Fixture {
    pub arbiter: Rc<RefCell<ArbiterLog>>,
    pub panel: Rc<RefCell<PanelState>>,
    pub bus: Rc<RefCell<BusState>>,
}

impl Fixture {
    pub fn new(order: ReleaseOrder) -> Self {
        Self {
            arbiter: Rc::new(RefCell::new(ArbiterLog::new(order))),
            panel: Rc::new(RefCell::new(PanelState {
                powered: true,
                masked: false,
                flushes: 0,
            })),
            bus: Rc::new(RefCell::new(BusState::default())),
        }
    }

    pub fn gate(&self) -> Gate {
        BusGate::new(MockDomain(self.bus.clone()))
    }

    pub fn controller<'a>(
        &self,
        config: HandoffConfig,
        gate: &'a Gate,
        join: &'a Join,
        status: &'a Status,
    ) -> Controller<'a> {
        let arbiter = MockArbiter { log: self.arbiter.clone(), join };
        let peripheral = MockPeripheral(self.panel.clone());
        SessionController::new(config, arbiter, peripheral, gate, join, status)
    }

    pub fn fail(&self, call: Call) {
        self.arbiter.borrow_mut().fail = Some(call);
    }

    pub fn hang(&self, call: Call) {
        self.arbiter.borrow_mut().hang = Some(call);
    }

    pub fn slow(&self, call: Call) {
        self.arbiter.borrow_mut().slow = Some(call);
    }

    pub fn bus_on(&self) -> bool {
        self.bus.borrow().refs > 0
    }

    pub fn calls(&self) -> Vec<Call> {
        self.arbiter.borrow().calls.clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.arbiter.borrow().count(call)
    }

    /// Everything back with the primary VM.
    pub fn all_returned(&self) -> bool {
        !self.panel.borrow().masked && !self.bus_on()
    }
}

pub fn resources() -> ResourceDescriptor {
    ResourceDescriptor::from_parts(373, &[0xa9c000, 0xa8c000], &[0x1000, 0x1000]).unwrap()
}

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        step: Duration::from_millis(50),
        release: Duration::from_millis(100),
        unmask_settle: Duration::from_millis(0),
    }
}

pub fn config(profile: Profile) -> HandoffConfig {
    HandoffConfig::new(profile, resources()).with_timeouts(fast_timeouts())
}

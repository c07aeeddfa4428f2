//! Client side of the resource-manager primitives used for a hand-off.
//!
//! [`Arbiter`] is the raw transport: one call per primitive, returning the
//! manager's status code. [`ArbiterClient`] layers the hand-off rules on
//! top: bounded waits, typed lend handles, and lend ordering.

use core::future::Future;

use bitflags::bitflags;
use embassy_time::{with_timeout, Duration};

use crate::config::Profile;
use crate::descriptor::{MemWindow, ResourceDescriptor};
use crate::error::{HandoffError, RmError, Step};
use crate::join::ReleaseSignal;

/// Tag the manager stamps on memory notifications for this peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemTag {
    TouchPrimary,
    TouchSecondary,
}

/// Label identifying the lent interrupt to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqLabel {
    TouchPrimary,
    TouchSecondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VmId {
    Primary,
    Trusted,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessPerms: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

/// Access control entry attached to a memory lend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGrant {
    pub vm: VmId,
    pub perms: AccessPerms,
}

impl AccessGrant {
    /// Read/write access for the trusted VM; the only grant a hand-off uses.
    pub const fn trusted_rw() -> Self {
        Self {
            vm: VmId::Trusted,
            perms: AccessPerms::READ.union(AccessPerms::WRITE),
        }
    }
}

/// Identifies which release notice a lent resource will produce, and for
/// which session generation. The manager hands it back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReleaseTicket {
    pub signal: ReleaseSignal,
    pub generation: u32,
}

/// Everything the manager needs to lend the I/O windows.
#[derive(Debug, Clone, Copy)]
pub struct LendRequest<'a> {
    pub tag: MemTag,
    pub grant: AccessGrant,
    /// Windows sorted by base address.
    pub scatter: &'a [MemWindow],
    pub ticket: ReleaseTicket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResourceKind {
    Memory,
    Interrupt,
}

/// Proof that a resource is currently lent.
///
/// Deliberately neither `Clone` nor `Copy`: the only way to get rid of one
/// is to hand it to the matching reclaim, which gives it back on failure.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LendHandle {
    kind: ResourceKind,
    raw: u32,
    generation: u32,
}

impl LendHandle {
    pub(crate) fn new(kind: ResourceKind, raw: u32, generation: u32) -> Self {
        Self { kind, raw, generation }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Memory parcel handle, or 0 for interrupts (reclaimed by label).
    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Raw resource-manager transport.
///
/// Implementations forward each call to the privileged arbiter and report
/// its status code. Release notices for lent resources are delivered
/// out-of-band, by handing the [`ReleaseTicket`] back to the session's
/// [`NotificationJoin`](crate::NotificationJoin).
#[allow(async_fn_in_trait)]
pub trait Arbiter {
    /// Lend the I/O windows; returns the memory parcel handle.
    async fn mem_lend(&mut self, request: LendRequest<'_>) -> Result<u32, RmError>;

    /// Tell the recipient VM that a parcel was lent to it.
    async fn mem_notify(&mut self, parcel: u32, tag: MemTag) -> Result<(), RmError>;

    /// Lend the interrupt line.
    async fn irq_lend(
        &mut self,
        label: IrqLabel,
        irq: u32,
        ticket: ReleaseTicket,
    ) -> Result<(), RmError>;

    /// Tell the recipient VM the interrupt was lent to it.
    async fn irq_lend_notify(&mut self, label: IrqLabel) -> Result<(), RmError>;

    /// Ask the recipient VM to wind down and release both resources.
    async fn request_release(
        &mut self,
        parcel: u32,
        label: IrqLabel,
    ) -> Result<(), RmError>;

    async fn mem_reclaim(&mut self, parcel: u32) -> Result<(), RmError>;

    async fn irq_reclaim(&mut self, label: IrqLabel) -> Result<(), RmError>;
}

async fn bounded<T, F>(
    limit: Duration,
    step: Step,
    call: F,
    on_error: fn(Step) -> HandoffError,
) -> Result<T, HandoffError>
where
    F: Future<Output = Result<T, RmError>>,
{
    match with_timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(rc)) => {
            error!("{:?} failed rc:{}", step, rc.0);
            Err(on_error(step))
        }
        Err(_) => {
            error!("{:?} timed out", step);
            Err(HandoffError::Timeout(step))
        }
    }
}

/// Hand-off view of the arbiter.
pub struct ArbiterClient<A: Arbiter> {
    arbiter: A,
    profile: Profile,
    step_timeout: Duration,
}

impl<A: Arbiter> ArbiterClient<A> {
    pub fn new(arbiter: A, profile: Profile, step_timeout: Duration) -> Self {
        Self { arbiter, profile, step_timeout }
    }

    pub fn arbiter(&self) -> &A {
        &self.arbiter
    }

    pub async fn lend_memory(
        &mut self,
        resources: &ResourceDescriptor,
        generation: u32,
    ) -> Result<LendHandle, HandoffError> {
        let scatter = resources.scatter_list();
        let request = LendRequest {
            tag: self.profile.mem_tag(),
            grant: AccessGrant::trusted_rw(),
            scatter: &scatter,
            ticket: ReleaseTicket { signal: ReleaseSignal::Memory, generation },
        };
        let parcel = bounded(
            self.step_timeout,
            Step::MemoryLend,
            self.arbiter.mem_lend(request),
            HandoffError::LendFailure,
        )
        .await?;

        debug!("Lent {} I/O windows as parcel {}", scatter.len(), parcel);
        Ok(LendHandle::new(ResourceKind::Memory, parcel, generation))
    }

    pub async fn notify_memory_lent(
        &mut self,
        memory: &LendHandle,
    ) -> Result<(), HandoffError> {
        bounded(
            self.step_timeout,
            Step::MemoryNotify,
            self.arbiter.mem_notify(memory.raw, self.profile.mem_tag()),
            HandoffError::NotifyFailure,
        )
        .await
    }

    /// Lend the interrupt line.
    ///
    /// Takes the memory handle as proof the I/O windows were lent first:
    /// the interrupt must never reach the trusted VM while the primary VM
    /// can still touch the device registers.
    pub async fn lend_interrupt(
        &mut self,
        memory: &LendHandle,
        irq: u32,
        on_release: ReleaseTicket,
    ) -> Result<LendHandle, HandoffError> {
        if memory.kind != ResourceKind::Memory {
            error!("Interrupt lend attempted before memory lend");
            return Err(HandoffError::InvalidState);
        }
        bounded(
            self.step_timeout,
            Step::InterruptLend,
            self.arbiter.irq_lend(self.profile.irq_label(), irq, on_release),
            HandoffError::LendFailure,
        )
        .await?;

        Ok(self.interrupt_handle(on_release.generation))
    }

    /// Handle for an interrupt whose lend outcome is unknown. Interrupts are
    /// reclaimed by label, so one can be built without the manager's reply.
    pub(crate) fn interrupt_handle(&self, generation: u32) -> LendHandle {
        LendHandle::new(ResourceKind::Interrupt, 0, generation)
    }

    pub async fn notify_interrupt_lent(
        &mut self,
        _interrupt: &LendHandle,
    ) -> Result<(), HandoffError> {
        bounded(
            self.step_timeout,
            Step::InterruptNotify,
            self.arbiter.irq_lend_notify(self.profile.irq_label()),
            HandoffError::NotifyFailure,
        )
        .await
    }

    pub async fn request_release(
        &mut self,
        memory: &LendHandle,
    ) -> Result<(), HandoffError> {
        bounded(
            self.step_timeout,
            Step::ReleaseRequest,
            self.arbiter.request_release(memory.raw, self.profile.irq_label()),
            HandoffError::NotifyFailure,
        )
        .await
    }

    /// On failure the handle comes back with the error, so the caller can
    /// retry or account for it.
    pub async fn reclaim_memory(
        &mut self,
        memory: LendHandle,
    ) -> Result<(), (HandoffError, LendHandle)> {
        match bounded(
            self.step_timeout,
            Step::MemoryReclaim,
            self.arbiter.mem_reclaim(memory.raw),
            HandoffError::ReclaimFailure,
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err((e, memory)),
        }
    }

    pub async fn reclaim_interrupt(
        &mut self,
        interrupt: LendHandle,
    ) -> Result<(), (HandoffError, LendHandle)> {
        match bounded(
            self.step_timeout,
            Step::InterruptReclaim,
            self.arbiter.irq_reclaim(self.profile.irq_label()),
            HandoffError::ReclaimFailure,
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err((e, interrupt)),
        }
    }
}

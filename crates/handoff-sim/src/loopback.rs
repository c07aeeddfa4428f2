//! In-process stand-in for the resource manager and the trusted VM.
//!
//! [`LoopbackArbiter`] accepts every primitive (unless told to fail one) and
//! forwards lends and release requests over a channel to [`run_peer`], which
//! plays the trusted side: it checks what it was lent, and answers release
//! requests by posting the two release notices.

use std::convert::Infallible;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Timer};
use heapless::Vec;
use periph_handoff::{
    Arbiter, EventCode, IrqLabel, LendRequest, MemTag, MemWindow, NotificationJoin,
    ReleaseTicket, ResourceDescriptor, RmError, MAX_WINDOWS,
};
use tracing::{debug, info, warn};

use crate::cli::{FailPoint, ReleaseOrder};

pub type Raw = CriticalSectionRawMutex;

const QUEUE_DEPTH: usize = 4;
const EIO: i32 = -5;
const ENOMEM: i32 = -12;

pub type PeerChannel = Channel<Raw, PeerRequest, QUEUE_DEPTH>;

#[derive(Debug)]
pub enum PeerRequest {
    Memory {
        tag: MemTag,
        parcel: u32,
        scatter: Vec<MemWindow, MAX_WINDOWS>,
        ticket: ReleaseTicket,
    },
    Interrupt {
        label: IrqLabel,
        irq: u32,
        ticket: ReleaseTicket,
    },
    Release {
        parcel: u32,
    },
}

pub struct LoopbackArbiter<'a> {
    peer: Sender<'a, Raw, PeerRequest, QUEUE_DEPTH>,
    fail_at: Option<FailPoint>,
    next_parcel: u32,
}

impl<'a> LoopbackArbiter<'a> {
    pub fn new(peer: Sender<'a, Raw, PeerRequest, QUEUE_DEPTH>, fail_at: Option<FailPoint>) -> Self {
        Self { peer, fail_at, next_parcel: 1 }
    }

    fn check(&self, point: FailPoint) -> Result<(), RmError> {
        if self.fail_at == Some(point) {
            warn!("Injecting failure at {:?}", point);
            return Err(RmError(EIO));
        }
        Ok(())
    }
}

impl Arbiter for LoopbackArbiter<'_> {
    async fn mem_lend(&mut self, request: LendRequest<'_>) -> Result<u32, RmError> {
        self.check(FailPoint::MemLend)?;
        let scatter = Vec::from_slice(request.scatter).map_err(|_| RmError(ENOMEM))?;
        let parcel = self.next_parcel;
        self.next_parcel += 1;

        debug!(
            "mem_lend tag={:?} vm={:?} perms={:?} windows={}",
            request.tag,
            request.grant.vm,
            request.grant.perms,
            scatter.len()
        );
        self.peer
            .send(PeerRequest::Memory {
                tag: request.tag,
                parcel,
                scatter,
                ticket: request.ticket,
            })
            .await;
        Ok(parcel)
    }

    async fn mem_notify(&mut self, parcel: u32, tag: MemTag) -> Result<(), RmError> {
        self.check(FailPoint::MemNotify)?;
        debug!("mem_notify parcel={} tag={:?}", parcel, tag);
        Ok(())
    }

    async fn irq_lend(
        &mut self,
        label: IrqLabel,
        irq: u32,
        ticket: ReleaseTicket,
    ) -> Result<(), RmError> {
        self.check(FailPoint::IrqLend)?;
        self.peer.send(PeerRequest::Interrupt { label, irq, ticket }).await;
        Ok(())
    }

    async fn irq_lend_notify(&mut self, label: IrqLabel) -> Result<(), RmError> {
        self.check(FailPoint::IrqNotify)?;
        debug!("irq_lend_notify label={:?}", label);
        Ok(())
    }

    async fn request_release(&mut self, parcel: u32, _label: IrqLabel) -> Result<(), RmError> {
        self.check(FailPoint::Release)?;
        self.peer.send(PeerRequest::Release { parcel }).await;
        Ok(())
    }

    async fn mem_reclaim(&mut self, parcel: u32) -> Result<(), RmError> {
        self.check(FailPoint::MemReclaim)?;
        debug!("mem_reclaim parcel={}", parcel);
        Ok(())
    }

    async fn irq_reclaim(&mut self, label: IrqLabel) -> Result<(), RmError> {
        self.check(FailPoint::IrqReclaim)?;
        debug!("irq_reclaim label={:?}", label);
        Ok(())
    }
}

struct LentMemory {
    tag: MemTag,
    parcel: u32,
    ticket: ReleaseTicket,
}

/// Behaviour of the simulated trusted VM.
pub struct Peer<'a> {
    pub requests: Receiver<'a, Raw, PeerRequest, QUEUE_DEPTH>,
    pub join: &'a NotificationJoin<Raw>,
    pub resources: Option<ResourceDescriptor>,
    pub order: ReleaseOrder,
    pub release_delay: Duration,
}

/// Serve lend and release requests forever. `on_fault` is called when the
/// peer refuses what it was lent.
pub async fn run_peer(peer: Peer<'_>, on_fault: impl Fn(EventCode)) -> Infallible {
    let mut memory: Option<LentMemory> = None;
    let mut interrupt: Option<ReleaseTicket> = None;

    loop {
        match peer.requests.receive().await {
            PeerRequest::Memory { tag, parcel, scatter, ticket } => {
                let accepted = peer
                    .resources
                    .as_ref()
                    .is_some_and(|resources| resources.matches(&scatter));
                if !accepted {
                    warn!("Peer refusing parcel {}: unexpected windows", parcel);
                    on_fault(EventCode::AcceptFailure);
                    continue;
                }
                info!("Peer accepted parcel {} ({} windows)", parcel, scatter.len());
                memory = Some(LentMemory { tag, parcel, ticket });
            }
            PeerRequest::Interrupt { label, irq, ticket } => {
                info!("Peer accepted irq {} ({:?})", irq, label);
                interrupt = Some(ticket);
            }
            PeerRequest::Release { parcel } => {
                Timer::after(peer.release_delay).await;
                let (Some(mem), Some(irq)) = (memory.take(), interrupt.take()) else {
                    warn!("Release requested for parcel {} with nothing lent", parcel);
                    continue;
                };
                let release_memory = || {
                    let outcome =
                        peer.join.record_memory_release(mem.tag, mem.parcel, mem.ticket.generation);
                    debug!("Memory release notice: {:?}", outcome);
                };
                let release_interrupt = || {
                    let outcome = peer.join.record_ticket(irq);
                    debug!("Interrupt release notice: {:?}", outcome);
                };
                match peer.order {
                    ReleaseOrder::MemFirst => {
                        release_memory();
                        release_interrupt();
                    }
                    ReleaseOrder::IrqFirst => {
                        release_interrupt();
                        release_memory();
                    }
                    ReleaseOrder::Never => {
                        info!("Peer holding on to parcel {}", parcel);
                    }
                }
            }
        }
    }
}

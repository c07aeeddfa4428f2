//! Simulated touch controller and bus power domain.

use bus_gate::{Clock, PowerDomain};
use periph_handoff::Peripheral;
use tracing::{debug, trace, warn};

/// Single-window primary board used when no config file is given.
pub const DEFAULT_BOARD: &str = r#"{
    "mode": "vm_mode",
    "touch_type": "primary",
    "irq": 373,
    "io_bases": [11059200],
    "io_sizes": [4096]
}"#;

pub struct SimPanel {
    masked: bool,
    queued_events: u32,
}

impl SimPanel {
    pub fn new() -> Self {
        // Pretend a few touches were queued before the first hand-off.
        Self { masked: false, queued_events: 3 }
    }
}

impl Peripheral for SimPanel {
    fn is_powered(&self) -> bool {
        true
    }

    fn mask_interrupt(&mut self) {
        debug!("panel: irq masked");
        self.masked = true;
    }

    fn unmask_interrupt(&mut self) {
        if !self.masked {
            warn!("panel: unmask without a matching mask");
        }
        debug!("panel: irq unmasked");
        self.masked = false;
    }

    fn release_all_contacts(&mut self) {
        if self.queued_events > 0 {
            debug!("panel: dropped {} queued events", self.queued_events);
            self.queued_events = 0;
        }
    }
}

#[derive(Default)]
pub struct SimDomain {
    runtime_refs: u32,
}

impl PowerDomain for SimDomain {
    type Error = ();

    async fn runtime_get(&mut self) -> Result<(), ()> {
        self.runtime_refs += 1;
        trace!("bus: runtime refs {}", self.runtime_refs);
        Ok(())
    }

    async fn runtime_put(&mut self) {
        self.runtime_refs = self.runtime_refs.saturating_sub(1);
        trace!("bus: runtime refs {}", self.runtime_refs);
    }

    async fn clock_enable(&mut self, clock: Clock) -> Result<(), ()> {
        trace!("bus: {:?} clock on", clock);
        Ok(())
    }

    fn clock_disable(&mut self, clock: Clock) {
        trace!("bus: {:?} clock off", clock);
    }
}

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::watch::{Receiver, Watch};
use serde::Serialize;

use crate::error::EventCode;

/// Maximum number of concurrent status receivers.
pub const STATUS_RECEIVERS: usize = 2;

/// Externally visible state of a hand-off instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandoffStatus {
    /// The trusted VM owns the peripheral.
    pub enabled: bool,
    /// Value of the most recent [`EventCode`].
    pub last_event: i32,
    /// Code recorded by the most recent abort, if any.
    pub last_abort: Option<i32>,
    pub generation: u32,
}

impl HandoffStatus {
    pub const IDLE: Self = Self {
        enabled: false,
        last_event: 0,
        last_abort: None,
        generation: 0,
    };

    pub fn last_event(&self) -> EventCode {
        EventCode::from_value(self.last_event)
    }
}

/// Status snapshot plus change notifications.
///
/// `snapshot` always works; receivers see every published change as long
/// as they keep up, and the latest value otherwise.
pub struct StatusChannel<M: RawMutex> {
    current: BlockingMutex<M, Cell<HandoffStatus>>,
    watch: Watch<M, HandoffStatus, STATUS_RECEIVERS>,
}

impl<M: RawMutex> Default for StatusChannel<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> StatusChannel<M> {
    pub const fn new() -> Self {
        Self {
            current: BlockingMutex::new(Cell::new(HandoffStatus::IDLE)),
            watch: Watch::new(),
        }
    }

    pub fn snapshot(&self) -> HandoffStatus {
        self.current.lock(|c| c.get())
    }

    /// `None` once all receiver slots are taken.
    pub fn receiver(&self) -> Option<Receiver<'_, M, HandoffStatus, STATUS_RECEIVERS>> {
        self.watch.receiver()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut HandoffStatus)) -> HandoffStatus {
        let status = self.current.lock(|c| {
            let mut status = c.get();
            f(&mut status);
            c.set(status);
            status
        });
        self.watch.sender().send(status);
        status
    }

    /// Publish an event without changing ownership.
    pub(crate) fn notify_event(&self, code: EventCode) {
        self.update(|s| s.last_event = code.value());
    }
}

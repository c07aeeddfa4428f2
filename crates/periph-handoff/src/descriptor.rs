use core::fmt;

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Upper bound on the I/O windows a single peripheral can hand off.
pub const MAX_WINDOWS: usize = 8;

/// One memory-mapped I/O window, as an intermediate physical address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemWindow {
    pub base: u64,
    pub size: u64,
}

impl MemWindow {
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// One past the last address, saturating at the top of the space.
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DescriptorError {
    NoWindows,
    MismatchedWindows { bases: usize, sizes: usize },
    TooManyWindows(usize),
    EmptyWindow(u64),
    Overlap(u64),
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::NoWindows => write!(f, "no I/O windows given"),
            DescriptorError::MismatchedWindows { bases, sizes } => write!(
                f,
                "{} I/O bases but {} I/O sizes",
                bases, sizes
            ),
            DescriptorError::TooManyWindows(n) => {
                write!(f, "{} I/O windows exceeds limit of {}", n, MAX_WINDOWS)
            }
            DescriptorError::EmptyWindow(base) => {
                write!(f, "I/O window at {:#x} has zero size", base)
            }
            DescriptorError::Overlap(base) => {
                write!(f, "I/O window at {:#x} overlaps its neighbour", base)
            }
        }
    }
}

/// The shared resources of one peripheral: its interrupt line and the I/O
/// windows behind it. Validated at construction, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResourceDescriptor {
    irq: u32,
    windows: Vec<MemWindow, MAX_WINDOWS>,
}

impl ResourceDescriptor {
    pub fn new(
        irq: u32,
        windows: &[MemWindow],
    ) -> Result<Self, DescriptorError> {
        if windows.is_empty() {
            return Err(DescriptorError::NoWindows);
        }
        let windows = Vec::from_slice(windows)
            .map_err(|_| DescriptorError::TooManyWindows(windows.len()))?;
        if let Some(w) = windows.iter().find(|w| w.size == 0) {
            return Err(DescriptorError::EmptyWindow(w.base));
        }

        let descriptor = Self { irq, windows };
        let sorted = descriptor.scatter_list();
        for pair in sorted.windows(2) {
            if pair[0].end() > pair[1].base {
                return Err(DescriptorError::Overlap(pair[1].base));
            }
        }
        Ok(descriptor)
    }

    /// Build from the parallel base/size lists a board description carries.
    pub fn from_parts(
        irq: u32,
        bases: &[u64],
        sizes: &[u64],
    ) -> Result<Self, DescriptorError> {
        if bases.len() != sizes.len() {
            return Err(DescriptorError::MismatchedWindows {
                bases: bases.len(),
                sizes: sizes.len(),
            });
        }

        let mut windows: Vec<MemWindow, MAX_WINDOWS> = Vec::new();
        for (&base, &size) in bases.iter().zip(sizes) {
            windows
                .push(MemWindow::new(base, size))
                .map_err(|_| DescriptorError::TooManyWindows(bases.len()))?;
        }
        Self::new(irq, &windows)
    }

    pub fn irq(&self) -> u32 {
        self.irq
    }

    /// Windows in board-description order.
    pub fn windows(&self) -> &[MemWindow] {
        &self.windows
    }

    /// Windows sorted by base address, the form the arbiter is handed.
    pub fn scatter_list(&self) -> Vec<MemWindow, MAX_WINDOWS> {
        let mut sorted = self.windows.clone();
        sorted.sort_unstable_by_key(|w| w.base);
        sorted
    }

    /// Whether `received` names exactly these windows, in any order.
    pub fn matches(&self, received: &[MemWindow]) -> bool {
        if received.len() != self.windows.len() {
            return false;
        }
        let Ok(mut other) = Vec::<MemWindow, MAX_WINDOWS>::from_slice(received)
        else {
            return false;
        };
        other.sort_unstable_by_key(|w| w.base);
        other == self.scatter_list()
    }
}

use core::fmt;

use embassy_time::Duration;
use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

use crate::arbiter::{IrqLabel, MemTag};
use crate::descriptor::{DescriptorError, ResourceDescriptor, MAX_WINDOWS};

pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_RELEASE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_UNMASK_SETTLE_MS: u64 = 200;

const MODE_VM: &str = "vm_mode";

/// Board description of the hand-off, one field per devicetree property.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardConfig {
    /// `"vm_mode"` enables the hand-off; anything else disables it.
    pub mode: Option<String<16>>,
    /// `"primary"` or `"secondary"`. Defaults to primary.
    pub touch_type: Option<String<16>>,
    pub irq: Option<u32>,
    #[serde(default)]
    pub io_bases: Vec<u64, MAX_WINDOWS>,
    #[serde(default)]
    pub io_sizes: Vec<u64, MAX_WINDOWS>,
    pub step_timeout_ms: Option<u64>,
    pub release_timeout_ms: Option<u64>,
    pub unmask_settle_ms: Option<u64>,
}

/// Which hand-off instance this is. Selects the arbiter tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Profile {
    Primary,
    Secondary,
}

impl Profile {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Profile::Primary),
            "secondary" => Some(Profile::Secondary),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Profile::Primary => "primary",
            Profile::Secondary => "secondary",
        }
    }

    pub const fn mem_tag(self) -> MemTag {
        match self {
            Profile::Primary => MemTag::TouchPrimary,
            Profile::Secondary => MemTag::TouchSecondary,
        }
    }

    pub const fn irq_label(self) -> IrqLabel {
        match self {
            Profile::Primary => IrqLabel::TouchPrimary,
            Profile::Secondary => IrqLabel::TouchSecondary,
        }
    }
}

/// Whether the board supports the hand-off, and with which resources.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandoffMode {
    Vm(ResourceDescriptor),
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeouts {
    /// Bound on every single arbiter call and bus transition.
    pub step: Duration,
    /// How long `disable` waits for both release notices.
    pub release: Duration,
    /// Quiet time between reclaiming the interrupt and unmasking it.
    pub unmask_settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(DEFAULT_STEP_TIMEOUT_MS),
            release: Duration::from_millis(DEFAULT_RELEASE_TIMEOUT_MS),
            unmask_settle: Duration::from_millis(DEFAULT_UNMASK_SETTLE_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    MissingIrq,
    UnknownProfile,
    Descriptor(DescriptorError),
}

impl From<DescriptorError> for ConfigError {
    fn from(e: DescriptorError) -> Self {
        ConfigError::Descriptor(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingIrq => write!(f, "no hand-off irq given"),
            ConfigError::UnknownProfile => {
                write!(f, "touch type must be \"primary\" or \"secondary\"")
            }
            ConfigError::Descriptor(e) => write!(f, "{}", e),
        }
    }
}

/// Validated, immutable configuration of one hand-off instance.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandoffConfig {
    pub profile: Profile,
    pub mode: HandoffMode,
    pub timeouts: Timeouts,
}

impl HandoffConfig {
    pub fn new(profile: Profile, resources: ResourceDescriptor) -> Self {
        Self {
            profile,
            mode: HandoffMode::Vm(resources),
            timeouts: Timeouts::default(),
        }
    }

    pub fn unsupported(profile: Profile) -> Self {
        Self {
            profile,
            mode: HandoffMode::NotSupported,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn from_board(board: &BoardConfig) -> Result<Self, ConfigError> {
        let profile = match board.touch_type.as_deref() {
            None => {
                warn!("No hand-off type selected, using primary");
                Profile::Primary
            }
            Some(s) => Profile::parse(s).ok_or(ConfigError::UnknownProfile)?,
        };

        let mut timeouts = Timeouts::default();
        if let Some(ms) = board.step_timeout_ms {
            timeouts.step = Duration::from_millis(ms);
        }
        if let Some(ms) = board.release_timeout_ms {
            timeouts.release = Duration::from_millis(ms);
        }
        if let Some(ms) = board.unmask_settle_ms {
            timeouts.unmask_settle = Duration::from_millis(ms);
        }

        if board.mode.as_deref() != Some(MODE_VM) {
            info!("Hand-off mode not selected for this board");
            return Ok(Self::unsupported(profile).with_timeouts(timeouts));
        }

        let irq = board.irq.ok_or(ConfigError::MissingIrq)?;
        let resources =
            ResourceDescriptor::from_parts(irq, &board.io_bases, &board.io_sizes)?;
        Ok(Self::new(profile, resources).with_timeouts(timeouts))
    }

    pub fn resources(&self) -> Option<&ResourceDescriptor> {
        match &self.mode {
            HandoffMode::Vm(resources) => Some(resources),
            HandoffMode::NotSupported => None,
        }
    }
}

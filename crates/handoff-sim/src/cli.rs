use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(author, version, about = "Run peripheral hand-off cycles against a loopback arbiter")]
pub struct Args {
    /// Board description (JSON). Uses a single-window primary board if omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of enable/disable cycles to run
    #[arg(long, default_value_t = 1)]
    pub cycles: u32,

    /// Order in which the trusted side releases the resources
    #[arg(long, value_enum, default_value_t = ReleaseOrder::MemFirst)]
    pub release_order: ReleaseOrder,

    /// Arbiter call that fails with an error code
    #[arg(long, value_enum)]
    pub fail_at: Option<FailPoint>,

    /// Delay before the trusted side answers a release request
    #[arg(long, default_value_t = 10)]
    pub release_delay_ms: u64,

    /// Report this fault code after every successful enable
    #[arg(long, allow_negative_numbers = true)]
    pub fault_after_enable: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReleaseOrder {
    MemFirst,
    IrqFirst,
    /// Never release; every disable times out
    Never,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FailPoint {
    MemLend,
    MemNotify,
    IrqLend,
    IrqNotify,
    Release,
    MemReclaim,
    IrqReclaim,
}

mod board;
mod cli;
mod loopback;

use anyhow::{anyhow, bail, Context, Result};
use bus_gate::BusGate;
use clap::Parser;
use embassy_futures::select::{select, Either};
use embassy_time::Duration;
use periph_handoff::{
    BoardConfig, EventCode, HandoffConfig, HandoffError, NotificationJoin, OwnershipState,
    SessionController, StatusChannel,
};
use serde_json::json;
use static_cell::StaticCell;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use board::{SimDomain, SimPanel, DEFAULT_BOARD};
use cli::Args;
use loopback::{LoopbackArbiter, Peer, PeerChannel, Raw};

type Controller<'a> = SessionController<'a, Raw, LoopbackArbiter<'a>, SimDomain, SimPanel>;

struct Shared {
    gate: BusGate<Raw, SimDomain>,
    join: NotificationJoin<Raw>,
    status: StatusChannel<Raw>,
    requests: PeerChannel,
}

static SHARED: StaticCell<Shared> = StaticCell::new();

fn load_board(args: &Args) -> Result<BoardConfig> {
    let json = match &args.config {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => DEFAULT_BOARD.to_string(),
    };
    serde_json::from_str(&json).context("parsing board config")
}

fn print_status(
    cycle: u32,
    op: &str,
    result: &Result<(), HandoffError>,
    ctl: &Controller<'_>,
) -> Result<()> {
    let result = match result {
        Ok(()) => "ok".to_string(),
        Err(e) => e.to_string(),
    };
    let line = json!({
        "cycle": cycle,
        "op": op,
        "result": result,
        "status": ctl.status(),
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

async fn drive(ctl: &Controller<'_>, args: &Args) -> Result<()> {
    for cycle in 1..=args.cycles {
        let enabled = ctl.write_control(1).await;
        print_status(cycle, "enable", &enabled, ctl)?;
        if enabled.is_err() {
            continue;
        }

        if let Some(code) = args.fault_after_enable {
            ctl.report_fault(EventCode::from_value(code));
        }

        let disabled = ctl.write_control(0).await;
        print_status(cycle, "disable", &disabled, ctl)?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let board = load_board(&args)?;
    let config = HandoffConfig::from_board(&board)
        .map_err(|e| anyhow!("invalid board config: {}", e))?;
    let resources = config.resources().cloned();
    info!("Simulating {} hand-off", config.profile.as_str());

    let shared = SHARED.init(Shared {
        gate: BusGate::new(SimDomain::default()),
        join: NotificationJoin::new(),
        status: StatusChannel::new(),
        requests: PeerChannel::new(),
    });

    let arbiter = LoopbackArbiter::new(shared.requests.sender(), args.fail_at);
    let ctl: Controller<'_> = SessionController::new(
        config,
        arbiter,
        SimPanel::new(),
        &shared.gate,
        &shared.join,
        &shared.status,
    );

    let peer = Peer {
        requests: shared.requests.receiver(),
        join: &shared.join,
        resources,
        order: args.release_order,
        release_delay: Duration::from_millis(args.release_delay_ms),
    };

    let driven = select(
        drive(&ctl, &args),
        loopback::run_peer(peer, |code| ctl.report_fault(code)),
    )
    .await;
    match driven {
        Either::First(result) => result?,
        Either::Second(never) => match never {},
    }

    let final_state = ctl.state();
    if let Some(report) = ctl.shutdown().await {
        warn!("Shutdown unwound {:?}", report.reversed);
    }
    if final_state != Some(OwnershipState::Idle) {
        bail!("hand-off ended in {:?}", final_state);
    }

    info!("Final state idle after {} cycles", args.cycles);
    Ok(())
}

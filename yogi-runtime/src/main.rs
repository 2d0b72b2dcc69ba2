// yogi-branch: runs one branch configured from the command line and logs
// what happens on the network until SIGINT/SIGTERM.

use std::sync::{Arc, Weak};

use anyhow::Context as _;
use tracing::{info, warn};

use yogi_runtime::{
    forward_os_signals, logging, Branch, BranchEvents, CommandLineOptions, Configuration,
    Context, Duration, ErrorCode, EventOutcome, SignalSet, Signals,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const EVENT_BUFFER_SIZE: usize = 4096;

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("yogi-branch {}", VERSION);
            return Ok(());
        }
    }

    let mut config = Configuration::default();
    let options = CommandLineOptions::ALL & !CommandLineOptions::FILES_REQUIRED;
    match config.update_from_command_line(std::env::args_os(), options) {
        Ok(()) => {}
        Err(e) if e.is(ErrorCode::HelpRequested) => {
            print!("{}", e.details().unwrap_or_default());
            return Ok(());
        }
        Err(e) => return Err(e).context("invalid command line"),
    }
    logging::init(&logging::filter_from_config(&config.section("")?));

    let ctx = Context::new()?;
    let branch = Arc::new(Branch::from_config(&ctx, &config, "/branch").context("creating branch")?);
    let branch_info = branch.info();
    info!(
        "running branch {} ({}) on network {}",
        branch_info.identity.name, branch_info.identity.uuid, branch_info.identity.network_name
    );
    log_events(Arc::downgrade(&branch));

    let _forwarder = forward_os_signals(&ctx)?;
    let signals = SignalSet::new(&ctx, Signals::INT | Signals::TERM);
    let stopper = ctx.clone();
    signals.await_signal(move |outcome| {
        if let Ok(sig) = outcome.result() {
            info!("received {:?}, shutting down", sig);
            stopper.stop();
        }
    });

    ctx.run(Duration::INFINITE);
    for (uuid, remote) in branch.connected_branches()? {
        info!("disconnecting from {} ({})", remote.name, uuid);
    }
    Ok(())
}

/// Log every branch event, re-arming the wait after each one.
fn log_events(branch: Weak<Branch>) {
    let Some(b) = branch.upgrade() else {
        return;
    };
    b.await_event(BranchEvents::ALL, EVENT_BUFFER_SIZE, move |outcome| {
        match outcome {
            EventOutcome::Event { event, json, result } => match result {
                Ok(()) => info!("{:?}: {}", event.kind(), json),
                Err(e) => warn!("{:?} for {}: {}", event.kind(), event.uuid(), e),
            },
            EventOutcome::BufferTooSmall { kind, .. } => {
                warn!("{:?} event did not fit into {} bytes", kind, EVENT_BUFFER_SIZE)
            }
            EventOutcome::Canceled => return,
        }
        log_events(branch);
    });
}

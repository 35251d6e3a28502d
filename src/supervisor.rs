//! Wires the subsystems together and runs the daemon: blacklist enforcement
//! at startup, the release scheduler, signal handling, and the main reader
//! loop from the log multiplexer through the parser into the engine.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

use authward_core::blacklist;
use authward_engine::{pardon_loop, BlockRoster, OffenderEngine};
use authward_firewall::{
    CommandFirewall, CommandSpec, Firewall, FwError, HostsFirewall, NullFirewall,
};
use authward_parser::AttackParser;
use authward_sources::LogMux;

use crate::options::Settings;
use crate::pidfile::PidFile;

/// Pick a firewall back-end from the environment.
///
/// `AUTHWARD_HOSTS_FILE` selects the hosts-file rewriter. Any of the
/// `AUTHWARD_CMD_*` variables (INIT, BLOCK, BLOCK_LIST, RELEASE, FLUSH,
/// FIN) selects the generic command back-end. With neither, the daemon
/// runs disarmed on the null back-end and says so.
fn build_firewall() -> Arc<dyn Firewall> {
    if let Some(path) = std::env::var_os("AUTHWARD_HOSTS_FILE") {
        return Arc::new(HostsFirewall::new(std::path::PathBuf::from(path)));
    }

    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    let spec = CommandSpec {
        init: var("AUTHWARD_CMD_INIT"),
        finalize: var("AUTHWARD_CMD_FIN"),
        block: var("AUTHWARD_CMD_BLOCK"),
        block_batch: var("AUTHWARD_CMD_BLOCK_LIST"),
        release: var("AUTHWARD_CMD_RELEASE"),
        flush: var("AUTHWARD_CMD_FLUSH"),
    };
    if spec.block.is_some() || spec.release.is_some() || spec.flush.is_some() {
        return Arc::new(CommandFirewall::new(spec));
    }

    warn!("no firewall back-end configured, running disarmed (null back-end)");
    Arc::new(NullFirewall)
}

/// Load the blacklist, creating the file on first use. Missing-but-
/// uncreatable is a startup failure; anything loaded gets blocked in bulk.
fn startup_blacklist(engine: &OffenderEngine, blacklist_file: Option<&Path>) -> Result<()> {
    let Some(path) = blacklist_file else {
        return Ok(());
    };

    let records = match blacklist::load(path)
        .with_context(|| format!("cannot read blacklist '{}'", path.display()))?
    {
        Some(records) => records,
        None => {
            info!(file = %path.display(), "blacklist file doesn't exist, creating it");
            blacklist::create(path)
                .with_context(|| format!("unable to create blacklist file '{}'", path.display()))?;
            Vec::new()
        }
    };

    engine.enforce_blacklist(&records);
    Ok(())
}

/// Run the daemon until its sources are exhausted or a termination signal
/// arrives. Returns Ok(()) on a graceful exit.
pub async fn run(settings: Settings) -> Result<()> {
    let fw = build_firewall();
    match fw.init() {
        Ok(()) | Err(FwError::Unsupported) => {}
        Err(err) => bail!("could not initialize the firewall: {err}"),
    }

    // From here on the firewall may hold state; tear it down on any exit.
    let result = run_armed(settings, fw.clone()).await;

    if let Err(err) = fw.flush_all() {
        if !matches!(err, FwError::Unsupported) {
            error!(%err, "could not flush firewall rules");
        }
    }
    if let Err(err) = fw.finalize() {
        if !matches!(err, FwError::Unsupported) {
            error!(%err, "could not finalize the firewall");
        }
    }
    result
}

async fn run_armed(settings: Settings, fw: Arc<dyn Firewall>) -> Result<()> {
    let Settings {
        params,
        whitelist,
        procauth,
        sources,
        pidfile,
    } = settings;

    let _pidfile = match &pidfile {
        Some(path) => Some(PidFile::create(path)?),
        None => None,
    };

    let roster = Arc::new(BlockRoster::new());
    let mut engine = OffenderEngine::new(params.clone(), whitelist, roster.clone(), fw.clone());

    // Reblock everyone the blacklist remembers before reading any logs.
    startup_blacklist(&engine, params.blacklist_file.as_deref())?;

    let mut mux = LogMux::new();
    for source in &sources {
        mux.add_source(source)
            .with_context(|| format!("unable to follow log source '{source}'"))?;
    }

    let mut parser = AttackParser::new(procauth);

    tokio::spawn(pardon_loop(roster.clone(), fw.clone(), params.pardon_secs));

    // Suspension is just a flag: while set, lines are read and discarded.
    let suspended = Arc::new(AtomicBool::new(false));
    tokio::spawn(watch_suspension(suspended.clone()));

    let mut sigterm = signal(SignalKind::terminate()).context("cannot install signal handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("cannot install signal handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("cannot install signal handler")?;

    info!(
        abuse_threshold = params.abuse_threshold,
        pardon_secs = params.pardon_secs,
        stale_secs = params.stale_secs,
        "started successfully, now watching for attacks"
    );

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("got TERM, flushing blocked addresses and exiting");
                break;
            }
            _ = sigint.recv() => {
                info!("got INT, flushing blocked addresses and exiting");
                break;
            }
            _ = sighup.recv() => {
                info!("got HUP, flushing blocked addresses and exiting");
                break;
            }
            line = mux.next_line(false) => {
                let Some((line, source)) = line else {
                    info!("all log sources exhausted, exiting");
                    break;
                };
                if suspended.load(Ordering::Relaxed) {
                    debug!("suspended, discarding line");
                    continue;
                }
                if let Some(attack) = parser.parse_line(source, &line).await {
                    engine.report(attack);
                }
            }
        }
    }

    mux.close();
    Ok(())
}

/// Flip the suspension flag on TSTP/CONT. Installing handlers keeps the
/// default stop action from freezing the daemon mid-mutation.
async fn watch_suspension(suspended: Arc<AtomicBool>) {
    let Ok(mut sigtstp) = signal(SignalKind::from_raw(libc::SIGTSTP)) else {
        warn!("cannot watch TSTP, suspension disabled");
        return;
    };
    let Ok(mut sigcont) = signal(SignalKind::from_raw(libc::SIGCONT)) else {
        warn!("cannot watch CONT, suspension disabled");
        return;
    };

    loop {
        tokio::select! {
            _ = sigtstp.recv() => {
                suspended.store(true, Ordering::Relaxed);
                info!("got STOP signal, suspending activity");
            }
            _ = sigcont.recv() => {
                suspended.store(false, Ordering::Relaxed);
                info!("got CONTINUE signal, resuming activity");
            }
        }
    }
}

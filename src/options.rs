use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use tracing::warn;

use authward_core::config::DEFAULT_BLACKLIST_THRESHOLD;
use authward_core::Whitelist;
use authward_engine::EngineParams;
use authward_parser::ProcAuth;

/// Exit code for startup failures (bad options, firewall init, files).
pub const EXIT_STARTUP: i32 = 1;
/// Exit code for a failed runtime/task spawn.
pub const EXIT_SPAWN: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "authward",
    disable_version_flag = true,
    about = "Watches authentication logs and blocks abusive addresses via a packet filter"
)]
pub struct Cli {
    /// Blacklist as THRESHOLD:PATH (or just PATH for the default threshold
    /// of 120 danger); blacklisted addresses are blocked permanently and
    /// reblocked at every start
    #[arg(short = 'b', value_name = "THRESHOLD:PATH")]
    pub blacklist: Option<String>,

    /// Danger an address must accumulate before it is blocked
    #[arg(short = 'a', value_name = "DANGER")]
    pub abuse_threshold: Option<u32>,

    /// Base seconds after which a blocked address is released
    #[arg(short = 'p', value_name = "SECONDS")]
    pub pardon: Option<u64>,

    /// Seconds after which a never-blocked suspect is forgotten
    #[arg(short = 's', value_name = "SECONDS")]
    pub stale: Option<u64>,

    /// Whitelist an address, CIDR block, or hostname; with a leading '/'
    /// or '.', a file of entries (one per line, '#' comments)
    #[arg(short = 'w', value_name = "ENTRY", action = ArgAction::Append)]
    pub whitelist: Vec<String>,

    /// Authenticate a service's log entries against its pidfile, as
    /// SERVICE:PIDFILE
    #[arg(short = 'f', value_name = "SERVICE:PIDFILE", action = ArgAction::Append)]
    pub pid_auth: Vec<String>,

    /// Log file to follow; '-' denotes standard input. Without -l, reads
    /// standard input
    #[arg(short = 'l', value_name = "PATH", action = ArgAction::Append)]
    pub sources: Vec<String>,

    /// Write the daemon's pid to this file; removed at exit
    #[arg(short = 'i', value_name = "PIDFILE")]
    pub pidfile: Option<PathBuf>,

    /// Print version information to stderr and exit
    #[arg(short = 'v', long = "version")]
    pub version: bool,
}

/// Parse the command line, honoring the documented exit codes: help and
/// version leave with 0, anything malformed with 1.
pub fn parse_or_exit() -> Cli {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            std::process::exit(0);
        }
        Err(err) => {
            let _ = err.print();
            std::process::exit(EXIT_STARTUP);
        }
    };
    if cli.version {
        eprintln!("authward {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }
    cli
}

/// Everything the supervisor needs, validated and resolved.
pub struct Settings {
    pub params: EngineParams,
    pub whitelist: Whitelist,
    pub procauth: ProcAuth,
    pub sources: Vec<String>,
    pub pidfile: Option<PathBuf>,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mut params = EngineParams::default();

        if let Some(threshold) = cli.abuse_threshold {
            if threshold == 0 {
                bail!("an abuse threshold below one danger unit makes no sense");
            }
            params.abuse_threshold = threshold;
        }
        if let Some(pardon) = cli.pardon {
            if pardon == 0 {
                bail!("a pardon time below one second makes no sense");
            }
            params.pardon_secs = pardon;
        }
        if let Some(stale) = cli.stale {
            if stale == 0 {
                bail!("a stale threshold below one second makes no sense");
            }
            params.stale_secs = stale;
        }

        if let Some(spec) = &cli.blacklist {
            let (threshold, path) = parse_blacklist_spec(spec);
            if threshold < params.abuse_threshold {
                bail!(
                    "a blacklist threshold ({threshold}) below the abuse threshold ({}) makes no sense",
                    params.abuse_threshold
                );
            }
            params.blacklist_threshold = threshold;
            params.blacklist_file = Some(PathBuf::from(path));
        }

        let mut whitelist = Whitelist::new();
        // The loopback is never an attacker.
        whitelist
            .add("127.0.0.1")
            .ok()
            .context("could not whitelist localhost")?;
        for entry in &cli.whitelist {
            let result = if entry.starts_with('/') || entry.starts_with('.') {
                whitelist.add_file(std::path::Path::new(entry))
            } else {
                whitelist.add(entry)
            };
            // A bad entry narrows protection but should not kill the daemon.
            if let Err(err) = result {
                warn!(entry = %entry, %err, "skipping whitelist entry");
            }
        }

        let mut procauth = ProcAuth::new();
        for spec in &cli.pid_auth {
            procauth
                .register(spec)
                .with_context(|| format!("bad -f argument '{spec}'"))?;
        }

        let sources = if cli.sources.is_empty() {
            vec!["-".to_string()]
        } else {
            cli.sources.clone()
        };

        Ok(Self {
            params,
            whitelist,
            procauth,
            sources,
            pidfile: cli.pidfile.clone(),
        })
    }
}

/// `-b` takes `THRESHOLD:PATH`, or a bare path with the default threshold.
fn parse_blacklist_spec(spec: &str) -> (u32, &str) {
    if let Some((threshold, path)) = spec.split_once(':') {
        if let Ok(threshold) = threshold.parse::<u32>() {
            return (threshold, path);
        }
    }
    (DEFAULT_BLACKLIST_THRESHOLD, spec)
}

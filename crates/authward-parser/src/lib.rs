// authward-parser: decides whether a log line is an attack and extracts the
// attacker address, target service, and danger weight.
//
// Parser state (the "last attack" needed by the repetition sentinel) is
// keyed by source id in a map owned by the parser, so lines from different
// sources never contaminate each other's elision state.

pub mod procauth;
mod patterns;

use std::collections::HashMap;
use std::net::IpAddr;

use tokio::net::lookup_host;
use tracing::{debug, info};

use authward_core::{Addr, Attack};
use authward_sources::SourceId;

pub use patterns::{AddrToken, AttackKind};
pub use procauth::{AuthVerdict, ProcAuth, ProcAuthError};

use patterns::{match_phrase, match_repeat, strip_banner};

#[derive(Debug, Default)]
struct SourceParseState {
    last_recognized: bool,
    last_attack: Option<Attack>,
    last_multiplicity: u64,
}

/// The attack recognizer. One instance serves all sources.
pub struct AttackParser {
    states: HashMap<SourceId, SourceParseState>,
    procauth: ProcAuth,
}

impl AttackParser {
    pub fn new(procauth: ProcAuth) -> Self {
        Self {
            states: HashMap::new(),
            procauth,
        }
    }

    /// Classify one line from `source`. Returns the recognized attack, or
    /// `None` for anything that should be ignored: unparsable lines, DNS
    /// failures, and disproved PID claims all drop silently here.
    pub async fn parse_line(&mut self, source: SourceId, line: &str) -> Option<Attack> {
        let outcome = self.recognize(source, line).await;

        let state = self.states.entry(source).or_default();
        match outcome {
            Some((attack, multiplicity)) => {
                state.last_recognized = true;
                state.last_attack = Some(attack);
                state.last_multiplicity = multiplicity;
                Some(attack)
            }
            None => {
                state.last_recognized = false;
                None
            }
        }
    }

    async fn recognize(&mut self, source: SourceId, line: &str) -> Option<(Attack, u64)> {
        let (rest, pid) = strip_banner(line);

        if let Some(n) = match_repeat(rest) {
            // The sentinel carries no other clue; it only means something
            // when the previous line on this source was a recognized attack.
            let state = self.states.get(&source)?;
            if !state.last_recognized || n == 0 {
                return None;
            }
            let last = state.last_attack?;
            let per_attack = last.danger / state.last_multiplicity.max(1) as u32;
            let attack = Attack {
                danger: (n.min(u32::MAX as u64) as u32).saturating_mul(per_attack),
                ..last
            };
            debug!(addr = %attack.addr, multiplicity = n, "attack replayed by repetition line");
            return Some((attack, n));
        }

        let (kind, token) = match_phrase(rest)?;
        let addr = resolve(token).await?;

        if let Some(pid) = pid {
            if self.procauth.is_authoritative(kind.service(), pid) == AuthVerdict::Forged {
                info!(
                    pid,
                    service = %kind.service(),
                    "ignoring attack: pid was forged for this service"
                );
                return None;
            }
        }

        let attack = Attack {
            addr,
            service: kind.service(),
            danger: kind.danger(),
        };
        debug!(
            addr = %attack.addr,
            service = %attack.service,
            danger = attack.danger,
            "attack recognized"
        );
        Some((attack, 1))
    }
}

/// Turn an address token into a typed address. Hostnames resolve A first,
/// then AAAA; failure of both drops the line.
async fn resolve(token: AddrToken) -> Option<Addr> {
    match token {
        AddrToken::Ip4(s) => s.parse().ok().map(Addr::V4),
        AddrToken::Ip6(s) => s.parse().ok().map(Addr::V6),
        AddrToken::Host(host) => {
            let addrs: Vec<IpAddr> = lookup_host((host.as_str(), 0))
                .await
                .ok()?
                .map(|sock| sock.ip())
                .collect();
            let picked = addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .copied();
            match &picked {
                Some(ip) => debug!(host = %host, addr = %ip, "hostname resolved"),
                None => debug!(host = %host, "hostname did not resolve, dropping line"),
            }
            picked.map(Addr::from)
        }
    }
}

use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::address::Addr;

const IPV4_BITS: u32 = 32;
const IPV6_BITS: u32 = 128;

static HOSTNAME_RE: OnceLock<Regex> = OnceLock::new();

/// "localhost" or at least a second-level name.
fn hostname_re() -> &'static Regex {
    HOSTNAME_RE.get_or_init(|| {
        Regex::new(r"^(localhost|([-a-zA-Z0-9]+\.)+[a-zA-Z]+)$").expect("invalid regex")
    })
}

#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error("cannot read whitelist file '{path}': {source}")]
    File {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse '{0}' as an address, network block, or hostname")]
    Unparsable(String),
    #[error("mask length /{len} makes no sense for {family}")]
    BadMask { len: u32, family: &'static str },
    #[error("could not resolve hostname '{0}'")]
    Resolve(String),
}

/// Addresses that must never be blocked.
///
/// Entries are kept as (address, mask) pairs per family; an address matches
/// iff some same-family entry agrees with it on the masked bits. Hostname
/// entries are resolved once, at add time.
#[derive(Debug, Default)]
pub struct Whitelist {
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// Add one entry: a literal v4/v6 address, a CIDR block of either
    /// family, or a hostname to be resolved now.
    pub fn add(&mut self, entry: &str) -> Result<(), WhitelistError> {
        if let Ok(addr) = entry.parse::<Addr>() {
            debug!(entry, "whitelist: add as plain address");
            self.add_addr(addr);
            return Ok(());
        }

        if let Some((base, masklen)) = entry.rsplit_once('/') {
            let len: u32 = masklen
                .parse()
                .map_err(|_| WhitelistError::Unparsable(entry.to_string()))?;
            let addr = base
                .parse::<Addr>()
                .map_err(|_| WhitelistError::Unparsable(entry.to_string()))?;
            debug!(entry, "whitelist: add as network block");
            return self.add_block(addr, len);
        }

        if hostname_re().is_match(entry) {
            debug!(entry, "whitelist: add as hostname");
            return self.add_host(entry);
        }

        Err(WhitelistError::Unparsable(entry.to_string()))
    }

    /// Load entries from a file, one per line; `#` starts a comment.
    /// Malformed entries are logged and skipped, per the whitelist contract.
    pub fn add_file(&mut self, path: &Path) -> Result<(), WhitelistError> {
        let contents = std::fs::read_to_string(path).map_err(|source| WhitelistError::File {
            path: path.display().to_string(),
            source,
        })?;

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(err) = self.add(line) {
                warn!(
                    file = %path.display(),
                    line = lineno + 1,
                    %err,
                    "whitelist: skipping malformed entry"
                );
            }
        }
        Ok(())
    }

    fn add_addr(&mut self, addr: Addr) {
        match addr {
            Addr::V4(v4) => self.v4.push((u32::from(v4), u32::MAX)),
            Addr::V6(v6) => self.v6.push((u128::from(v6), u128::MAX)),
        }
    }

    fn add_block(&mut self, addr: Addr, masklen: u32) -> Result<(), WhitelistError> {
        match addr {
            Addr::V4(v4) => {
                if masklen > IPV4_BITS {
                    return Err(WhitelistError::BadMask {
                        len: masklen,
                        family: "IPv4",
                    });
                }
                let mask = if masklen == 0 {
                    0
                } else {
                    u32::MAX << (IPV4_BITS - masklen)
                };
                self.v4.push((u32::from(v4), mask));
            }
            Addr::V6(v6) => {
                if masklen > IPV6_BITS {
                    return Err(WhitelistError::BadMask {
                        len: masklen,
                        family: "IPv6",
                    });
                }
                let mask = if masklen == 0 {
                    0
                } else {
                    u128::MAX << (IPV6_BITS - masklen)
                };
                self.v6.push((u128::from(v6), mask));
            }
        }
        Ok(())
    }

    fn add_host(&mut self, host: &str) -> Result<(), WhitelistError> {
        // Port 0 is a dummy; we only want the resolver's address list.
        let resolved = (host, 0)
            .to_socket_addrs()
            .map_err(|_| WhitelistError::Resolve(host.to_string()))?;

        let mut count = 0;
        for sock in resolved {
            self.add_addr(Addr::from(sock.ip()));
            count += 1;
        }
        if count == 0 {
            return Err(WhitelistError::Resolve(host.to_string()));
        }
        debug!(host, count, "whitelist: hostname resolved");
        Ok(())
    }

    /// Whether `addr` matches any same-family entry modulo its mask.
    pub fn contains(&self, addr: &Addr) -> bool {
        match addr {
            Addr::V4(v4) => {
                let bits = u32::from(*v4);
                self.v4.iter().any(|(net, mask)| bits & mask == net & mask)
            }
            Addr::V6(v6) => {
                let bits = u128::from(*v6);
                self.v6.iter().any(|(net, mask)| bits & mask == net & mask)
            }
        }
    }
}

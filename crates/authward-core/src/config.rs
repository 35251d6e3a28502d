//! Tunables and hard limits shared across the daemon.

/// Danger units an address must accumulate before it gets blocked.
/// With the default per-attack danger of 10 this is four attacks.
pub const DEFAULT_ABUSE_THRESHOLD: u32 = 40;

/// Base seconds a first-time offender stays blocked.
pub const DEFAULT_PARDON_SECS: u64 = 7 * 60;

/// Seconds of inactivity after which a limbo suspect is forgotten.
pub const DEFAULT_STALE_SECS: u64 = 20 * 60;

/// Cumulated danger over an address's whole offending career from which it
/// gets blacklisted and blocked permanently.
pub const DEFAULT_BLACKLIST_THRESHOLD: u32 = 120;

/// Maximum number of log sources followed at once.
pub const MAX_SOURCES: usize = 35;

/// Maximum useful log line length in bytes; longer lines are abandoned.
pub const MAX_LINE_LEN: usize = 1000;

/// Cap on the idle-poll backoff of the source multiplexer (milliseconds).
pub const MAX_POLL_INTERVAL_MS: u64 = 2200;

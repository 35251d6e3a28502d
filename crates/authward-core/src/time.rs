use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch seconds.
///
/// All attacker bookkeeping (first/last seen, pardon arithmetic, blacklist
/// records) runs on epoch seconds; sub-second precision buys nothing here.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

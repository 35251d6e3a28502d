//! The release scheduler: a long-running task that wakes at jittered
//! intervals and releases blocked addresses whose pardon time has run out.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{error, info};

use authward_core::time::unix_now;
use authward_firewall::Firewall;

use crate::roster::BlockRoster;

/// Run forever, scanning the roster every `1 + rand(1 + pardon/2)` seconds.
/// The jitter spreads scans out so expiry timing never becomes a precise
/// oracle; it must never derive from address data.
pub async fn pardon_loop(roster: Arc<BlockRoster>, fw: Arc<dyn Firewall>, pardon_secs: u64) {
    loop {
        let wait = 1 + rand::thread_rng().gen_range(0..1 + pardon_secs / 2);
        sleep(Duration::from_secs(wait)).await;
        release_expired(&roster, fw.as_ref(), unix_now());
    }
}

/// One scan: take every expired entry out of the roster and tell the
/// firewall to release it. Entries leave the roster even if the release
/// command fails, matching the failed-block policy: the state machine, not
/// the back-end, is the source of truth.
pub fn release_expired(roster: &BlockRoster, fw: &dyn Firewall, now: u64) {
    for rec in roster.take_expired(now) {
        info!(
            addr = %rec.attack.addr,
            blocked_secs = now.saturating_sub(rec.last_seen),
            "releasing blocked address"
        );
        if let Err(err) = fw.release(&rec.attack.addr, rec.attack.service) {
            error!(%err, addr = %rec.attack.addr, "release command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use authward_core::{Addr, Attack, AttackerRecord, Service};
    use authward_firewall::FwResult;

    #[derive(Default)]
    struct ReleaseLog {
        released: Mutex<Vec<Addr>>,
    }

    impl Firewall for ReleaseLog {
        fn block(&self, _: &Addr, _: Service) -> FwResult {
            Ok(())
        }
        fn release(&self, addr: &Addr, _: Service) -> FwResult {
            self.released.lock().unwrap().push(*addr);
            Ok(())
        }
        fn flush_all(&self) -> FwResult {
            Ok(())
        }
    }

    fn blocked(addr: &str, last_seen: u64, pardon_secs: u64) -> AttackerRecord {
        AttackerRecord {
            attack: Attack::new(addr.parse().unwrap(), Service::Ssh),
            first_seen: last_seen,
            last_seen,
            pardon_secs,
            hits: 1,
            cumulated_danger: 40,
        }
    }

    #[test]
    fn test_releases_only_expired_finite_pardons() {
        let roster = BlockRoster::new();
        roster.insert(blocked("203.0.113.5", 1000, 60));
        roster.insert(blocked("203.0.113.6", 1000, 9999));
        roster.insert(blocked("203.0.113.7", 1000, 0)); // blacklisted

        let fw = ReleaseLog::default();
        release_expired(&roster, &fw, 1100);

        let released = fw.released.lock().unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0], "203.0.113.5".parse::<Addr>().unwrap());
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_released_even_when_command_fails() {
        struct FailingRelease;
        impl Firewall for FailingRelease {
            fn block(&self, _: &Addr, _: Service) -> FwResult {
                Ok(())
            }
            fn release(&self, _: &Addr, _: Service) -> FwResult {
                Err(authward_firewall::FwError::Failed("nope".to_string()))
            }
            fn flush_all(&self) -> FwResult {
                Ok(())
            }
        }

        let roster = BlockRoster::new();
        roster.insert(blocked("203.0.113.5", 1000, 60));
        release_expired(&roster, &FailingRelease, 2000);
        assert!(roster.is_empty());
    }
}

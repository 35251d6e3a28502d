use crate::address::Addr;
use crate::service::Service;

/// Dangerousness assigned to an attack unless its kind overrides it.
pub const DEFAULT_DANGER: u32 = 10;

/// One recognized abuse: who, against what, and how bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attack {
    pub addr: Addr,
    pub service: Service,
    /// Danger weight; thresholds are sums of these, not attack counts.
    pub danger: u32,
}

impl Attack {
    pub fn new(addr: Addr, service: Service) -> Self {
        Self {
            addr,
            service,
            danger: DEFAULT_DANGER,
        }
    }
}

/// Accumulated profile of one attacker address.
///
/// The same type serves the limbo list (suspects), the block roster
/// (currently blocked), the offenders history, and blacklist records; which
/// fields are meaningful depends on the list, matching the record layout
/// persisted to the blacklist file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackerRecord {
    pub attack: Attack,
    /// First time seen (epoch seconds).
    pub first_seen: u64,
    /// Last time seen, or last time blocked for offender entries.
    pub last_seen: u64,
    /// Seconds to wait after `last_seen` before releasing a block.
    /// 0 means never release (blacklisted).
    pub pardon_secs: u64,
    /// Attack count in limbo; abuse (block) count in the offenders list.
    pub hits: u32,
    pub cumulated_danger: u32,
}

impl AttackerRecord {
    /// Fresh record for a first-sighted attacker.
    pub fn first_sighting(attack: Attack, now: u64) -> Self {
        Self {
            attack,
            first_seen: now,
            last_seen: now,
            pardon_secs: 0,
            hits: 1,
            cumulated_danger: attack.danger,
        }
    }

    /// Fold one more attack from the same address into this record.
    pub fn absorb(&mut self, attack: &Attack, now: u64) {
        self.last_seen = now;
        self.hits += 1;
        self.cumulated_danger = self.cumulated_danger.saturating_add(attack.danger);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attack(danger: u32) -> Attack {
        Attack {
            addr: "198.51.100.7".parse().unwrap(),
            service: Service::Ssh,
            danger,
        }
    }

    #[test]
    fn test_first_sighting() {
        let rec = AttackerRecord::first_sighting(attack(10), 1000);
        assert_eq!(rec.first_seen, 1000);
        assert_eq!(rec.last_seen, 1000);
        assert_eq!(rec.hits, 1);
        assert_eq!(rec.cumulated_danger, 10);
        assert_eq!(rec.pardon_secs, 0);
    }

    #[test]
    fn test_absorb_accumulates() {
        let mut rec = AttackerRecord::first_sighting(attack(10), 1000);
        rec.absorb(&attack(50), 1030);
        assert_eq!(rec.first_seen, 1000);
        assert_eq!(rec.last_seen, 1030);
        assert_eq!(rec.hits, 2);
        assert_eq!(rec.cumulated_danger, 60);
    }
}

use std::sync::Mutex;

use authward_core::{Addr, AttackerRecord};

/// The set of currently blocked addresses.
///
/// Shared between the main reader (which inserts on block) and the release
/// scheduler (which removes on pardon), so every compound operation happens
/// under one lock acquisition. Invariant: each entry corresponds to an
/// active firewall rule.
#[derive(Default)]
pub struct BlockRoster {
    inner: Mutex<Vec<AttackerRecord>>,
}

impl BlockRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, addr: &Addr) -> bool {
        self.inner
            .lock()
            .expect("roster lock poisoned")
            .iter()
            .any(|rec| rec.attack.addr == *addr)
    }

    /// Insert a blocked attacker; keyed by address, so re-inserting an
    /// already-present address replaces its record rather than duplicating.
    pub fn insert(&self, rec: AttackerRecord) {
        let mut inner = self.inner.lock().expect("roster lock poisoned");
        inner.retain(|r| r.attack.addr != rec.attack.addr);
        inner.push(rec);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("roster lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry whose finite pardon has expired.
    /// Entries with pardon 0 (blacklisted) are never returned.
    pub fn take_expired(&self, now: u64) -> Vec<AttackerRecord> {
        let mut inner = self.inner.lock().expect("roster lock poisoned");
        let mut expired = Vec::new();
        inner.retain(|rec| {
            let done = rec.pardon_secs > 0 && now.saturating_sub(rec.last_seen) > rec.pardon_secs;
            if done {
                expired.push(rec.clone());
            }
            !done
        });
        expired
    }

    pub fn snapshot(&self) -> Vec<AttackerRecord> {
        self.inner.lock().expect("roster lock poisoned").clone()
    }
}

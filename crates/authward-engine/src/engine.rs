use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use authward_core::config::{
    DEFAULT_ABUSE_THRESHOLD, DEFAULT_BLACKLIST_THRESHOLD, DEFAULT_PARDON_SECS, DEFAULT_STALE_SECS,
};
use authward_core::time::unix_now;
use authward_core::{blacklist, Attack, AttackerRecord, Whitelist};
use authward_firewall::Firewall;

use crate::roster::BlockRoster;

/// Engine tunables, all in danger units and seconds.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Cumulated danger from which an address gets blocked.
    pub abuse_threshold: u32,
    /// Base block duration; grows 1.5× per recorded abuse.
    pub pardon_secs: u64,
    /// Inactivity after which a limbo suspect is forgotten.
    pub stale_secs: u64,
    /// Career danger from which an address gets blacklisted.
    pub blacklist_threshold: u32,
    /// Where to persist blacklisted attackers; `None` disables blacklisting.
    pub blacklist_file: Option<PathBuf>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            abuse_threshold: DEFAULT_ABUSE_THRESHOLD,
            pardon_secs: DEFAULT_PARDON_SECS,
            stale_secs: DEFAULT_STALE_SECS,
            blacklist_threshold: DEFAULT_BLACKLIST_THRESHOLD,
            blacklist_file: None,
        }
    }
}

/// The offender state machine.
///
/// Tracks suspects in limbo until they cross the abuse threshold, then
/// blocks them with a pardon time that grows with recidivism, promoting
/// chronic offenders to the persistent blacklist. Limbo and the offender
/// history are owned here and touched only by the reader; the block roster
/// is shared with the release scheduler.
pub struct OffenderEngine {
    params: EngineParams,
    whitelist: Whitelist,
    /// Suspects not yet over the blocking threshold.
    limbo: Vec<AttackerRecord>,
    /// Every address ever blocked this lifetime, sorted by last_seen
    /// descending.
    offenders: Vec<AttackerRecord>,
    roster: Arc<BlockRoster>,
    fw: Arc<dyn Firewall>,
}

impl OffenderEngine {
    pub fn new(
        params: EngineParams,
        whitelist: Whitelist,
        roster: Arc<BlockRoster>,
        fw: Arc<dyn Firewall>,
    ) -> Self {
        Self {
            params,
            whitelist,
            limbo: Vec::new(),
            offenders: Vec::new(),
            roster,
            fw,
        }
    }

    /// Feed one recognized attack into the state machine.
    pub fn report(&mut self, attack: Attack) {
        self.report_at(attack, unix_now());
    }

    fn report_at(&mut self, attack: Attack, now: u64) {
        self.purge_limbo_stale(now);

        // Already blocked? Can happen for a hundred reasons; the check is
        // what makes blocking idempotent per lifetime.
        if self.roster.contains(&attack.addr) {
            info!(addr = %attack.addr, "asked to block an address already blocked");
            return;
        }

        if self.whitelist.contains(&attack.addr) {
            info!(addr = %attack.addr, "passing over whitelisted address");
            return;
        }

        let suspect = match self
            .limbo
            .iter_mut()
            .find(|rec| rec.attack.addr == attack.addr)
        {
            Some(rec) => {
                rec.absorb(&attack, now);
                rec
            }
            None => {
                self.limbo.push(AttackerRecord::first_sighting(attack, now));
                self.limbo.last_mut().expect("just pushed")
            }
        };

        if suspect.cumulated_danger < self.params.abuse_threshold {
            // Keep an eye on this one, nothing more.
            debug!(
                addr = %attack.addr,
                danger = suspect.cumulated_danger,
                threshold = self.params.abuse_threshold,
                "suspect below abuse threshold"
            );
            return;
        }

        // Over the threshold: this address gets blocked. Work out for how
        // long, based on its record as an offender.
        let mut blocked = suspect.clone();
        self.limbo.retain(|rec| rec.attack.addr != attack.addr);

        let offender = match self
            .offenders
            .iter_mut()
            .find(|rec| rec.attack.addr == attack.addr)
        {
            Some(rec) => {
                rec.hits += 1;
                rec.cumulated_danger = rec.cumulated_danger.saturating_add(blocked.cumulated_danger);
                rec.last_seen = blocked.last_seen;
                rec
            }
            None => {
                debug!(addr = %attack.addr, "first abuse, adding to offender history");
                let mut fresh = blocked.clone();
                fresh.hits = 1;
                self.offenders.insert(0, fresh);
                self.offenders.first_mut().expect("just inserted")
            }
        };

        if offender.cumulated_danger >= self.params.blacklist_threshold {
            // Block permanently; persist so restarts re-block it.
            blocked.pardon_secs = 0;
            warn!(
                addr = %attack.addr,
                danger = offender.cumulated_danger,
                abuses = offender.hits,
                threshold = self.params.blacklist_threshold,
                "offender crossed blacklist threshold"
            );
            if let Some(path) = &self.params.blacklist_file {
                match blacklist::contains(path, &attack.addr) {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Err(err) = blacklist::append(path, offender) {
                            error!(%err, "could not blacklist offender");
                        }
                    }
                    Err(err) => {
                        error!(file = %path.display(), %err, "error looking up blacklist");
                    }
                }
            }
        } else {
            let mut pardon = self.params.pardon_secs as f64;
            for _ in 0..offender.hits {
                pardon *= 1.5;
            }
            blocked.pardon_secs = pardon as u64;
            info!(
                addr = %attack.addr,
                danger = offender.cumulated_danger,
                abuses = offender.hits,
                "offender scored"
            );
        }

        self.offenders
            .sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

        info!(
            addr = %attack.addr,
            service = %attack.service,
            pardon_secs = blocked.pardon_secs,
            danger = blocked.cumulated_danger,
            attacks = blocked.hits,
            "blocking attacker"
        );
        if let Err(err) = self.fw.block(&attack.addr, attack.service) {
            // The address stays logically blocked; the idempotence check
            // above keeps us from hammering a broken back-end.
            error!(%err, addr = %attack.addr, "blocking command failed");
        }

        self.roster.insert(blocked);
    }

    /// Forget limbo suspects that went quiet.
    fn purge_limbo_stale(&mut self, now: u64) {
        let stale = self.params.stale_secs;
        self.limbo
            .retain(|rec| now.saturating_sub(rec.first_seen) <= stale);
    }

    /// Block every blacklisted attacker in bulk, one batch per address
    /// family. Called once at startup; the entries do not join limbo or the
    /// offender history; they re-earn their place if they come back.
    pub fn enforce_blacklist(&self, records: &[AttackerRecord]) {
        if records.is_empty() {
            return;
        }
        info!(count = records.len(), "blocking blacklisted addresses");
        for family in [true, false] {
            let batch: Vec<_> = records
                .iter()
                .filter(|rec| rec.attack.addr.is_v4() == family)
                .map(|rec| (rec.attack.addr, rec.attack.service))
                .collect();
            if batch.is_empty() {
                continue;
            }
            if let Err(err) = self.fw.block_batch(&batch) {
                error!(%err, "firewall refused to block blacklisted addresses");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use authward_core::{Addr, Service};
    use authward_firewall::FwResult;

    #[derive(Default)]
    struct RecordingFirewall {
        blocks: Mutex<Vec<(Addr, Service)>>,
        batches: Mutex<Vec<Vec<(Addr, Service)>>>,
        releases: Mutex<Vec<Addr>>,
    }

    impl Firewall for RecordingFirewall {
        fn block(&self, addr: &Addr, service: Service) -> FwResult {
            self.blocks.lock().unwrap().push((*addr, service));
            Ok(())
        }

        fn block_batch(&self, batch: &[(Addr, Service)]) -> FwResult {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }

        fn release(&self, addr: &Addr, _service: Service) -> FwResult {
            self.releases.lock().unwrap().push(*addr);
            Ok(())
        }

        fn flush_all(&self) -> FwResult {
            Ok(())
        }
    }

    fn attack(addr: &str) -> Attack {
        Attack::new(addr.parse().unwrap(), Service::Ssh)
    }

    fn engine(params: EngineParams, whitelist: Whitelist) -> (OffenderEngine, Arc<RecordingFirewall>, Arc<BlockRoster>) {
        let fw = Arc::new(RecordingFirewall::default());
        let roster = Arc::new(BlockRoster::new());
        let eng = OffenderEngine::new(params, whitelist, roster.clone(), fw.clone());
        (eng, fw, roster)
    }

    fn limbo_danger(eng: &OffenderEngine, addr: &str) -> Option<u32> {
        let addr: Addr = addr.parse().unwrap();
        eng.limbo
            .iter()
            .find(|r| r.attack.addr == addr)
            .map(|r| r.cumulated_danger)
    }

    #[test]
    fn test_single_attack_stays_in_limbo() {
        let (mut eng, fw, roster) = engine(EngineParams::default(), Whitelist::new());
        eng.report_at(attack("203.0.113.5"), 1000);

        assert!(fw.blocks.lock().unwrap().is_empty());
        assert_eq!(limbo_danger(&eng, "203.0.113.5"), Some(10));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_fourth_attack_blocks() {
        let (mut eng, fw, roster) = engine(EngineParams::default(), Whitelist::new());
        for i in 0..4 {
            eng.report_at(attack("203.0.113.5"), 1000 + i);
        }

        let blocks = fw.blocks.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], ("203.0.113.5".parse().unwrap(), Service::Ssh));
        assert_eq!(limbo_danger(&eng, "203.0.113.5"), None);
        assert!(roster.contains(&"203.0.113.5".parse().unwrap()));
        assert_eq!(eng.offenders.len(), 1);
        assert_eq!(eng.offenders[0].hits, 1);
    }

    #[test]
    fn test_blocking_is_idempotent() {
        // Once an address is in the roster, further attacks never
        // issue a second block command.
        let (mut eng, fw, _roster) = engine(EngineParams::default(), Whitelist::new());
        for i in 0..10 {
            eng.report_at(attack("203.0.113.5"), 1000 + i);
        }
        assert_eq!(fw.blocks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_whitelist_dominates() {
        // A whitelisted address can never reach limbo or the roster.
        let mut wl = Whitelist::new();
        wl.add("127.0.0.1").unwrap();
        let (mut eng, fw, roster) = engine(EngineParams::default(), wl);

        for i in 0..20 {
            eng.report_at(attack("127.0.0.1"), 1000 + i);
        }
        assert!(fw.blocks.lock().unwrap().is_empty());
        assert!(eng.limbo.is_empty());
        assert!(eng.offenders.is_empty());
        assert!(roster.is_empty());
    }

    #[test]
    fn test_danger_accumulates_across_attacks() {
        // A replayed attack carrying danger 50 pushes a fresh suspect over
        // the default threshold of 40 in two reports.
        let (mut eng, fw, _) = engine(EngineParams::default(), Whitelist::new());
        eng.report_at(attack("198.51.100.7"), 1000);
        let mut replayed = attack("198.51.100.7");
        replayed.danger = 50;
        eng.report_at(replayed, 1001);

        assert_eq!(fw.blocks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_limbo_staleness() {
        // Suspects with no input for stale_secs vanish on the next call.
        let params = EngineParams {
            stale_secs: 100,
            ..Default::default()
        };
        let (mut eng, _, _) = engine(params, Whitelist::new());
        eng.report_at(attack("203.0.113.5"), 1000);
        eng.report_at(attack("203.0.113.99"), 1101);

        assert_eq!(limbo_danger(&eng, "203.0.113.5"), None);
        assert_eq!(limbo_danger(&eng, "203.0.113.99"), Some(10));
    }

    fn block_and_release(eng: &mut OffenderEngine, roster: &BlockRoster, addr: &str, t: u64) -> u64 {
        for i in 0..4 {
            eng.report_at(attack(addr), t + i);
        }
        let pardon = roster
            .snapshot()
            .iter()
            .find(|r| r.attack.addr == addr.parse().unwrap())
            .expect("blocked")
            .pardon_secs;
        // Simulate the pardon expiring so the next round can re-block.
        roster.take_expired(u64::MAX - 1);
        pardon
    }

    #[test]
    fn test_recidivism_grows_pardon_monotonically() {
        // Each successive block of the same address waits at least as
        // long as the previous one.
        let params = EngineParams {
            blacklist_threshold: u32::MAX,
            ..Default::default()
        };
        let (mut eng, _, roster) = engine(params, Whitelist::new());

        let p1 = block_and_release(&mut eng, &roster, "203.0.113.5", 1_000);
        let p2 = block_and_release(&mut eng, &roster, "203.0.113.5", 10_000);
        let p3 = block_and_release(&mut eng, &roster, "203.0.113.5", 20_000);

        assert_eq!(p1, (420.0 * 1.5) as u64);
        assert!(p2 > p1);
        assert!(p3 > p2);
    }

    #[test]
    fn test_blacklist_promotion_writes_file_once() {
        // Three blockings at 40 danger each cross the default threshold of
        // 120; the third block is permanent and hits the file exactly once.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.db");
        let params = EngineParams {
            blacklist_file: Some(path.clone()),
            ..Default::default()
        };
        let (mut eng, _, roster) = engine(params, Whitelist::new());

        let p1 = block_and_release(&mut eng, &roster, "203.0.113.5", 1_000);
        let p2 = block_and_release(&mut eng, &roster, "203.0.113.5", 10_000);
        assert!(p1 > 0);
        assert!(p2 > 0);
        assert!(!blacklist::contains(&path, &"203.0.113.5".parse().unwrap()).unwrap());

        for i in 0..4 {
            eng.report_at(attack("203.0.113.5"), 20_000 + i);
        }
        let rec = &roster.snapshot()[0];
        assert_eq!(rec.pardon_secs, 0);

        let records = blacklist::load(&path).unwrap().unwrap();
        let hits: Vec<_> = records
            .iter()
            .filter(|r| r.attack.addr == "203.0.113.5".parse().unwrap())
            .collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_offenders_sorted_by_last_seen_descending() {
        let params = EngineParams {
            blacklist_threshold: u32::MAX,
            ..Default::default()
        };
        let (mut eng, _, _) = engine(params, Whitelist::new());
        for i in 0..4 {
            eng.report_at(attack("203.0.113.5"), 1_000 + i);
        }
        for i in 0..4 {
            eng.report_at(attack("203.0.113.6"), 2_000 + i);
        }

        assert_eq!(eng.offenders.len(), 2);
        assert_eq!(eng.offenders[0].attack.addr, "203.0.113.6".parse().unwrap());
        assert!(eng.offenders[0].last_seen >= eng.offenders[1].last_seen);
    }

    #[test]
    fn test_enforce_blacklist_batches_per_family() {
        let (eng, fw, roster) = engine(EngineParams::default(), Whitelist::new());
        let records = vec![
            AttackerRecord::first_sighting(attack("203.0.113.5"), 0),
            AttackerRecord::first_sighting(attack("203.0.113.6"), 0),
            AttackerRecord::first_sighting(
                Attack::new("2001:db8::bad".parse().unwrap(), Service::Ssh),
                0,
            ),
        ];
        eng.enforce_blacklist(&records);

        let batches = fw.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
        // Startup blocking bypasses limbo, offenders, and the roster.
        assert!(roster.is_empty());
        assert!(eng.limbo.is_empty());
        assert!(eng.offenders.is_empty());
    }

    #[test]
    fn test_failed_block_still_moves_to_roster() {
        struct FailingFirewall;
        impl Firewall for FailingFirewall {
            fn block(&self, _: &Addr, _: Service) -> FwResult {
                Err(authward_firewall::FwError::Failed("nope".to_string()))
            }
            fn release(&self, _: &Addr, _: Service) -> FwResult {
                Ok(())
            }
            fn flush_all(&self) -> FwResult {
                Ok(())
            }
        }

        let roster = Arc::new(BlockRoster::new());
        let mut eng = OffenderEngine::new(
            EngineParams::default(),
            Whitelist::new(),
            roster.clone(),
            Arc::new(FailingFirewall),
        );
        for i in 0..4 {
            eng.report_at(attack("203.0.113.5"), 1000 + i);
        }
        // Logically blocked despite the back-end failure; the idempotence
        // check prevents a retry storm.
        assert!(roster.contains(&"203.0.113.5".parse().unwrap()));
    }
}

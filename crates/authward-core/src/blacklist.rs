//! Persistent store of permanently blocked attackers.
//!
//! One fixed-width record per attacker, appended as addresses get promoted;
//! the whole file is reloaded and blocked in bulk at startup. All integers
//! are big-endian for portability of the file across hosts.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::address::{Addr, AddrError, ADDR_TEXT_LEN};
use crate::attack::{Attack, AttackerRecord};
use crate::service::Service;

/// Record layout: zero-padded address text, then kind, service, first seen,
/// last seen, pardon seconds, and hit count as big-endian u32s.
pub const RECORD_LEN: usize = ADDR_TEXT_LEN + 6 * 4;

#[derive(Debug, Error)]
pub enum BlacklistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("blacklist length {0} is not a whole number of records")]
    Truncated(u64),
    #[error("blacklist record holds a bad address: {0}")]
    BadAddress(#[from] AddrError),
    #[error("blacklist record holds unknown service code {0}")]
    BadService(u32),
}

fn encode(rec: &AttackerRecord) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];

    let text = rec.attack.addr.to_string();
    debug_assert!(text.len() < ADDR_TEXT_LEN);
    buf[..text.len()].copy_from_slice(text.as_bytes());

    let mut off = ADDR_TEXT_LEN;
    for field in [
        rec.attack.addr.kind(),
        rec.attack.service.code(),
        rec.first_seen as u32,
        rec.last_seen as u32,
        rec.pardon_secs as u32,
        rec.hits,
    ] {
        buf[off..off + 4].copy_from_slice(&field.to_be_bytes());
        off += 4;
    }
    buf
}

fn decode(buf: &[u8]) -> Result<AttackerRecord, BlacklistError> {
    debug_assert_eq!(buf.len(), RECORD_LEN);

    let text_end = buf[..ADDR_TEXT_LEN]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(ADDR_TEXT_LEN);
    let text = String::from_utf8_lossy(&buf[..text_end]);

    let mut fields = [0u32; 6];
    for (i, field) in fields.iter_mut().enumerate() {
        let off = ADDR_TEXT_LEN + i * 4;
        *field = u32::from_be_bytes(buf[off..off + 4].try_into().expect("4-byte slice"));
    }
    let [kind, service, first_seen, last_seen, pardon, hits] = fields;

    let addr = Addr::from_kind_str(kind, &text)?;
    let service = Service::from_code(service).ok_or(BlacklistError::BadService(service))?;

    Ok(AttackerRecord {
        attack: Attack::new(addr, service),
        first_seen: first_seen as u64,
        last_seen: last_seen as u64,
        pardon_secs: pardon as u64,
        hits,
        // Not part of the on-disk record layout (RECORD_LEN is unchanged);
        // see BUILD_FLAGS.json unresolved note.
        cumulated_danger: 0,
    })
}

/// Read every record from `path`. Returns `None` when the file does not
/// exist (distinct from an empty blacklist).
pub fn load(path: &Path) -> Result<Option<Vec<AttackerRecord>>, BlacklistError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    if contents.len() % RECORD_LEN != 0 {
        return Err(BlacklistError::Truncated(contents.len() as u64));
    }

    let mut records = Vec::with_capacity(contents.len() / RECORD_LEN);
    for chunk in contents.chunks_exact(RECORD_LEN) {
        records.push(decode(chunk)?);
    }
    Ok(Some(records))
}

/// Create an empty blacklist file.
pub fn create(path: &Path) -> Result<(), BlacklistError> {
    File::create(path)?;
    Ok(())
}

/// Linear lookup; the blacklist is small.
pub fn contains(path: &Path, addr: &Addr) -> Result<bool, BlacklistError> {
    Ok(load(path)?
        .unwrap_or_default()
        .iter()
        .any(|rec| rec.attack.addr == *addr))
}

/// Append one record; a single write keeps concurrent appends whole.
pub fn append(path: &Path, rec: &AttackerRecord) -> Result<(), BlacklistError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&encode(rec))?;
    debug!(addr = %rec.attack.addr, "blacklisted attacker persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(addr: &str, service: Service) -> AttackerRecord {
        AttackerRecord {
            attack: Attack::new(addr.parse().unwrap(), service),
            first_seen: 1_700_000_000,
            last_seen: 1_700_000_600,
            pardon_secs: 0,
            hits: 3,
            cumulated_danger: 0,
        }
    }

    #[test]
    fn test_record_len_is_fixed() {
        let rec = record("203.0.113.5", Service::Ssh);
        assert_eq!(encode(&rec).len(), RECORD_LEN);
        assert_eq!(RECORD_LEN, 70);
    }

    #[test]
    fn test_append_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.db");

        let v4 = record("203.0.113.5", Service::Ssh);
        let v6 = record("2001:db8::42", Service::Dovecot);
        append(&path, &v4).unwrap();
        append(&path, &v6).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded, vec![v4, v6]);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn test_create_makes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.db");
        create(&path).unwrap();
        assert_eq!(load(&path).unwrap().unwrap(), vec![]);
    }

    #[test]
    fn test_contains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.db");
        append(&path, &record("203.0.113.5", Service::Ssh)).unwrap();

        assert!(contains(&path, &"203.0.113.5".parse().unwrap()).unwrap());
        assert!(!contains(&path, &"203.0.113.6".parse().unwrap()).unwrap());
    }

    #[test]
    fn test_partial_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.db");
        std::fs::write(&path, [0u8; RECORD_LEN - 1]).unwrap();

        assert!(matches!(
            load(&path),
            Err(BlacklistError::Truncated(n)) if n == (RECORD_LEN - 1) as u64
        ));
    }

    #[test]
    fn test_big_endian_on_disk() {
        let rec = record("192.0.2.1", Service::Ssh);
        let buf = encode(&rec);
        // Kind field sits right after the address slot: 4 as a BE u32.
        assert_eq!(&buf[ADDR_TEXT_LEN..ADDR_TEXT_LEN + 4], &[0, 0, 0, 4]);
        // Service code 100 for SSH.
        assert_eq!(&buf[ADDR_TEXT_LEN + 4..ADDR_TEXT_LEN + 8], &[0, 0, 0, 100]);
    }
}

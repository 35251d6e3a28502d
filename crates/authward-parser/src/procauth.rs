//! Verifies that a syslog PID belongs to (or descends from) the process
//! serving a given service, so forged log entries cannot trick the daemon
//! into blocking arbitrary addresses.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info, warn};

use authward_core::Service;

#[derive(Debug, Error)]
pub enum ProcAuthError {
    #[error("expected SERVICE:PIDFILE, got '{0}'")]
    BadSpec(String),
    #[error("unknown service in '{0}': {1}")]
    BadService(String, String),
}

/// Outcome of a PID authentication check.
///
/// `Unknown` means inspection was impossible (missing pidfile, no process
/// table); callers fail open and accept the line, so hardening degrades to
/// coverage rather than silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVerdict {
    Authoritative,
    Forged,
    Unknown,
}

struct ProcEntry {
    service: Service,
    pidfile: PathBuf,
    current_pid: Option<u32>,
}

/// Registry of service → pidfile bindings (`-f` option).
#[derive(Default)]
pub struct ProcAuth {
    entries: Vec<ProcEntry>,
}

impl ProcAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind a service to a pidfile. `spec` has the form `SERVICE:PIDFILE`
    /// where SERVICE is a name (`ssh`) or numeric code (`100`).
    pub fn register(&mut self, spec: &str) -> Result<(), ProcAuthError> {
        let (service, pidfile) = spec
            .split_once(':')
            .ok_or_else(|| ProcAuthError::BadSpec(spec.to_string()))?;
        let service: Service = service
            .parse()
            .map_err(|e| ProcAuthError::BadService(spec.to_string(), e))?;

        let pidfile = PathBuf::from(pidfile);
        let current_pid = read_pidfile(&pidfile);
        info!(%service, pidfile = %pidfile.display(), "authenticating service log entries by PID");
        self.entries.push(ProcEntry {
            service,
            pidfile,
            current_pid,
        });
        Ok(())
    }

    /// Decide whether `pid` may speak for `service`. A claim is
    /// authoritative iff the pid equals the one in the registered pidfile
    /// or descends from it. Unregistered services are `Unknown`.
    pub fn is_authoritative(&mut self, service: Service, pid: u32) -> AuthVerdict {
        let Some(entry) = self.entries.iter_mut().find(|e| e.service == service) else {
            return AuthVerdict::Unknown;
        };

        if entry.current_pid == Some(pid) {
            return AuthVerdict::Authoritative;
        }

        // The service may have restarted; re-read before judging.
        entry.current_pid = read_pidfile(&entry.pidfile);
        match entry.current_pid {
            None => AuthVerdict::Unknown,
            Some(parent) if parent == pid => AuthVerdict::Authoritative,
            Some(parent) => is_descendant(pid, parent),
        }
    }
}

fn read_pidfile(path: &Path) -> Option<u32> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.split_whitespace().next()?.parse().ok(),
        Err(err) => {
            warn!(pidfile = %path.display(), %err, "unable to read pidfile");
            None
        }
    }
}

/// Best-effort descendancy check: walk the /proc ppid chain, falling back
/// to `ps axo pid,ppid` where /proc is unavailable.
fn is_descendant(child: u32, parent: u32) -> AuthVerdict {
    debug!(child, parent, "testing process descendancy");
    match walk_proc_chain(child, parent).or_else(|| walk_ps_output(child, parent)) {
        Some(true) => AuthVerdict::Authoritative,
        Some(false) => AuthVerdict::Forged,
        None => AuthVerdict::Unknown,
    }
}

fn walk_proc_chain(child: u32, parent: u32) -> Option<bool> {
    let mut pid = child;
    // Bounded climb; a process tree deeper than this is not a real one.
    for _ in 0..64 {
        if pid == parent {
            return Some(true);
        }
        if pid <= 1 {
            return Some(false);
        }
        pid = proc_ppid(pid)?;
    }
    Some(false)
}

/// Parse the ppid out of `/proc/<pid>/stat`. The comm field may contain
/// spaces and parentheses, so split after the last `)`.
fn proc_ppid(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

fn walk_ps_output(child: u32, parent: u32) -> Option<bool> {
    let output = Command::new("ps").args(["axo", "pid,ppid"]).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let table: std::collections::HashMap<u32, u32> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            Some((cols.next()?.parse().ok()?, cols.next()?.parse().ok()?))
        })
        .collect();

    let mut pid = child;
    for _ in 0..64 {
        if pid == parent {
            return Some(true);
        }
        if pid <= 1 {
            return Some(false);
        }
        pid = *table.get(&pid)?;
    }
    Some(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pidfile(pid: u32) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{pid}").unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_register_spec_parsing() {
        let mut auth = ProcAuth::new();
        assert!(auth.register("ssh:/var/run/sshd.pid").is_ok());
        assert!(auth.register("100:/var/run/sshd.pid").is_ok());
        assert!(auth.register("no-colon").is_err());
        assert!(auth.register("telnet:/var/run/telnetd.pid").is_err());
    }

    #[test]
    fn test_unregistered_service_is_unknown() {
        let mut auth = ProcAuth::new();
        assert_eq!(
            auth.is_authoritative(Service::Ssh, 1234),
            AuthVerdict::Unknown
        );
    }

    #[test]
    fn test_exact_pid_match_is_authoritative() {
        let me = std::process::id();
        let f = pidfile(me);
        let mut auth = ProcAuth::new();
        auth.register(&format!("ssh:{}", f.path().display())).unwrap();
        assert_eq!(
            auth.is_authoritative(Service::Ssh, me),
            AuthVerdict::Authoritative
        );
    }

    #[test]
    fn test_descendant_is_authoritative() {
        // This test process descends from its own parent.
        let f = pidfile(std::os::unix::process::parent_id());
        let mut auth = ProcAuth::new();
        auth.register(&format!("ssh:{}", f.path().display())).unwrap();
        assert_eq!(
            auth.is_authoritative(Service::Ssh, std::process::id()),
            AuthVerdict::Authoritative
        );
    }

    #[test]
    fn test_non_descendant_is_forged() {
        // PID 1 does not descend from this test process.
        let f = pidfile(std::process::id());
        let mut auth = ProcAuth::new();
        auth.register(&format!("ssh:{}", f.path().display())).unwrap();
        assert_eq!(auth.is_authoritative(Service::Ssh, 1), AuthVerdict::Forged);
    }

    #[test]
    fn test_missing_pidfile_is_unknown() {
        let mut auth = ProcAuth::new();
        auth.register("ssh:/nonexistent/sshd.pid").unwrap();
        assert_eq!(
            auth.is_authoritative(Service::Ssh, 1234),
            AuthVerdict::Unknown
        );
    }
}

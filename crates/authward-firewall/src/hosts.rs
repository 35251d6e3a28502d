//! Back-end that maintains a marked block of deny rules inside a
//! hosts.allow-style file. The whole file is rewritten through a temporary
//! file in the same directory and renamed into place, so readers never see
//! a half-written control file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use authward_core::{Addr, Service};

use crate::{Firewall, FwError, FwResult};

const BLOCK_BEGIN: &str = "###authward### DO NOT EDIT THIS BLOCK";
const BLOCK_END: &str = "###authward### END OF BLOCK";

pub struct HostsFirewall {
    path: PathBuf,
    blocked: Mutex<Vec<Addr>>,
}

impl HostsFirewall {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            blocked: Mutex::new(Vec::new()),
        }
    }

    /// Rewrite the control file with the current block contents.
    fn rewrite(&self, blocked: &[Addr]) -> FwResult {
        let original = std::fs::read_to_string(&self.path)
            .map_err(|e| FwError::Failed(format!("cannot read {}: {e}", self.path.display())))?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| FwError::Failed(format!("cannot create temp file: {e}")))?;

        let mut inside_block = false;
        for line in original.lines() {
            if line == BLOCK_BEGIN {
                inside_block = true;
                continue;
            }
            if line == BLOCK_END {
                inside_block = false;
                continue;
            }
            if !inside_block {
                writeln!(tmp, "{line}").map_err(|e| FwError::Failed(e.to_string()))?;
            }
        }

        writeln!(tmp, "{BLOCK_BEGIN}").map_err(|e| FwError::Failed(e.to_string()))?;
        for addr in blocked {
            writeln!(tmp, "ALL : {addr} : DENY").map_err(|e| FwError::Failed(e.to_string()))?;
        }
        writeln!(tmp, "{BLOCK_END}").map_err(|e| FwError::Failed(e.to_string()))?;

        tmp.persist(&self.path)
            .map_err(|e| FwError::Failed(format!("cannot rename into place: {e}")))?;
        debug!(path = %self.path.display(), entries = blocked.len(), "hosts block rewritten");
        Ok(())
    }
}

impl Firewall for HostsFirewall {
    fn init(&self) -> FwResult {
        // Make sure the file exists and carries our marker block.
        if !self.path.exists() {
            std::fs::write(&self.path, "").map_err(|e| {
                FwError::Failed(format!("cannot create {}: {e}", self.path.display()))
            })?;
        }
        self.rewrite(&[])
    }

    fn finalize(&self) -> FwResult {
        self.rewrite(&[])
    }

    fn block(&self, addr: &Addr, _service: Service) -> FwResult {
        let mut blocked = self.blocked.lock().expect("hosts lock poisoned");
        if !blocked.contains(addr) {
            blocked.push(*addr);
        }
        self.rewrite(&blocked)
    }

    fn release(&self, addr: &Addr, _service: Service) -> FwResult {
        let mut blocked = self.blocked.lock().expect("hosts lock poisoned");
        blocked.retain(|a| a != addr);
        self.rewrite(&blocked)
    }

    fn flush_all(&self) -> FwResult {
        let mut blocked = self.blocked.lock().expect("hosts lock poisoned");
        blocked.clear();
        self.rewrite(&blocked)
    }
}

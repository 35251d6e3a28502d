use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::error;

/// The daemon's own pidfile; removed again when the guard drops.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("could not create pidfile '{}'", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            error!(pidfile = %self.path.display(), %err, "could not remove pidfile");
        }
    }
}

// authward-sources: follows many rotatable log files (and/or stdin) and
// yields one whole line at a time, labelled with a stable source identifier.
//
// The tailer is a portable polling multiplexer: non-blocking round-robin
// reads from a random starting offset, exponential idle backoff, and a
// refresh scan that detects rotation (inode change), disappearance, and
// reappearance of each followed path.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use authward_core::config::{MAX_LINE_LEN, MAX_POLL_INTERVAL_MS, MAX_SOURCES};

/// Initial idle-poll backoff (milliseconds); doubles up to the cap.
const INITIAL_POLL_INTERVAL_MS: u64 = 800;

/// How long a producer may stall mid-line before we abandon the fragment:
/// up to `STALL_GRACE_ROUNDS` sleeps of `STALL_GRACE_MS` each.
const STALL_GRACE_ROUNDS: u32 = 10;
const STALL_GRACE_MS: u64 = 20;

/// Stable 32-bit label of a log source, preserved across rotations.
/// Derived from the path; standard input is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// Source id of standard input.
pub const STDIN_SOURCE: SourceId = SourceId(0);

/// FNV-1a over the path bytes.
fn source_id_for(path: &str) -> SourceId {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in path.as_bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    SourceId(hash)
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot follow more than {MAX_SOURCES} sources")]
    TooManySources,
    #[error("unable to open '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("unable to set up standard input: {0}")]
    Stdin(std::io::Error),
}

#[derive(Debug, PartialEq, Eq)]
enum SourceState {
    Active,
    /// Path currently unreadable or rotated away; retried on every refresh.
    Inactive,
    /// Standard input hit EOF; never comes back.
    Dead,
}

struct Source {
    /// `-` denotes standard input.
    path: PathBuf,
    id: SourceId,
    file: Option<File>,
    inode: u64,
    state: SourceState,
}

/// What one non-blocking read produced. For a regular file `Eof` just
/// means "no new data yet"; for a pipe it is the end of the stream.
enum ReadOutcome {
    Byte(u8),
    NoData,
    Eof,
}

impl Source {
    fn is_stdin(&self) -> bool {
        self.path.as_os_str() == "-"
    }

    /// Read one byte without blocking.
    fn read_byte(&mut self) -> std::io::Result<ReadOutcome> {
        let mut byte = [0u8; 1];
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::from(ErrorKind::NotConnected))?;
        match file.read(&mut byte) {
            Ok(1) => Ok(ReadOutcome::Byte(byte[0])),
            Ok(_) => Ok(ReadOutcome::Eof),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(ReadOutcome::NoData)
            }
            Err(e) => Err(e),
        }
    }
}

/// Mark a descriptor non-blocking, so a slow producer can never park the
/// whole multiplexer on one source.
fn set_nonblocking(file: &File) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    // Plain flag twiddling; the descriptor is owned by `file`.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// The log-source multiplexer.
pub struct LogMux {
    sources: Vec<Source>,
    last_read: Option<usize>,
}

impl Default for LogMux {
    fn default() -> Self {
        Self::new()
    }
}

impl LogMux {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            last_read: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Start following `path` (`-` = standard input). Files are opened
    /// non-blocking and positioned at their end, so historic lines are
    /// ignored. Returns the stable source id.
    pub fn add_source(&mut self, path: &str) -> Result<SourceId, SourceError> {
        if self.sources.len() >= MAX_SOURCES {
            return Err(SourceError::TooManySources);
        }

        let source = if path == "-" {
            // Work on a duplicate so dropping it never closes the real
            // stdin out from under the process.
            let owned = std::io::stdin()
                .as_fd()
                .try_clone_to_owned()
                .map_err(SourceError::Stdin)?;
            let file = File::from(owned);
            set_nonblocking(&file).map_err(SourceError::Stdin)?;
            Source {
                path: PathBuf::from("-"),
                id: STDIN_SOURCE,
                file: Some(file),
                inode: 0,
                state: SourceState::Active,
            }
        } else {
            let mut file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
                .map_err(|source| SourceError::Open {
                    path: path.to_string(),
                    source,
                })?;
            // Safe to fail if the source is a named pipe.
            let _ = file.seek(SeekFrom::End(0));
            let inode = std::fs::metadata(path).map(|m| m.ino()).unwrap_or(0);
            Source {
                path: PathBuf::from(path),
                id: source_id_for(path),
                file: Some(file),
                inode,
                state: SourceState::Active,
            }
        };

        debug!(path, id = source.id.0, "following log source");
        let id = source.id;
        self.sources.push(source);
        Ok(id)
    }

    /// Deliver the next complete line and the source it came from.
    ///
    /// With `stick_to_previous`, the source that produced the previous line
    /// is drained first, used when a line fragments into a follow-on token
    /// on the same source. Returns `None` only when no source can ever
    /// produce data again.
    pub async fn next_line(&mut self, stick_to_previous: bool) -> Option<(String, SourceId)> {
        if stick_to_previous {
            if let Some(idx) = self.last_read {
                if self.sources[idx].state == SourceState::Active {
                    debug!(path = %self.sources[idx].path.display(), "sticking to previous source");
                    if let Some(line) = self.drain_line(idx, Vec::new()).await {
                        return Some((line, self.sources[idx].id));
                    }
                }
            }
        }

        let mut backoff = Duration::from_millis(INITIAL_POLL_INTERVAL_MS);
        loop {
            if self.sources.is_empty() || self.sources.iter().all(|s| s.state == SourceState::Dead)
            {
                return None;
            }

            // Random starting offset so one busy source cannot starve the
            // rest.
            let len = self.sources.len();
            let start = rand::thread_rng().gen_range(0..len);
            for step in 0..len {
                let idx = (start + step) % len;
                if self.sources[idx].state != SourceState::Active {
                    continue;
                }
                match self.sources[idx].read_byte() {
                    Ok(ReadOutcome::Byte(byte)) => {
                        self.last_read = Some(idx);
                        if let Some(line) = self.drain_line(idx, vec![byte]).await {
                            return Some((line, self.sources[idx].id));
                        }
                        // Fragment abandoned; keep polling.
                    }
                    Ok(ReadOutcome::NoData) => {}
                    Ok(ReadOutcome::Eof) => {
                        // Files sit at EOF whenever we caught up; stdin at
                        // EOF is gone for good.
                        if self.sources[idx].is_stdin() {
                            info!("standard input closed");
                            self.sources[idx].file = None;
                            self.sources[idx].state = SourceState::Dead;
                        }
                    }
                    Err(err) => {
                        warn!(
                            path = %self.sources[idx].path.display(),
                            %err,
                            "read error, deactivating source"
                        );
                        self.deactivate(idx);
                    }
                }
            }

            // Full miss: wait with exponential backoff, then rescan paths.
            debug!(wait_ms = backoff.as_millis() as u64, "no new data on any source");
            sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_millis(MAX_POLL_INTERVAL_MS));
            self.refresh();
        }
    }

    /// Read up to the newline, starting from the bytes already collected.
    /// A producer stalling mid-line gets a bounded grace; after that the
    /// fragment is abandoned so one slow writer cannot starve the others.
    async fn drain_line(&mut self, idx: usize, mut buf: Vec<u8>) -> Option<String> {
        let mut stalls = 0;

        while buf.last() != Some(&b'\n') {
            if buf.len() >= MAX_LINE_LEN {
                error!(
                    path = %self.sources[idx].path.display(),
                    "line exceeds {MAX_LINE_LEN} bytes, abandoning it"
                );
                return None;
            }
            match self.sources[idx].read_byte() {
                Ok(ReadOutcome::Byte(byte)) => {
                    buf.push(byte);
                    continue;
                }
                Ok(ReadOutcome::NoData) | Ok(ReadOutcome::Eof) => {
                    stalls += 1;
                    if stalls > STALL_GRACE_ROUNDS {
                        error!(
                            path = %self.sources[idx].path.display(),
                            collected = buf.len(),
                            "producer stalled mid-line, abandoning fragment"
                        );
                        return None;
                    }
                    sleep(Duration::from_millis(STALL_GRACE_MS)).await;
                }
                Err(err) => {
                    warn!(
                        path = %self.sources[idx].path.display(),
                        %err,
                        "read error mid-line, deactivating source"
                    );
                    self.deactivate(idx);
                    return None;
                }
            }
        }

        buf.pop(); // strip the newline
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Some(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Re-stat every followed path: deactivate sources whose path is gone,
    /// reopen rotated ones from byte 0, and reactivate reappeared ones.
    /// Standard input is never refreshed.
    fn refresh(&mut self) {
        for idx in 0..self.sources.len() {
            if self.sources[idx].is_stdin() || self.sources[idx].state == SourceState::Dead {
                continue;
            }
            let path = self.sources[idx].path.clone();
            match std::fs::metadata(&path) {
                Err(_) => {
                    if self.sources[idx].state == SourceState::Active {
                        warn!(path = %path.display(), "log file disappeared, will retry");
                        self.deactivate(idx);
                    }
                }
                Ok(meta) => {
                    if self.sources[idx].state == SourceState::Inactive {
                        info!(path = %path.display(), "log file reappeared");
                        self.reopen(idx, meta.ino());
                    } else if meta.ino() != self.sources[idx].inode {
                        info!(path = %path.display(), "log file rotated, reloading");
                        self.reopen(idx, meta.ino());
                    }
                }
            }
        }
    }

    /// Open the path fresh at byte 0 (rotated and reborn files must be read
    /// from the start, not from the old offset).
    fn reopen(&mut self, idx: usize, inode: u64) {
        let path = self.sources[idx].path.clone();
        match OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
        {
            Ok(file) => {
                self.sources[idx].file = Some(file);
                self.sources[idx].inode = inode;
                self.sources[idx].state = SourceState::Active;
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "lost log file while reopening");
                self.deactivate(idx);
            }
        }
    }

    fn deactivate(&mut self, idx: usize) {
        self.sources[idx].file = None;
        self.sources[idx].state = SourceState::Inactive;
    }

    /// Stop following everything and close all descriptors.
    pub fn close(&mut self) {
        self.sources.clear();
        self.last_read = None;
    }
}

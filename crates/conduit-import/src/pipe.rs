//! Named-pipe transfer channels used by cross-database copies.
//!
//! A channel is keyed by the import's creation time and id. The writer
//! session on the source backend and the reader session on the destination
//! backend are named after it, so cancellation can find and kill them by
//! pattern without any in-process bookkeeping.

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use conduit_core::{config::TransferConfig, types::ImportId};
use tracing::{debug, warn};

/// Name shared by an import's pipe file and its backend sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferChannel(String);

impl TransferChannel {
    pub fn for_import(created_at: DateTime<Utc>, id: &ImportId) -> Self {
        Self(format!("{}_{}", created_at.timestamp(), id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the FIFO inside the transfer directory.
    pub fn file_name(&self) -> String {
        format!("pipe_{}", self.0)
    }

    /// Session name of the destination-side process reading the pipe.
    pub fn reader_name(&self) -> String {
        format!("pipe_{}_r", self.0)
    }

    /// Session name of the source-side process writing the pipe.
    pub fn writer_name(&self) -> String {
        format!("pipe_{}_w", self.0)
    }

    /// LIKE pattern matching the reader session.
    pub fn reader_pattern(&self) -> String {
        format!("pipe%_{}_r", self.0)
    }

    /// LIKE pattern matching the writer session.
    pub fn writer_pattern(&self) -> String {
        format!("pipe%_{}_w", self.0)
    }
}

impl std::fmt::Display for TransferChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The configured directory pipes are created in, if any.
#[derive(Debug, Clone, Default)]
pub struct TransferDir {
    dir: Option<PathBuf>,
}

impl TransferDir {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        if !config.is_configured() {
            return Self::default();
        }
        Self {
            dir: config.data_dir.as_deref().map(PathBuf::from),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Create the FIFO for `channel`, replacing a stale one.
    ///
    /// The returned guard removes the file when dropped.
    pub fn create_pipe(&self, channel: &TransferChannel) -> crate::error::Result<NamedPipe> {
        let dir = self
            .dir
            .as_deref()
            .ok_or(crate::error::ImportError::TransferNotConfigured)?;
        let path = dir.join(channel.file_name());
        match std::fs::remove_file(&path) {
            Ok(()) => warn!(path = %path.display(), "removed stale transfer pipe"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        mkfifo(&path)?;
        debug!(path = %path.display(), "transfer pipe created");
        Ok(NamedPipe { path })
    }

    /// Find the pipe file for `channel`, tolerating prefix variations
    /// (`pipe*_<channel>`).
    pub fn locate(&self, channel: &TransferChannel) -> Option<PathBuf> {
        let dir = self.dir.as_deref()?;
        let escaped = glob::Pattern::escape(&dir.to_string_lossy());
        let pattern = format!("{}/pipe*_{}", escaped, glob::Pattern::escape(channel.as_str()));
        glob::glob(&pattern).ok()?.filter_map(|entry| entry.ok()).next()
    }

    /// Remove the pipe for `channel` if it exists.
    ///
    /// Returns the removed path, or `None` when there was nothing to remove
    /// (including when no transfer directory is configured).
    pub fn remove(&self, channel: &TransferChannel) -> io::Result<Option<PathBuf>> {
        let Some(path) = self.locate(channel) else {
            return Ok(None);
        };
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(Some(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A FIFO on disk, removed when dropped.
#[derive(Debug)]
pub struct NamedPipe {
    path: PathBuf,
}

impl NamedPipe {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "transfer pipe removed"),
            // Cancellation may already have removed it.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "failed to remove transfer pipe: {e}"),
        }
    }
}

#[cfg(unix)]
fn mkfifo(path: &Path) -> io::Result<()> {
    use std::{ffi::CString, os::unix::ffi::OsStrExt};

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // Safety: c_path is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666 as libc::mode_t) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn mkfifo(_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "named pipes require a unix host",
    ))
}

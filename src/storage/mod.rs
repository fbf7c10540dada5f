//! Flat waveform-file storage.
//!
//! Files are addressed by their display name, e.g. `/audio_12345.wav`, which
//! maps onto `<root>/audio_12345.wav`.  Two families of files exist:
//!
//! | Prefix   | Written by          | Timestamp                |
//! |----------|---------------------|--------------------------|
//! | `audio_` | recording           | ms stamp at start        |
//! | `tts_`   | synthesis download  | ms stamp at start        |
//!
//! Stamps only ever grow within one storage root, even across restarts:
//! [`Storage::create_stamped`] never hands out a stamp at or below one that
//! is already on disk, and no existing file is ever truncated.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Recording file prefix.
pub const RECORDING_PREFIX: &str = "audio_";
/// Synthesized-reply file prefix.
pub const REPLY_PREFIX: &str = "tts_";

const WAV_EXTENSION: &str = ".wav";

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("no recordings found")]
    NoRecordings,

    #[error("refusing to overwrite existing file {0}")]
    AlreadyExists(String),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        let name = || {
            path.file_name()
                .map(|n| format!("/{}", n.to_string_lossy()))
                .unwrap_or_else(|| path.display().to_string())
        };
        match source.kind() {
            std::io::ErrorKind::NotFound => return Self::NotFound(name()),
            std::io::ErrorKind::AlreadyExists => return Self::AlreadyExists(name()),
            _ => {}
        }
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Listing types
// ---------------------------------------------------------------------------

/// One regular file in the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Display name with leading `/`.
    pub name: String,
    pub size: u64,
}

/// Result of [`Storage::delete_all_audio`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub removed: Vec<String>,
    /// Files that matched but could not be removed.
    pub failed: Vec<String>,
    pub bytes_freed: u64,
}

impl DeleteReport {
    pub fn count(&self) -> usize {
        self.removed.len()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Handle on the storage root directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/<prefix><timestamp_ms>.wav`
    pub fn file_name(prefix: &str, timestamp_ms: u128) -> String {
        format!("/{prefix}{timestamp_ms}{WAV_EXTENSION}")
    }

    /// Filesystem path for a display name.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_start_matches('/'))
    }

    /// Create `name` for reading and writing.  Fails with
    /// [`StorageError::AlreadyExists`] rather than touching an existing file.
    pub fn create(&self, name: &str) -> Result<File, StorageError> {
        let path = self.path_of(name);
        OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))
    }

    /// Create a new `<prefix><stamp>.wav`, where the stamp is `timestamp_ms`
    /// raised above every stamp already in the root.
    pub fn create_stamped(
        &self,
        prefix: &str,
        timestamp_ms: u128,
    ) -> Result<(String, File), StorageError> {
        let stamp = match self.highest_stamp()? {
            Some(highest) if highest >= timestamp_ms => highest + 1,
            _ => timestamp_ms,
        };
        let name = Self::file_name(prefix, stamp);
        let file = self.create(&name)?;
        Ok((name, file))
    }

    /// Largest stamp on any recording or reply file.
    fn highest_stamp(&self) -> Result<Option<u128>, StorageError> {
        Ok(self
            .list()?
            .iter()
            .filter_map(|f| {
                parse_timestamp(&f.name, RECORDING_PREFIX)
                    .or_else(|| parse_timestamp(&f.name, REPLY_PREFIX))
            })
            .max())
    }

    pub fn open_read(&self, name: &str) -> Result<File, StorageError> {
        let path = self.path_of(name);
        File::open(&path).map_err(|e| StorageError::io(&path, e))
    }

    pub fn size_of(&self, name: &str) -> Result<u64, StorageError> {
        let path = self.path_of(name);
        fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| StorageError::io(&path, e))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    pub fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_of(name);
        fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))
    }

    /// Every regular file in the root, sorted by name.
    pub fn list(&self) -> Result<Vec<FileEntry>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::io(&self.root, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let meta = entry
                .metadata()
                .map_err(|e| StorageError::io(&entry.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            files.push(FileEntry {
                name: format!("/{}", entry.file_name().to_string_lossy()),
                size: meta.len(),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Newest recording, chosen by the timestamp embedded in its name.
    pub fn latest_recording(&self) -> Result<String, StorageError> {
        self.latest_with_prefix(RECORDING_PREFIX)?
            .ok_or(StorageError::NoRecordings)
    }

    fn latest_with_prefix(&self, prefix: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .list()?
            .into_iter()
            .filter_map(|f| parse_timestamp(&f.name, prefix).map(|ts| (ts, f.name)))
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, name)| name))
    }

    /// Remove every `.wav` file in the root.
    ///
    /// A file that cannot be removed is logged and recorded in
    /// [`DeleteReport::failed`]; the sweep carries on with the rest.
    pub fn delete_all_audio(&self) -> Result<DeleteReport, StorageError> {
        let mut report = DeleteReport::default();
        for file in self.list()? {
            if !file.name.ends_with(WAV_EXTENSION) {
                continue;
            }
            match self.remove(&file.name) {
                Ok(()) => {
                    log::debug!("deleted {} ({} bytes)", file.name, file.size);
                    report.bytes_freed += file.size;
                    report.removed.push(file.name);
                }
                Err(e) => {
                    log::warn!("could not delete {}: {e}", file.name);
                    report.failed.push(file.name);
                }
            }
        }
        Ok(report)
    }
}

/// `/audio_123.wav` with prefix `audio_` → `Some(123)`.
pub fn parse_timestamp(name: &str, prefix: &str) -> Option<u128> {
    name.trim_start_matches('/')
        .strip_prefix(prefix)?
        .strip_suffix(WAV_EXTENSION)?
        .parse()
        .ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

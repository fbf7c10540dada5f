//! Digital output line backends.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use super::{Level, RouterError};

/// A single binary output, driven synchronously.
pub trait DigitalOutput {
    fn name(&self) -> &str;

    fn set(&mut self, level: Level) -> Result<(), RouterError>;

    /// Last level written, if any.
    fn level(&self) -> Option<Level>;
}

/// Writes `1` / `0` to a file, e.g. a sysfs GPIO `value` attribute.
pub struct FileLine {
    name: String,
    path: PathBuf,
    level: Option<Level>,
}

impl FileLine {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            level: None,
        }
    }
}

impl DigitalOutput for FileLine {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&mut self, level: Level) -> Result<(), RouterError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| RouterError::Output {
                line: self.name.clone(),
                source: e,
            })?;
        file.write_all(level.as_bytes())
            .map_err(|e| RouterError::Output {
                line: self.name.clone(),
                source: e,
            })?;
        log::debug!("{} → {} ({})", self.name, level, self.path.display());
        self.level = Some(level);
        Ok(())
    }

    fn level(&self) -> Option<Level> {
        self.level
    }
}

/// Keeps the level in memory and logs every change.
pub struct LogLine {
    name: String,
    level: Option<Level>,
}

impl LogLine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: None,
        }
    }
}

impl DigitalOutput for LogLine {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&mut self, level: Level) -> Result<(), RouterError> {
        log::info!("output line {} → {}", self.name, level);
        self.level = Some(level);
        Ok(())
    }

    fn level(&self) -> Option<Level> {
        self.level
    }
}

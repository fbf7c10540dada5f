//! Audio device seams used by the block pump.
//!
//! [`AudioSource`] and [`AudioSink`] are deliberately small: the pump only
//! ever moves one fixed-size block of 16-bit mono samples at a time.  Host
//! backends live in [`super::capture`] and [`super::playback`].

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Audio peripheral failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    /// No usable device was found or it failed to initialise.
    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    /// Reading from the input device failed.
    #[error("audio read failed: {0}")]
    Read(String),

    /// Writing to the output device failed.
    #[error("audio write failed: {0}")]
    Write(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Blocking-with-timeout supplier of 16-bit mono samples.
pub trait AudioSource {
    /// Fill up to `buf.len()` samples, waiting at most `timeout`.
    ///
    /// Returns the number of samples written into `buf`; `0` means nothing
    /// arrived before the timeout and is not an error.
    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize, DeviceError>;

    /// Drop audio captured but not yet read, so the next read starts from
    /// the present.
    fn discard_pending(&mut self) {}
}

/// Consumer of 16-bit mono samples that blocks until the block is accepted.
pub trait AudioSink {
    fn write_block(&mut self, samples: &[i16]) -> Result<(), DeviceError>;
}

impl<T: AudioSource + ?Sized> AudioSource for Box<T> {
    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize, DeviceError> {
        (**self).read_block(buf, timeout)
    }

    fn discard_pending(&mut self) {
        (**self).discard_pending()
    }
}

impl<T: AudioSink + ?Sized> AudioSink for Box<T> {
    fn write_block(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        (**self).write_block(samples)
    }
}

// ---------------------------------------------------------------------------
// UnavailableDevice
// ---------------------------------------------------------------------------

/// Stand-in for a peripheral that failed to come up at boot.
///
/// Every call reports [`DeviceError::Unavailable`] so operations fail with a
/// status line instead of the appliance refusing to start.
#[derive(Debug, Clone)]
pub struct UnavailableDevice {
    reason: String,
}

impl UnavailableDevice {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AudioSource for UnavailableDevice {
    fn read_block(&mut self, _buf: &mut [i16], _timeout: Duration) -> Result<usize, DeviceError> {
        Err(DeviceError::Unavailable(self.reason.clone()))
    }
}

impl AudioSink for UnavailableDevice {
    fn write_block(&mut self, _samples: &[i16]) -> Result<(), DeviceError> {
        Err(DeviceError::Unavailable(self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Source that replays a fixed list of blocks, then reports timeouts.
///
/// `stale` blocks stand for audio already queued by the host; they are read
/// first unless [`AudioSource::discard_pending`] clears them.
#[cfg(test)]
pub struct ScriptedSource {
    stale: std::collections::VecDeque<Vec<i16>>,
    blocks: std::collections::VecDeque<Vec<i16>>,
}

#[cfg(test)]
impl ScriptedSource {
    pub fn new(blocks: Vec<Vec<i16>>) -> Self {
        Self {
            stale: Default::default(),
            blocks: blocks.into(),
        }
    }

    pub fn with_stale(mut self, blocks: Vec<Vec<i16>>) -> Self {
        self.stale = blocks.into();
        self
    }

    /// `count` blocks of `len` samples, each filled with its block number.
    pub fn counting(count: usize, len: usize) -> Self {
        Self::new((0..count).map(|b| vec![b as i16 + 1; len]).collect())
    }

    pub fn remaining(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
impl AudioSource for ScriptedSource {
    fn read_block(&mut self, buf: &mut [i16], _timeout: Duration) -> Result<usize, DeviceError> {
        match self.stale.pop_front().or_else(|| self.blocks.pop_front()) {
            Some(block) => {
                let n = block.len().min(buf.len());
                buf[..n].copy_from_slice(&block[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn discard_pending(&mut self) {
        self.stale.clear();
    }
}

/// Sink that records every sample, optionally failing after N blocks.
#[cfg(test)]
#[derive(Default)]
pub struct CollectingSink {
    pub samples: Vec<i16>,
    pub blocks: usize,
    pub fail_after: Option<usize>,
}

#[cfg(test)]
impl AudioSink for CollectingSink {
    fn write_block(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        if self.fail_after.is_some_and(|n| self.blocks >= n) {
            return Err(DeviceError::Write("speaker unplugged".into()));
        }
        self.samples.extend_from_slice(samples);
        self.blocks += 1;
        Ok(())
    }
}

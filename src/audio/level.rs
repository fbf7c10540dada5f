//! Input level metering for the operator status channel.
//!
//! Each captured block is reduced to its RMS amplitude and mapped onto a
//! 0–10 bar.  [`LevelMeter`] throttles the output so the status channel sees
//! at most one line per interval.

use std::time::Duration;

/// RMS value that maps to a full bar.
pub const FULL_SCALE_RMS: f32 = 4000.0;
/// Number of bar segments at full scale.
pub const MAX_LEVEL: u8 = 10;

/// Root-mean-square amplitude of a block of 16-bit samples.
///
/// Returns `0.0` for an empty block.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Map an RMS value linearly from `[0, 4000]` to `[0, 10]`, clamped.
pub fn map_level(rms: f32) -> u8 {
    if !rms.is_finite() || rms <= 0.0 {
        return 0;
    }
    let level = rms * f32::from(MAX_LEVEL) / FULL_SCALE_RMS;
    level.min(f32::from(MAX_LEVEL)) as u8
}

// ---------------------------------------------------------------------------
// LevelReading
// ---------------------------------------------------------------------------

/// One metering sample ready for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelReading {
    pub rms: f32,
    pub level: u8,
    pub recording: bool,
}

impl LevelReading {
    /// Render as a status line, e.g. `REC Audio: ████ (1650)`.
    pub fn render(&self) -> String {
        let prefix = if self.recording { "REC " } else { "    " };
        let bar = "█".repeat(usize::from(self.level.min(MAX_LEVEL)));
        format!("{prefix}Audio: {bar} ({:.0})", self.rms)
    }
}

// ---------------------------------------------------------------------------
// LevelMeter
// ---------------------------------------------------------------------------

/// Throttled meter: yields a [`LevelReading`] at most once per `interval`.
///
/// Quiet blocks (level ≤ 1) never produce a reading so background hiss does
/// not flood the console.
#[derive(Debug)]
pub struct LevelMeter {
    interval: Duration,
    last_emit: Option<Duration>,
}

impl LevelMeter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Observe one block captured at clock time `now`.
    pub fn observe(&mut self, samples: &[i16], now: Duration, recording: bool) -> Option<LevelReading> {
        let rms = rms(samples);
        let level = map_level(rms);
        if level <= 1 {
            return None;
        }
        if let Some(last) = self.last_emit {
            if now.saturating_sub(last) < self.interval {
                return None;
            }
        }
        self.last_emit = Some(now);
        Some(LevelReading {
            rms,
            level,
            recording,
        })
    }
}

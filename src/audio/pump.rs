//! Block pump: moves fixed-size PCM blocks between sources and sinks.
//!
//! ```text
//! microphone ──Capture::step──▶ WavWriter<File>        (recording)
//! File ──play_from_storage──▶ speaker                  (playback)
//! synthesize_tone_block ──play_tone──▶ speaker         (test tone)
//! ```
//!
//! Memory use is bounded by one block per transfer.  Long-running loops take
//! a `should_stop` predicate that is checked once per block; that is the
//! only cancellation point.

use std::io::{Read, Seek, SeekFrom, Write};
use std::time::Duration;

use thiserror::Error;

use super::device::{AudioSink, AudioSource, DeviceError};
use super::level::{LevelMeter, LevelReading};
use super::tone::{blocks_for_duration, synthesize_tone_block};
use super::wav::{WavError, WavWriter};
use super::AudioFormat;
use crate::clock::Clock;

// ---------------------------------------------------------------------------
// PumpError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("capture failed: {0}")]
    Capture(DeviceError),

    #[error("playback failed: {0}")]
    Playback(DeviceError),

    #[error(transparent)]
    Framing(#[from] WavError),

    #[error("storage read failed: {0}")]
    Read(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Tunables for one recording.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub block_samples: usize,
    pub duration_limit: Duration,
    pub read_timeout: Duration,
}

/// What happened during one [`Capture::step`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StepReport {
    /// Samples appended to the file in this step.
    pub samples: usize,
    /// Throttled level reading, if one is due.
    pub level: Option<LevelReading>,
    /// The recording has run for longer than its duration limit.
    pub limit_reached: bool,
}

/// Totals returned when a capture or playback ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub bytes: u64,
    pub blocks: u64,
    pub elapsed: Duration,
    /// Ended by the stop predicate rather than by the data running out.
    pub stopped_early: bool,
}

/// An in-progress recording into a waveform file.
///
/// The caller drives it one block at a time with [`step`](Self::step) and
/// ends it with [`finish`](Self::finish), which patches the header.
pub struct Capture<W: Write + Seek> {
    writer: WavWriter<W>,
    config: CaptureConfig,
    started_at: Duration,
    blocks: u64,
    buf: Vec<i16>,
}

impl<W: Write + Seek> Capture<W> {
    /// Reserve the header in `file` and start the duration clock at `now`.
    pub fn start(file: W, format: AudioFormat, config: CaptureConfig, now: Duration) -> Result<Self, PumpError> {
        Ok(Self {
            writer: WavWriter::new(file, format)?,
            config,
            started_at: now,
            blocks: 0,
            buf: vec![0; config.block_samples.max(1)],
        })
    }

    /// Read one block, meter it, append it, and check the duration limit.
    pub fn step(
        &mut self,
        source: &mut dyn AudioSource,
        clock: &dyn Clock,
        meter: &mut LevelMeter,
    ) -> Result<StepReport, PumpError> {
        let n = source
            .read_block(&mut self.buf, self.config.read_timeout)
            .map_err(PumpError::Capture)?;

        let mut report = StepReport::default();
        if n > 0 {
            let block = &self.buf[..n];
            report.level = meter.observe(block, clock.now(), true);
            self.writer.write_samples(block)?;
            self.blocks += 1;
            report.samples = n;
        }
        report.limit_reached = self.elapsed(clock) > self.config.duration_limit;
        Ok(report)
    }

    pub fn elapsed(&self, clock: &dyn Clock) -> Duration {
        clock.now().saturating_sub(self.started_at)
    }

    pub fn payload_len(&self) -> u64 {
        self.writer.payload_len()
    }

    /// Patch the header and close the file.
    pub fn finish(mut self, clock: &dyn Clock) -> Result<TransferSummary, PumpError> {
        let elapsed = self.elapsed(clock);
        let file = self.writer.finalize()?;
        drop(file);
        Ok(TransferSummary {
            bytes: self.writer.payload_len(),
            blocks: self.blocks,
            elapsed,
            stopped_early: false,
        })
    }
}

/// Record from `source` into `file` until the duration limit elapses or
/// `should_stop` returns `true`, then finalize the header.
///
/// Each iteration returns through `on_level` for metering, so the caller's
/// status channel stays live.
#[allow(clippy::too_many_arguments)]
pub fn capture_to_storage<W: Write + Seek>(
    source: &mut dyn AudioSource,
    file: W,
    format: AudioFormat,
    config: CaptureConfig,
    clock: &dyn Clock,
    meter: &mut LevelMeter,
    should_stop: &dyn Fn() -> bool,
    on_level: &mut dyn FnMut(LevelReading),
) -> Result<TransferSummary, PumpError> {
    let mut capture = Capture::start(file, format, config, clock.now())?;
    let mut stopped_early = false;
    loop {
        if should_stop() {
            stopped_early = true;
            break;
        }
        let report = capture.step(source, clock, meter)?;
        if let Some(level) = report.level {
            on_level(level);
        }
        if report.limit_reached {
            break;
        }
    }
    let mut summary = capture.finish(clock)?;
    summary.stopped_early = stopped_early;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// Stream 16-bit LE PCM from `source` (after skipping `skip_bytes`) to
/// `sink`, one block at a time.
///
/// Stops when the source is exhausted or `should_stop` returns `true`.  A
/// sink failure aborts with [`PumpError::Playback`].  A trailing odd byte is
/// dropped.
pub fn play_from_storage<R: Read + Seek>(
    source: &mut R,
    sink: &mut dyn AudioSink,
    skip_bytes: u64,
    block_samples: usize,
    clock: &dyn Clock,
    should_stop: &dyn Fn() -> bool,
) -> Result<TransferSummary, PumpError> {
    let started = clock.now();
    source.seek(SeekFrom::Start(skip_bytes))?;

    let block_bytes = block_samples.max(1) * 2;
    let mut bytes = vec![0u8; block_bytes];
    let mut samples: Vec<i16> = Vec::with_capacity(block_samples.max(1));
    let mut carry = 0usize;
    let mut summary = TransferSummary {
        bytes: 0,
        blocks: 0,
        elapsed: Duration::ZERO,
        stopped_early: false,
    };

    loop {
        if should_stop() {
            summary.stopped_early = true;
            break;
        }
        let read = read_full(source, &mut bytes[carry..])?;
        let filled = carry + read;
        let whole = filled / 2 * 2;
        if whole == 0 {
            if filled > 0 {
                log::debug!("playback: dropping trailing odd byte");
            }
            break;
        }

        samples.clear();
        samples.extend(
            bytes[..whole]
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        sink.write_block(&samples).map_err(PumpError::Playback)?;
        summary.bytes += whole as u64;
        summary.blocks += 1;

        carry = filled - whole;
        if carry > 0 {
            bytes[0] = bytes[whole];
        }
    }

    summary.elapsed = clock.now().saturating_sub(started);
    Ok(summary)
}

/// Tunables for the speaker test tone.
#[derive(Debug, Clone, Copy)]
pub struct ToneConfig {
    pub frequency_hz: f64,
    pub amplitude: f64,
    pub duration: Duration,
    pub block_samples: usize,
    pub sample_rate_hz: u32,
}

/// Play a phase-continuous sine tone until its duration is covered or
/// `should_stop` returns `true`.
pub fn play_tone(
    sink: &mut dyn AudioSink,
    tone: &ToneConfig,
    clock: &dyn Clock,
    should_stop: &dyn Fn() -> bool,
) -> Result<TransferSummary, PumpError> {
    let started = clock.now();
    let total_blocks = blocks_for_duration(
        tone.duration.as_millis() as u64,
        tone.sample_rate_hz,
        tone.block_samples,
    );
    let mut buf = vec![0i16; tone.block_samples];
    let mut summary = TransferSummary {
        bytes: 0,
        blocks: 0,
        elapsed: Duration::ZERO,
        stopped_early: false,
    };

    for block_index in 0..total_blocks {
        if should_stop() {
            summary.stopped_early = true;
            break;
        }
        synthesize_tone_block(
            &mut buf,
            tone.frequency_hz,
            tone.sample_rate_hz,
            block_index,
            tone.amplitude,
        );
        sink.write_block(&buf).map_err(PumpError::Playback)?;
        summary.blocks += 1;
        summary.bytes += (buf.len() * 2) as u64;
    }

    summary.elapsed = clock.now().saturating_sub(started);
    Ok(summary)
}

/// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{CollectingSink, ScriptedSource};
    use crate::audio::wav::{WavHeader, HEADER_LEN};
    use crate::clock::ManualClock;
    use std::cell::Cell;
    use std::io::Cursor;

    fn capture_config(limit_ms: u64) -> CaptureConfig {
        CaptureConfig {
            block_samples: 512,
            duration_limit: Duration::from_millis(limit_ms),
            read_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn three_blocks_produce_expected_file() {
        let clock = ManualClock::new();
        let mut meter = LevelMeter::new(Duration::from_millis(200));
        let mut source = ScriptedSource::counting(3, 512);

        let mut capture =
            Capture::start(Cursor::new(Vec::new()), AudioFormat::SPEECH, capture_config(10_000), clock.now())
                .unwrap();
        for _ in 0..3 {
            let report = capture.step(&mut source, &clock, &mut meter).unwrap();
            assert_eq!(report.samples, 512);
            assert!(!report.limit_reached);
        }
        let mut file = capture.writer.finalize().unwrap();
        file.set_position(0);
        let bytes = file.into_inner();

        assert_eq!(bytes.len(), 44 + 3 * 512 * 2);
        let header = WavHeader::parse(&bytes).unwrap();
        assert_eq!(header.data_len, 3 * 512 * 2);
    }

    #[test]
    fn capture_stops_at_duration_limit() {
        let clock = ManualClock::new();
        let mut meter = LevelMeter::new(Duration::from_millis(200));
        let mut source = ScriptedSource::counting(100, 512);

        let mut capture =
            Capture::start(Cursor::new(Vec::new()), AudioFormat::SPEECH, capture_config(64), clock.now())
                .unwrap();
        let mut steps = 0;
        loop {
            let report = capture.step(&mut source, &clock, &mut meter).unwrap();
            steps += 1;
            if report.limit_reached {
                break;
            }
            clock.advance(Duration::from_millis(32));
        }
        // 0, 32, 64 are within the limit; 96 exceeds it.
        assert_eq!(steps, 4);
        assert_eq!(capture.payload_len(), 4 * 512 * 2);
    }

    #[test]
    fn empty_reads_do_not_write() {
        let clock = ManualClock::new();
        let mut meter = LevelMeter::new(Duration::from_millis(200));
        let mut source = ScriptedSource::new(vec![]);
        let mut capture =
            Capture::start(Cursor::new(Vec::new()), AudioFormat::SPEECH, capture_config(1_000), clock.now())
                .unwrap();
        let report = capture.step(&mut source, &clock, &mut meter).unwrap();
        assert_eq!(report.samples, 0);
        assert_eq!(capture.payload_len(), 0);
    }

    #[test]
    fn capture_to_storage_honours_stop_predicate() {
        let clock = ManualClock::new();
        let mut meter = LevelMeter::new(Duration::from_millis(200));
        let mut source = ScriptedSource::counting(10, 512);
        let calls = Cell::new(0);
        let stop = || {
            calls.set(calls.get() + 1);
            calls.get() > 2
        };
        let mut levels = Vec::new();

        let summary = capture_to_storage(
            &mut source,
            Cursor::new(Vec::new()),
            AudioFormat::SPEECH,
            capture_config(60_000),
            &clock,
            &mut meter,
            &stop,
            &mut |r| levels.push(r),
        )
        .unwrap();

        assert!(summary.stopped_early);
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.bytes, 2 * 512 * 2);
        assert_eq!(source.remaining(), 8);
    }

    #[test]
    fn recorded_bytes_round_trip_through_playback() {
        let clock = ManualClock::new();
        let mut meter = LevelMeter::new(Duration::from_millis(200));
        let blocks: Vec<Vec<i16>> = (0..3)
            .map(|b| (0..512).map(|i| (b * 1000 + i) as i16 - 700).collect())
            .collect();
        let expected: Vec<i16> = blocks.concat();
        let mut source = ScriptedSource::new(blocks);

        let mut capture =
            Capture::start(Cursor::new(Vec::new()), AudioFormat::SPEECH, capture_config(10_000), clock.now())
                .unwrap();
        for _ in 0..3 {
            capture.step(&mut source, &clock, &mut meter).unwrap();
        }
        let mut file = capture.writer.finalize().unwrap();

        let mut sink = CollectingSink::default();
        let summary =
            play_from_storage(&mut file, &mut sink, HEADER_LEN as u64, 512, &clock, &|| false).unwrap();

        assert_eq!(sink.samples, expected);
        assert_eq!(summary.bytes, 3 * 512 * 2);
        assert_eq!(summary.blocks, 3);
        assert!(!summary.stopped_early);
    }

    #[test]
    fn playback_handles_partial_final_block_and_odd_byte() {
        let clock = ManualClock::new();
        let mut data = Vec::new();
        for s in [1i16, 2, 3, 4, 5] {
            data.extend_from_slice(&s.to_le_bytes());
        }
        data.push(0xAB);
        let mut sink = CollectingSink::default();
        let summary =
            play_from_storage(&mut Cursor::new(data), &mut sink, 0, 2, &clock, &|| false).unwrap();
        assert_eq!(sink.samples, vec![1, 2, 3, 4, 5]);
        assert_eq!(summary.blocks, 3);
        assert_eq!(summary.bytes, 10);
    }

    #[test]
    fn playback_stops_cooperatively() {
        let clock = ManualClock::new();
        let data = vec![0u8; 512 * 2 * 10];
        let mut sink = CollectingSink::default();
        let checks = Cell::new(0);
        let stop_after_two = || {
            checks.set(checks.get() + 1);
            checks.get() > 2
        };
        let summary =
            play_from_storage(&mut Cursor::new(data), &mut sink, 0, 512, &clock, &stop_after_two).unwrap();
        assert!(summary.stopped_early);
        assert_eq!(sink.blocks, 2);
    }

    #[test]
    fn sink_failure_aborts_playback() {
        let clock = ManualClock::new();
        let data = vec![0u8; 512 * 2 * 4];
        let mut sink = CollectingSink {
            fail_after: Some(1),
            ..Default::default()
        };
        let err = play_from_storage(&mut Cursor::new(data), &mut sink, 0, 512, &clock, &|| false)
            .unwrap_err();
        assert!(matches!(err, PumpError::Playback(DeviceError::Write(_))));
        assert_eq!(sink.blocks, 1);
    }

    #[test]
    fn tone_plays_requested_duration() {
        let clock = ManualClock::new();
        let mut sink = CollectingSink::default();
        let tone = ToneConfig {
            frequency_hz: 1000.0,
            amplitude: 8000.0,
            duration: Duration::from_millis(96),
            block_samples: 512,
            sample_rate_hz: 16_000,
        };
        let summary = play_tone(&mut sink, &tone, &clock, &|| false).unwrap();
        assert_eq!(summary.blocks, 3);
        assert_eq!(sink.samples.len(), 3 * 512);

        let mut reference = vec![0i16; 3 * 512];
        synthesize_tone_block(&mut reference, 1000.0, 16_000, 0, 8000.0);
        assert_eq!(sink.samples, reference);
    }
}

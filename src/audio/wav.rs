//! RIFF/WAVE framing for recordings and synthesized speech.
//!
//! The payload length of a recording is unknown until it ends, so files are
//! written in three steps:
//!
//! ```text
//! reserve_header   44 zero bytes at offset 0
//! write_*          PCM payload appended block by block
//! patch_header     seek(0), write the real 44-byte header
//! ```
//!
//! [`WavWriter`] bundles the three steps and tracks the payload length.
//!
//! # Header layout (all integers little-endian)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0  | 4 | `RIFF` |
//! | 4  | 4 | 36 + payload length |
//! | 8  | 4 | `WAVE` |
//! | 12 | 4 | `fmt ` |
//! | 16 | 4 | 16 (fmt chunk length) |
//! | 20 | 2 | 1 (linear PCM) |
//! | 22 | 2 | channels |
//! | 24 | 4 | sample rate |
//! | 28 | 4 | byte rate |
//! | 32 | 2 | block align |
//! | 34 | 2 | bits per sample |
//! | 36 | 4 | `data` |
//! | 40 | 4 | payload length |

use std::io::{Seek, SeekFrom, Write};

use thiserror::Error;

use super::AudioFormat;

/// Size of the fixed RIFF/WAVE header in bytes.
pub const HEADER_LEN: usize = 44;

const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;

// ---------------------------------------------------------------------------
// WavError
// ---------------------------------------------------------------------------

/// Failures while framing a waveform file.
#[derive(Debug, Error)]
pub enum WavError {
    /// The writer was already finalized; its file handle is gone.
    #[error("waveform file handle is no longer valid")]
    Detached,

    /// The payload exceeds what a 32-bit RIFF length can describe.
    #[error("payload of {0} bytes does not fit a RIFF header")]
    TooLarge(u64),

    #[error("waveform I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Header encoding
// ---------------------------------------------------------------------------

/// Encode the 44-byte header for `payload_len` bytes of PCM in `format`.
pub fn encode_header(format: &AudioFormat, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(36u32.wrapping_add(payload_len)).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    h[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
    h[22..24].copy_from_slice(&format.channel_count.to_le_bytes());
    h[24..28].copy_from_slice(&format.sample_rate_hz.to_le_bytes());
    h[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    h[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    h[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&payload_len.to_le_bytes());
    h
}

/// Write 44 placeholder zero bytes at the current (start) position.
pub fn reserve_header<W: Write>(file: &mut W) -> std::io::Result<()> {
    file.write_all(&[0u8; HEADER_LEN])
}

/// Seek to offset 0 and overwrite the placeholder with the real header.
///
/// The header is fully encoded before anything is written, so a length that
/// cannot be represented fails without touching the file.
pub fn patch_header<W: Write + Seek>(
    file: &mut W,
    format: &AudioFormat,
    payload_len: u64,
) -> Result<(), WavError> {
    let len = u32::try_from(payload_len)
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or(WavError::TooLarge(payload_len))?;
    let header = encode_header(format, len);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// WavHeader (read side)
// ---------------------------------------------------------------------------

/// Decoded header fields, used to describe files before playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub format: AudioFormat,
    pub riff_len: u32,
    pub data_len: u32,
}

impl WavHeader {
    /// Parse a canonical 44-byte PCM header.  Returns `None` for anything
    /// else, including a still-zeroed placeholder.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN
            || &bytes[0..4] != b"RIFF"
            || &bytes[8..12] != b"WAVE"
            || &bytes[12..16] != b"fmt "
            || &bytes[36..40] != b"data"
        {
            return None;
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        Some(Self {
            format: AudioFormat {
                sample_rate_hz: u32_at(24),
                bits_per_sample: u16_at(34),
                channel_count: u16_at(22),
            },
            riff_len: u32_at(4),
            data_len: u32_at(40),
        })
    }
}

// ---------------------------------------------------------------------------
// WavWriter
// ---------------------------------------------------------------------------

/// Streaming writer: reserves the header on creation, appends PCM, and
/// patches the header exactly once in [`finalize`](Self::finalize).
pub struct WavWriter<W: Write + Seek> {
    inner: Option<W>,
    format: AudioFormat,
    payload_len: u64,
    scratch: Vec<u8>,
}

impl<W: Write + Seek> WavWriter<W> {
    /// Reserve the header region in `inner` and start a new payload.
    pub fn new(mut inner: W, format: AudioFormat) -> Result<Self, WavError> {
        reserve_header(&mut inner)?;
        Ok(Self {
            inner: Some(inner),
            format,
            payload_len: 0,
            scratch: Vec::new(),
        })
    }

    /// Append 16-bit samples as little-endian bytes.
    pub fn write_samples(&mut self, samples: &[i16]) -> Result<(), WavError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        pcm_to_le_bytes(samples, &mut scratch);
        let result = self.write_bytes(&scratch);
        self.scratch = scratch;
        result
    }

    /// Append raw payload bytes (already in the file's sample format).
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WavError> {
        let file = self.inner.as_mut().ok_or(WavError::Detached)?;
        file.write_all(bytes)?;
        self.payload_len += bytes.len() as u64;
        Ok(())
    }

    /// Payload bytes written so far.
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Patch the header with the final payload length and hand back the
    /// underlying file.  A second call reports [`WavError::Detached`].
    pub fn finalize(&mut self) -> Result<W, WavError> {
        let mut file = self.inner.take().ok_or(WavError::Detached)?;
        patch_header(&mut file, &self.format, self.payload_len)?;
        Ok(file)
    }
}

/// Append `samples` to `out` as 16-bit little-endian PCM.
pub fn pcm_to_le_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Audio subsystem: devices, WAV framing, level metering and the block pump.
//!
//! # Data flow
//!
//! ```text
//! Microphone → cpal callback → downmix/resample → CpalMicrophone (AudioSource)
//!           → Capture::step → WavWriter<File>
//!
//! File → play_from_storage ─┐
//! synthesize_tone_block ────┴→ CpalSpeaker (AudioSink) → upmix/resample → cpal
//! ```
//!
//! Everything between the device seams works on 16 kHz, 16-bit mono PCM
//! ([`AudioFormat::SPEECH`]).  Host rate and channel conversion happens only
//! inside the cpal backends.

pub mod capture;
pub mod device;
pub mod format;
pub mod level;
pub mod playback;
pub mod pump;
pub mod resample;
pub mod tone;
pub mod wav;

pub use capture::CpalMicrophone;
pub use device::{AudioSink, AudioSource, DeviceError, UnavailableDevice};
pub use format::AudioFormat;
pub use level::{LevelMeter, LevelReading};
pub use playback::CpalSpeaker;
pub use pump::{
    capture_to_storage, play_from_storage, play_tone, Capture, CaptureConfig, PumpError,
    StepReport, ToneConfig, TransferSummary,
};
pub use wav::{WavError, WavHeader, WavWriter, HEADER_LEN};

//! talkbox: a voice-interaction appliance.
//!
//! Records speech to WAV files, uploads it to a speech-to-text service,
//! routes the transcript to a digital output line or an AI text service, and
//! plays back a synthesized spoken reply.

pub mod ai;
pub mod audio;
pub mod clock;
pub mod config;
pub mod extract;
pub mod net;
pub mod router;
pub mod session;
pub mod storage;

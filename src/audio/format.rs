//! PCM sample format shared by recordings and synthesized speech.

/// Sample format of a recording or synthesis session.
///
/// Fixed for the lifetime of a session; the appliance always uses
/// [`AudioFormat::SPEECH`] (16 kHz, 16-bit, mono).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
    pub channel_count: u16,
}

impl AudioFormat {
    /// 16 kHz / 16-bit / mono linear PCM.
    pub const SPEECH: AudioFormat = AudioFormat {
        sample_rate_hz: 16_000,
        bits_per_sample: 16,
        channel_count: 1,
    };

    /// Bytes in one frame (one sample per channel).
    pub fn block_align(&self) -> u16 {
        self.channel_count * (self.bits_per_sample / 8)
    }

    /// Bytes per second of audio.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate_hz * u32::from(self.block_align())
    }

    /// Duration in milliseconds of `payload_bytes` of audio in this format.
    pub fn duration_ms(&self, payload_bytes: u64) -> u64 {
        let rate = u64::from(self.byte_rate());
        if rate == 0 {
            return 0;
        }
        payload_bytes * 1000 / rate
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::SPEECH
    }
}

//! Sine test-tone generator.

use std::f64::consts::PI;

/// Fill `buffer` with block `block_index` of a continuous sine tone.
///
/// Phase is derived from the global sample index
/// `block_index * buffer.len() + i`, so consecutive blocks join without a
/// discontinuity.  Samples are `amplitude * sin(2π f n / rate)`, truncated to
/// `i16`.
pub fn synthesize_tone_block(
    buffer: &mut [i16],
    frequency_hz: f64,
    sample_rate_hz: u32,
    block_index: u64,
    amplitude: f64,
) {
    if sample_rate_hz == 0 {
        buffer.fill(0);
        return;
    }
    let block_samples = buffer.len() as u64;
    let rate = f64::from(sample_rate_hz);
    for (i, sample) in buffer.iter_mut().enumerate() {
        let n = block_index * block_samples + i as u64;
        let value = (2.0 * PI * frequency_hz * n as f64 / rate).sin() * amplitude;
        *sample = value.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    }
}

/// Number of blocks of `block_samples` needed to cover `duration_ms`.
pub fn blocks_for_duration(duration_ms: u64, sample_rate_hz: u32, block_samples: usize) -> u64 {
    if block_samples == 0 {
        return 0;
    }
    let samples = duration_ms * u64::from(sample_rate_hz) / 1000;
    samples.div_ceil(block_samples as u64)
}

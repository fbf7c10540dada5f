//! Sample-rate and channel adaptation between host devices and 16 kHz mono.
//!
//! Host sound cards rarely run at 16 kHz mono.  The cpal backends use these
//! helpers on the way in (device rate/channels → 16 kHz mono `i16`) and on
//! the way out (16 kHz mono `i16` → device rate/channels).
//!
//! Resampling is linear interpolation, which is adequate for speech.

// ---------------------------------------------------------------------------
// Channel mixing
// ---------------------------------------------------------------------------

/// Average interleaved channels down to mono.
///
/// * `channels == 1` returns the input unchanged.
/// * `channels == 0` returns an empty vector.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Duplicate each mono sample across `channels` interleaved outputs.
pub fn upmix_from_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let n = channels.max(1) as usize;
    let mut out = Vec::with_capacity(samples.len() * n);
    for &s in samples {
        out.extend(std::iter::repeat(s).take(n));
    }
    out
}

// ---------------------------------------------------------------------------
// Rate conversion
// ---------------------------------------------------------------------------

/// Resample `samples` from `from_rate` to `to_rate` Hz by linear
/// interpolation.
///
/// Equal rates (or an empty input) return the input unchanged.  The output
/// length is `ceil(len * to_rate / from_rate)`.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };
        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Sample conversion
// ---------------------------------------------------------------------------

/// `[-1.0, 1.0]` float to 16-bit PCM, saturating.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// 16-bit PCM to `[-1.0, 1.0]` float.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

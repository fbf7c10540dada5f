//! Microphone input via `cpal`.
//!
//! [`CpalMicrophone`] wraps the cpal host/device/stream lifecycle and exposes
//! it as a blocking-with-timeout [`AudioSource`].  The cpal callback converts
//! each hardware buffer to 16 kHz mono `i16` and forwards it over a bounded
//! mpsc channel; `read_block` assembles fixed-size blocks from that channel.
//! When nobody reads for a while the callback drops buffers instead of
//! queueing them.
//!
//! The stream stops when the microphone is dropped.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use super::device::{AudioSource, DeviceError};
use super::resample::{downmix_to_mono, f32_to_i16, resample_linear};
use super::AudioFormat;

/// Hardware buffers held for the reader before the callback starts dropping.
const QUEUE_CHUNKS: usize = 32;

/// Default input device delivering 16 kHz mono blocks.
pub struct CpalMicrophone {
    rx: mpsc::Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    /// Native device rate in Hz.
    device_rate: u32,
    /// Native interleaved channel count.
    device_channels: u16,
    _stream: cpal::Stream,
}

impl CpalMicrophone {
    /// Open the default input device and start streaming.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Unavailable`] when there is no input device or the
    /// platform rejects the stream.
    pub fn open(target: AudioFormat) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| DeviceError::Unavailable("no input device on the default host".into()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::Unavailable(format!("input config: {e}")))?;

        let sample_format = supported.sample_format();
        let device_channels = supported.channels();
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::sync_channel::<Vec<i16>>(QUEUE_CHUNKS);
        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, target, tx)?,
            cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, target, tx)?,
            cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, target, tx)?,
            other => {
                return Err(DeviceError::Unavailable(format!(
                    "unsupported input sample format {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| DeviceError::Unavailable(format!("start input stream: {e}")))?;

        log::info!("microphone open ({device_rate} Hz, {device_channels} ch → {} Hz mono)", target.sample_rate_hz);

        Ok(Self {
            rx,
            pending: VecDeque::new(),
            device_rate,
            device_channels,
            _stream: stream,
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    pub fn device_channels(&self) -> u16 {
        self.device_channels
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    target: AudioFormat,
    tx: mpsc::SyncSender<Vec<i16>>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels;
    let rate = config.sample_rate.0;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
                let mono = downmix_to_mono(&floats, channels);
                let resampled = resample_linear(&mono, rate, target.sample_rate_hz);
                let block: Vec<i16> = resampled.into_iter().map(f32_to_i16).collect();
                // Full: nobody is reading.  Disconnected: shutting down.
                let _ = tx.try_send(block);
            },
            |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
            },
            None,
        )
        .map_err(|e| DeviceError::Unavailable(format!("build input stream: {e}")))
}

impl AudioSource for CpalMicrophone {
    fn read_block(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize, DeviceError> {
        let deadline = Instant::now() + timeout;
        while self.pending.len() < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(DeviceError::Read("input stream closed".into()));
                }
            }
        }
        let n = self.pending.len().min(buf.len());
        for (slot, sample) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }

    fn discard_pending(&mut self) {
        let mut dropped = self.pending.len();
        self.pending.clear();
        while let Ok(chunk) = self.rx.try_recv() {
            dropped += chunk.len();
        }
        log::trace!("discarded {dropped} queued samples");
    }
}

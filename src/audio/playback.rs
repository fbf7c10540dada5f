//! Speaker output via `cpal`.
//!
//! The output callback pulls interleaved `f32` frames from a bounded channel
//! and plays silence when it runs dry.  [`CpalSpeaker::write_block`] blocks
//! while the channel is full, which paces the caller at roughly real time.

use std::collections::VecDeque;
use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};

use super::device::{AudioSink, DeviceError};
use super::resample::{i16_to_f32, resample_linear, upmix_from_mono};
use super::AudioFormat;

/// Blocks queued ahead of the hardware before `write_block` blocks.
const QUEUE_DEPTH: usize = 4;

/// Default output device fed with 16 kHz mono blocks.
pub struct CpalSpeaker {
    tx: mpsc::SyncSender<Vec<f32>>,
    source_rate: u32,
    device_rate: u32,
    device_channels: u16,
    _stream: cpal::Stream,
}

impl CpalSpeaker {
    /// Open the default output device and start the (initially silent)
    /// stream.
    pub fn open(source: AudioFormat) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DeviceError::Unavailable("no output device on the default host".into()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| DeviceError::Unavailable(format!("output config: {e}")))?;

        let sample_format = supported.sample_format();
        let device_channels = supported.channels();
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::sync_channel::<Vec<f32>>(QUEUE_DEPTH);
        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, rx)?,
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, rx)?,
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, rx)?,
            other => {
                return Err(DeviceError::Unavailable(format!(
                    "unsupported output sample format {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| DeviceError::Unavailable(format!("start output stream: {e}")))?;

        log::info!("speaker open ({device_rate} Hz, {device_channels} ch)");

        Ok(Self {
            tx,
            source_rate: source.sample_rate_hz,
            device_rate,
            device_channels,
            _stream: stream,
        })
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: mpsc::Receiver<Vec<f32>>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut queued: VecDeque<f32> = VecDeque::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                while queued.len() < data.len() {
                    match rx.try_recv() {
                        Ok(chunk) => queued.extend(chunk),
                        Err(_) => break,
                    }
                }
                for slot in data.iter_mut() {
                    *slot = T::from_sample(queued.pop_front().unwrap_or(0.0));
                }
            },
            |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
            },
            None,
        )
        .map_err(|e| DeviceError::Unavailable(format!("build output stream: {e}")))
}

impl AudioSink for CpalSpeaker {
    fn write_block(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        let floats: Vec<f32> = samples.iter().map(|&s| i16_to_f32(s)).collect();
        let resampled = resample_linear(&floats, self.source_rate, self.device_rate);
        let frames = upmix_from_mono(&resampled, self.device_channels);
        self.tx
            .send(frames)
            .map_err(|_| DeviceError::Write("output stream closed".into()))
    }
}

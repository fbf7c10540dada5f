//! Text-to-speech download client.
//!
//! The reply is raw linear PCM after a normal status/header block and runs
//! until the service closes the connection.  It is framed straight into a new
//! `tts_<ms>.wav` file one chunk at a time.

use std::fs::File;
use std::io::{Seek, Write};
use std::sync::Arc;
use std::time::Duration;

use super::connection::{Connection, Connector, ReadOutcome};
use super::request::{header_end, target, RequestHead, StatusLine};
use super::NetError;
use crate::audio::{AudioFormat, WavWriter};
use crate::clock::Clock;
use crate::config::SynthesisConfig;
use crate::storage::{Storage, REPLY_PREFIX};

/// Upper bound on the status + header block.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// A synthesized reply stored as a waveform file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechReply {
    /// Storage name, e.g. `/tts_52013.wav`.
    pub name: String,
    pub payload_bytes: u64,
    pub elapsed: Duration,
}

pub struct SynthesisClient {
    config: SynthesisConfig,
    connector: Arc<dyn Connector>,
}

impl SynthesisClient {
    pub fn new(config: SynthesisConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn autoplay(&self) -> bool {
        self.config.autoplay
    }

    /// Request speech for `text` and store it in a new file.
    ///
    /// Always uses a fresh connection and closes it afterwards.  A reply
    /// with no payload leaves no file behind and reports
    /// [`NetError::EmptyResult`].
    pub fn synthesize(
        &self,
        text: &str,
        storage: &Storage,
        format: AudioFormat,
        clock: &dyn Clock,
    ) -> Result<SpeechReply, NetError> {
        log::info!("connecting to {}:{}", self.config.host, self.config.port);
        let mut conn = self.connector.connect(&self.config.host, self.config.port)?;
        let result = self.exchange(conn.as_mut(), text, storage, format, clock);
        conn.close();
        result
    }

    fn exchange(
        &self,
        conn: &mut dyn Connection,
        text: &str,
        storage: &Storage,
        format: AudioFormat,
        clock: &dyn Clock,
    ) -> Result<SpeechReply, NetError> {
        let body = serde_json::json!({ "text": text }).to_string();
        let query = query_for(&self.config.query, format);
        let head = RequestHead::post(&self.config.host, target(&self.config.path, &query))
            .header("Authorization", format!("Token {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "audio/*")
            .header("Connection", "close")
            .content_length(body.len() as u64);
        conn.write_all(head.encode().as_bytes())?;
        conn.write_all(body.as_bytes())?;

        let started = clock.now();
        let deadline = started + Duration::from_millis(self.config.timeout_ms);
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        let (status, leftover) = self.read_head(conn, clock, deadline, interval)?;
        if !status.is_success() {
            return Err(NetError::ExternalService(format!(
                "{} {}",
                status.code, status.reason
            )));
        }

        let (name, file) = storage.create_stamped(REPLY_PREFIX, clock.millis())?;
        let mut writer = match WavWriter::new(file, format) {
            Ok(writer) => writer,
            Err(e) => {
                discard_reply(storage, &name);
                return Err(e.into());
            }
        };

        match self.read_payload(conn, &mut writer, &leftover, clock, deadline, interval) {
            Ok(()) if writer.payload_len() > 0 => {
                let payload_bytes = writer.payload_len();
                seal_reply(&mut writer, storage, &name)?;
                let elapsed = clock.now().saturating_sub(started);
                log::info!("stored {name} ({payload_bytes} bytes PCM)");
                Ok(SpeechReply {
                    name,
                    payload_bytes,
                    elapsed,
                })
            }
            Ok(()) => {
                drop(writer);
                storage.remove(&name)?;
                Err(NetError::EmptyResult)
            }
            Err(e) => {
                drop(writer);
                discard_reply(storage, &name);
                Err(e)
            }
        }
    }

    /// Read until the blank line ending the header block.
    ///
    /// Returns the parsed status line and any payload bytes that arrived in
    /// the same read as the header end.
    fn read_head(
        &self,
        conn: &mut dyn Connection,
        clock: &dyn Clock,
        deadline: Duration,
        interval: Duration,
    ) -> Result<(StatusLine, Vec<u8>), NetError> {
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; self.config.chunk_bytes.max(1)];
        let end = loop {
            if let Some(end) = header_end(&buf) {
                break end;
            }
            if buf.len() > MAX_HEADER_BYTES {
                return Err(NetError::MalformedResponse(format!(
                    "no end of headers within {MAX_HEADER_BYTES} bytes"
                )));
            }
            match conn.try_read(&mut chunk)? {
                ReadOutcome::Data(n) => buf.extend_from_slice(&chunk[..n]),
                ReadOutcome::Closed => {
                    return Err(NetError::MalformedResponse(
                        "connection closed before headers completed".into(),
                    ))
                }
                ReadOutcome::Idle => {
                    if clock.now() >= deadline {
                        return Err(NetError::ProtocolTimeout {
                            waited_ms: self.config.timeout_ms,
                            received: buf.len(),
                        });
                    }
                    clock.sleep(interval);
                }
            }
        };

        let head = String::from_utf8_lossy(&buf[..end]);
        let first = head.lines().next().unwrap_or("");
        let status = StatusLine::parse(first)
            .ok_or_else(|| NetError::MalformedResponse(format!("bad status line {first:?}")))?;
        log::debug!("synthesis status {} {}", status.code, status.reason);
        Ok((status, buf[end..].to_vec()))
    }

    /// Append payload until the peer disconnects or the deadline passes.
    fn read_payload(
        &self,
        conn: &mut dyn Connection,
        writer: &mut WavWriter<File>,
        leftover: &[u8],
        clock: &dyn Clock,
        deadline: Duration,
        interval: Duration,
    ) -> Result<(), NetError> {
        if !leftover.is_empty() {
            writer.write_bytes(leftover)?;
        }
        let mut chunk = vec![0u8; self.config.chunk_bytes.max(1)];
        loop {
            match conn.try_read(&mut chunk)? {
                ReadOutcome::Data(n) => writer.write_bytes(&chunk[..n])?,
                ReadOutcome::Closed => return Ok(()),
                ReadOutcome::Idle if !conn.is_connected() => return Ok(()),
                ReadOutcome::Idle => {
                    if clock.now() >= deadline {
                        log::warn!(
                            "synthesis timed out after {} ms, keeping {} bytes",
                            self.config.timeout_ms,
                            writer.payload_len()
                        );
                        return Ok(());
                    }
                    clock.sleep(interval);
                }
            }
        }
    }
}

/// The configured query with `sample_rate` set to the rate files are framed
/// at, so the header always describes the PCM that follows it.
fn query_for(configured: &str, format: AudioFormat) -> String {
    let mut params: Vec<String> = configured
        .split('&')
        .filter(|p| !p.is_empty() && !p.starts_with("sample_rate="))
        .map(str::to_owned)
        .collect();
    params.push(format!("sample_rate={}", format.sample_rate_hz));
    params.join("&")
}

/// Patch the header of a complete reply.  On failure the file is removed.
fn seal_reply<W: Write + Seek>(
    writer: &mut WavWriter<W>,
    storage: &Storage,
    name: &str,
) -> Result<(), NetError> {
    if let Err(e) = writer.finalize() {
        discard_reply(storage, name);
        return Err(e.into());
    }
    Ok(())
}

fn discard_reply(storage: &Storage, name: &str) {
    if let Err(rm) = storage.remove(name) {
        log::warn!("could not remove partial {name}: {rm}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

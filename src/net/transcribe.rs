//! Speech-to-text upload client.

use std::io::Read;
use std::sync::Arc;

use super::connection::{Connection, Connector};
use super::poll::{drain_pending, has_closing_brace, poll_response, PollStatus};
use super::request::{target, RequestHead, StatusLine};
use super::NetError;
use crate::clock::Clock;
use crate::config::TranscriptionConfig;
use crate::extract::extract_scalar_field;
use crate::storage::Storage;

/// Key searched for in the service reply.
pub const TRANSCRIPT_KEY: &str = "\"transcript\":";

/// Uploads stored recordings and returns the recognised text.
///
/// Holds at most one connection; it is reused only while still connected and
/// closed at the end of every exchange.
pub struct TranscriptionClient {
    config: TranscriptionConfig,
    connector: Arc<dyn Connector>,
    conn: Option<Box<dyn Connection>>,
}

impl TranscriptionClient {
    pub fn new(config: TranscriptionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            conn: None,
        }
    }

    /// Upload `name` from `storage` and return the transcript.
    ///
    /// An empty or missing transcript is `Ok("")`.  A poll timeout still
    /// returns whatever text the partial buffer yields; only a timeout with
    /// nothing extractable is [`NetError::ProtocolTimeout`].
    pub fn transcribe(
        &mut self,
        storage: &Storage,
        name: &str,
        clock: &dyn Clock,
    ) -> Result<String, NetError> {
        let body_len = storage.size_of(name)?;
        let file = storage.open_read(name)?;

        self.ensure_connected()?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(NetError::Disconnected);
        };

        let result = exchange(conn.as_mut(), &self.config, file, body_len, clock);
        conn.close();
        result
    }

    fn ensure_connected(&mut self) -> Result<(), NetError> {
        if self.conn.as_ref().is_some_and(|c| c.is_connected()) {
            log::debug!("reusing open connection to {}", self.config.host);
            return Ok(());
        }
        log::info!("connecting to {}:{}", self.config.host, self.config.port);
        self.conn = Some(self.connector.connect(&self.config.host, self.config.port)?);
        Ok(())
    }
}

fn exchange(
    conn: &mut dyn Connection,
    config: &TranscriptionConfig,
    mut body: impl Read,
    body_len: u64,
    clock: &dyn Clock,
) -> Result<String, NetError> {
    drain_pending(conn)?;

    let head = RequestHead::post(&config.host, target(&config.path, &config.query))
        .header("Authorization", format!("Token {}", config.api_key))
        .header("Content-Type", "audio/wav")
        .content_length(body_len);
    conn.write_all(head.encode().as_bytes())?;

    let mut chunk = vec![0u8; config.chunk_bytes.max(1)];
    let mut sent = 0u64;
    loop {
        let n = body.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        conn.write_all(&chunk[..n])?;
        sent += n as u64;
    }
    if sent != body_len {
        log::warn!("uploaded {sent} bytes, declared {body_len}");
    }
    log::info!("uploaded {sent} bytes, waiting for transcript");

    let outcome = poll_response(
        conn,
        clock,
        std::time::Duration::from_millis(config.timeout_ms),
        std::time::Duration::from_millis(config.poll_interval_ms),
        &has_closing_brace,
    )?;

    let text = String::from_utf8_lossy(&outcome.body);
    if let Some(status) = text.lines().next().and_then(StatusLine::parse) {
        if !status.is_success() {
            return Err(NetError::ExternalService(format!(
                "{} {}",
                status.code, status.reason
            )));
        }
    }

    let transcript = extract_scalar_field(&text, TRANSCRIPT_KEY);
    match outcome.status {
        PollStatus::Complete => {}
        PollStatus::Closed if outcome.body.is_empty() => return Err(NetError::Disconnected),
        PollStatus::Closed => log::debug!("peer closed after {} bytes", outcome.body.len()),
        PollStatus::TimedOut if transcript.is_empty() => {
            return Err(NetError::ProtocolTimeout {
                waited_ms: outcome.elapsed.as_millis() as u64,
                received: outcome.body.len(),
            });
        }
        PollStatus::TimedOut => {
            log::warn!("transcript taken from an incomplete response");
        }
    }
    Ok(transcript)
}

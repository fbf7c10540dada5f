//! Streaming protocol clients for the speech services.
//!
//! # Exchanges
//!
//! ```text
//! Transcription                         Synthesis
//! ─────────────                         ─────────
//! connect (reuse if open)               connect (always fresh)
//! drain stale bytes                     request line + headers + JSON body
//! request line + headers                read header lines until blank line
//! body ← storage file, 1 KiB chunks     check status 200
//! poll until '}' or timeout             payload → tts_<ms>.wav until close
//! close                                 patch header, close
//! extract "transcript":
//! ```
//!
//! Both clients work against the [`Connection`] seam and an injected
//! [`Clock`](crate::clock::Clock); [`TlsConnector`] is the production
//! transport.

pub mod connection;
pub mod poll;
pub mod request;
pub mod synthesize;
pub mod tls;
pub mod transcribe;

use thiserror::Error;

use crate::audio::WavError;
use crate::storage::StorageError;

pub use connection::{Connection, Connector, ReadOutcome};
pub use poll::{drain_pending, poll_response, PollOutcome, PollStatus};
pub use request::{RequestHead, StatusLine};
pub use synthesize::{SpeechReply, SynthesisClient};
pub use tls::TlsConnector;
pub use transcribe::TranscriptionClient;

// ---------------------------------------------------------------------------
// NetError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NetError {
    #[error("cannot connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("network I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    Disconnected,

    /// The response did not complete in time and nothing usable arrived.
    #[error("no complete response after {waited_ms} ms ({received} bytes received)")]
    ProtocolTimeout { waited_ms: u64, received: usize },

    /// The service answered with something other than success.
    #[error("service rejected the request: {0}")]
    ExternalService(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The exchange succeeded but carried no content.
    #[error("service returned no content")]
    EmptyResult,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Framing(#[from] WavError),
}

//! Byte-stream connection seam.
//!
//! The protocol clients only need four things from a socket: write bytes,
//! read whatever is available without blocking for long, ask whether the
//! peer is still there, and close.  [`super::tls::TlsConnector`] provides the
//! real implementation; tests use [`ScriptedConnection`].

use super::NetError;

/// Result of one non-blocking-ish read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the buffer.
    Data(usize),
    /// Nothing available right now; the connection is still open.
    Idle,
    /// The peer closed the stream.
    Closed,
}

/// An open, ordered byte stream to a remote service.
pub trait Connection {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), NetError>;

    /// Read what is available, waiting at most a short, implementation
    /// defined interval.
    fn try_read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, NetError>;

    fn is_connected(&self) -> bool;

    /// Close the stream.  Closing twice is harmless.
    fn close(&mut self);
}

/// Opens connections to `host:port`.
pub trait Connector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, NetError>;
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use scripted::{ScriptedConnection, ScriptedConnector, Wire};

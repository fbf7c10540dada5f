//! Poll-with-timeout response assembly.

use std::time::Duration;

use super::connection::{Connection, ReadOutcome};
use super::NetError;
use crate::clock::Clock;

const READ_CHUNK: usize = 1024;

/// Why [`poll_response`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The completeness predicate accepted the buffer.
    Complete,
    /// The deadline passed first.
    TimedOut,
    /// The peer closed the stream first.
    Closed,
}

#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub body: Vec<u8>,
    pub status: PollStatus,
    pub elapsed: Duration,
}

/// Heuristic completeness test for a JSON reply: any closing brace.
pub fn has_closing_brace(buf: &[u8]) -> bool {
    buf.contains(&b'}')
}

/// Accumulate bytes from `conn` until `is_complete` accepts the buffer, the
/// peer closes, or `timeout` elapses on `clock`.
///
/// While nothing is available the loop sleeps for `interval` between reads.
pub fn poll_response(
    conn: &mut dyn Connection,
    clock: &dyn Clock,
    timeout: Duration,
    interval: Duration,
    is_complete: &dyn Fn(&[u8]) -> bool,
) -> Result<PollOutcome, NetError> {
    let started = clock.now();
    let deadline = started + timeout;
    let mut body = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    let status = loop {
        match conn.try_read(&mut chunk)? {
            ReadOutcome::Data(n) => {
                body.extend_from_slice(&chunk[..n]);
                if is_complete(&body) {
                    break PollStatus::Complete;
                }
            }
            ReadOutcome::Closed => break PollStatus::Closed,
            ReadOutcome::Idle => {
                if clock.now() >= deadline {
                    break PollStatus::TimedOut;
                }
                clock.sleep(interval);
                continue;
            }
        }
        if clock.now() >= deadline {
            break PollStatus::TimedOut;
        }
    };

    let elapsed = clock.now().saturating_sub(started);
    log::debug!("poll finished: {status:?} after {} ms, {} bytes", elapsed.as_millis(), body.len());
    Ok(PollOutcome {
        body,
        status,
        elapsed,
    })
}

/// Discard bytes already pending on a reused connection.
///
/// Returns the number of bytes dropped.
pub fn drain_pending(conn: &mut dyn Connection) -> Result<usize, NetError> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut dropped = 0;
    while let ReadOutcome::Data(n) = conn.try_read(&mut chunk)? {
        dropped += n;
    }
    if dropped > 0 {
        log::debug!("drained {dropped} stale bytes");
    }
    Ok(dropped)
}

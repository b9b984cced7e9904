//! Quiescence collector: reads from an ingestion cursor until the stream
//! goes quiet for the configured window or the hard deadline passes.

use std::time::Duration;

use tokio::time::Instant;

use crate::pty::OutputRing;

/// Collect from `cursor` until no new bytes arrive for `quiescence` or
/// `max_wait` elapses. The quiescence window arms on the first byte; with no
/// bytes at all the full `max_wait` is spent and the result is empty. The
/// cursor is advanced past everything returned.
pub async fn collect(
    ring: &OutputRing,
    cursor: &mut u64,
    quiescence: Duration,
    max_wait: Duration,
) -> Vec<u8> {
    let hard_deadline = Instant::now() + max_wait;
    let mut out = Vec::new();
    let mut last_data = Instant::now();

    loop {
        let (bytes, next) = ring.read_from(*cursor);
        if !bytes.is_empty() {
            *cursor = next;
            out.extend_from_slice(&bytes);
            last_data = Instant::now();
        }
        if ring.is_closed() {
            break;
        }

        let deadline = if out.is_empty() {
            hard_deadline
        } else {
            hard_deadline.min(last_data + quiescence)
        };
        if Instant::now() >= deadline {
            break;
        }
        if !ring.wait_for_change(*cursor, deadline).await {
            break;
        }
    }

    out
}

/// Wait at most `max_wait` for any new byte; drain whatever is available and
/// return it, or empty on a quiet deadline. Never writes to the PTY.
pub async fn poll(ring: &OutputRing, cursor: &mut u64, max_wait: Duration) -> Vec<u8> {
    let deadline = Instant::now() + max_wait;

    let (bytes, next) = ring.read_from(*cursor);
    if !bytes.is_empty() {
        *cursor = next;
        return bytes;
    }
    if ring.wait_for_change(*cursor, deadline).await {
        let (bytes, next) = ring.read_from(*cursor);
        *cursor = next;
        return bytes;
    }
    Vec::new()
}

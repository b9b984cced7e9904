//! Bounded ingestion ring with per-consumer cursors.
//!
//! Bytes are appended in arrival order by the ingestion worker; consumers
//! hold a monotonic offset and read "new since cursor". When capacity is
//! exceeded the oldest bytes are discarded; durability past the ring is the
//! transcript's job.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio::time::Instant;

struct RingInner {
    buf: VecDeque<u8>,
    /// Absolute offset of `buf[0]` within the whole byte stream.
    start: u64,
}

pub struct OutputRing {
    inner: Mutex<RingInner>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
                start: 0,
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Append a chunk and wake waiters. Oldest bytes are evicted once the
    /// ring exceeds capacity.
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.buf.extend(bytes);
            let excess = inner.buf.len().saturating_sub(self.capacity);
            if excess > 0 {
                inner.buf.drain(..excess);
                inner.start += excess as u64;
            }
        }
        self.notify.notify_waiters();
    }

    /// Absolute offset one past the newest byte.
    pub fn end_offset(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.start + inner.buf.len() as u64
    }

    /// Copy everything at or after `cursor`, returning the advanced cursor.
    /// A cursor that fell behind eviction is clamped to the oldest retained
    /// byte.
    pub fn read_from(&self, cursor: u64) -> (Vec<u8>, u64) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let end = inner.start + inner.buf.len() as u64;
        let from = cursor.clamp(inner.start, end);
        let skip = (from - inner.start) as usize;
        let bytes: Vec<u8> = inner.buf.iter().skip(skip).copied().collect();
        (bytes, end)
    }

    /// Mark the stream finished (EOF or termination) and release waiters.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until bytes exist beyond `cursor`, the ring closes, or the
    /// deadline passes. Returns true unless the wait timed out with nothing
    /// new.
    pub async fn wait_for_change(&self, cursor: u64, deadline: Instant) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            if self.end_offset() > cursor || self.is_closed() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if tokio::time::timeout(deadline - now, &mut notified)
                .await
                .is_err()
            {
                return self.end_offset() > cursor || self.is_closed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn append_then_read_from_cursor() {
        let ring = OutputRing::new(1024);
        ring.append(b"hello ");
        ring.append(b"world");
        let (bytes, cursor) = ring.read_from(0);
        assert_eq!(bytes, b"hello world");
        assert_eq!(cursor, 11);
        let (bytes, cursor) = ring.read_from(cursor);
        assert!(bytes.is_empty());
        assert_eq!(cursor, 11);
    }

    #[test]
    fn no_byte_observed_twice() {
        let ring = OutputRing::new(1024);
        ring.append(b"abc");
        let (_, cursor) = ring.read_from(0);
        ring.append(b"def");
        let (bytes, _) = ring.read_from(cursor);
        assert_eq!(bytes, b"def");
    }

    #[test]
    fn eviction_clamps_slow_cursor() {
        let ring = OutputRing::new(8);
        ring.append(b"0123456789abcdef");
        let (bytes, cursor) = ring.read_from(0);
        assert_eq!(bytes, b"89abcdef");
        assert_eq!(cursor, 16);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_wakes_on_append() {
        let ring = Arc::new(OutputRing::new(1024));
        let writer = Arc::clone(&ring);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer.append(b"x");
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(ring.wait_for_change(0, deadline).await);
        assert_eq!(ring.read_from(0).0, b"x");
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out_quietly() {
        let ring = OutputRing::new(1024);
        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(!ring.wait_for_change(0, deadline).await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_releases_waiter() {
        let ring = Arc::new(OutputRing::new(1024));
        let closer = Arc::clone(&ring);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(ring.wait_for_change(0, deadline).await);
        assert!(ring.is_closed());
    }
}

//! Ingestion worker: drains the PTY and drives every sink forward.
//!
//! For each chunk, in order: transcript, emulator, ring, activity clock. The
//! ring is appended last so that by the time a waiter wakes, the transcript
//! and emulator already contain the same prefix of the stream.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::pty::OutputRing;
use crate::term::Emulator;
use crate::transcript::TranscriptStore;

const READ_BUF_SIZE: usize = 4096;

/// Flags and clocks shared between the ingestion worker and tool callers.
pub struct SessionShared {
    terminated: AtomicBool,
    eof: AtomicBool,
    last_activity_ms: AtomicI64,
    created_ms: i64,
}

impl SessionShared {
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            terminated: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            last_activity_ms: AtomicI64::new(now),
            created_ms: now,
        }
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn set_eof(&self) {
        self.eof.store(true, Ordering::SeqCst);
    }

    /// Returns true when this call flipped the flag.
    pub fn set_terminated(&self) -> bool {
        !self.terminated.swap(true, Ordering::SeqCst)
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn created_ms(&self) -> i64 {
        self.created_ms
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::SeqCst)
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a chunk is fed into, in causal order.
pub struct IngestSinks {
    pub emulator: Arc<Mutex<Emulator>>,
    pub ring: Arc<OutputRing>,
    pub transcript: Arc<TranscriptStore>,
    pub shared: Arc<SessionShared>,
}

/// Spawn the per-session worker that blocks on the PTY until end-of-file.
/// The blocking read is released by closing the channel (child exit or
/// termination tears the master down, which ends the read).
pub fn spawn_ingest(
    session_id: String,
    mut reader: Box<dyn Read + Send>,
    sinks: IngestSinks,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(session = %session_id, "pty end-of-file");
                    break;
                }
                Ok(n) => {
                    let chunk = &buf[..n];
                    if let Err(e) = sinks.transcript.append_raw(chunk) {
                        warn!(session = %session_id, error = %e, "transcript write failed");
                    }
                    {
                        let mut em = sinks.emulator.lock().unwrap_or_else(|e| e.into_inner());
                        em.feed(chunk);
                    }
                    sinks.ring.append(chunk);
                    sinks.shared.touch();
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Linux reports EIO on the master once the child side is
                    // gone; either way the stream is over.
                    debug!(session = %session_id, error = %e, "pty read ended");
                    break;
                }
            }
        }

        sinks.shared.set_eof();
        if !sinks.shared.is_terminated() {
            sinks.transcript.record_end("eof");
        }
        sinks.ring.close();
        debug!(session = %session_id, "ingestion worker exited");
    })
}

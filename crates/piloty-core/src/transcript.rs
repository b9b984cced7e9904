//! On-disk session logs.
//!
//! Layout under the configured root:
//! - `sessions/<id>/transcript.log`: raw PTY bytes, append-only
//! - `sessions/<id>/interaction.log`: `<iso8601> <direction> <payload>` lines
//! - `sessions/<id>/session.json`: metadata snapshot, rewritten on events
//! - `active/<id>`: symlink to the session directory while live
//!
//! Password sends are recorded as a redaction marker; the secret never
//! reaches the interaction log or the metadata file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What the interaction log shows in place of a secret payload.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Direction of an interaction-log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client input written to the PTY.
    In,
    /// Output collected for a client response.
    Out,
    /// Lifecycle marker (`eof`, `terminated`).
    End,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::End => "end",
        }
    }
}

/// Metadata snapshot persisted as `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub created: String,
    pub ended: Option<String>,
    pub cwd: String,
    pub tag: Option<String>,
    pub pid: Option<u32>,
    pub rows: u16,
    pub cols: u16,
}

pub struct TranscriptStore {
    dir: PathBuf,
    active_link: PathBuf,
    transcript: Mutex<File>,
    interaction: Mutex<File>,
    meta: Mutex<SessionMeta>,
}

impl TranscriptStore {
    /// Create the session directory, open both logs, write the initial
    /// metadata snapshot, and place the `active/<id>` symlink (best effort).
    pub fn create(root: &Path, meta: SessionMeta) -> std::io::Result<Self> {
        let dir = root.join("sessions").join(&meta.session_id);
        let active_dir = root.join("active");
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(&active_dir)?;

        let transcript = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("transcript.log"))?;
        let interaction = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("interaction.log"))?;

        let active_link = active_dir.join(&meta.session_id);
        place_symlink(&dir, &active_link);

        let store = Self {
            dir,
            active_link,
            transcript: Mutex::new(transcript),
            interaction: Mutex::new(interaction),
            meta: Mutex::new(meta),
        };
        store.write_meta();
        Ok(store)
    }

    /// Append raw PTY output bytes.
    pub fn append_raw(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(bytes)
    }

    /// Append one structured interaction record. Newlines in the payload are
    /// escaped so each record stays a single line.
    pub fn log_interaction(&self, direction: Direction, payload: &str) {
        let escaped = payload.replace('\\', "\\\\").replace('\n', "\\n").replace('\r', "\\r");
        let line = format!(
            "{} {} {}\n",
            Utc::now().to_rfc3339(),
            direction.as_str(),
            escaped
        );
        let mut file = self.interaction.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(error = %e, "interaction log write failed");
        }
    }

    /// Record a password send without the secret.
    pub fn log_redacted_input(&self) {
        self.log_interaction(Direction::In, REDACTION_MARKER);
    }

    /// Update the tag and rewrite `session.json`.
    pub fn set_tag(&self, tag: Option<String>) {
        {
            let mut meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
            meta.tag = tag;
        }
        self.write_meta();
    }

    /// Mark the session over: stamp `ended`, log the lifecycle record, and
    /// drop the `active/<id>` symlink. Only the first call takes effect.
    pub fn record_end(&self, reason: &str) {
        {
            let mut meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
            if meta.ended.is_some() {
                return;
            }
            meta.ended = Some(Utc::now().to_rfc3339());
        }
        self.log_interaction(Direction::End, reason);
        self.write_meta();
        if self.active_link.symlink_metadata().is_ok() {
            let _ = std::fs::remove_file(&self.active_link);
        }
        debug!(dir = %self.dir.display(), reason = reason, "session logs finalized");
    }

    pub fn meta(&self) -> SessionMeta {
        self.meta.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join("transcript.log")
    }

    fn write_meta(&self) {
        let meta = self.meta.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let path = self.dir.join("session.json");
        match serde_json::to_vec_pretty(&meta) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), error = %e, "session.json write failed");
                }
            }
            Err(e) => warn!(error = %e, "session.json serialize failed"),
        }
    }
}

#[cfg(unix)]
fn place_symlink(target: &Path, link: &Path) {
    if link.symlink_metadata().is_ok() {
        let _ = std::fs::remove_file(link);
    }
    if let Err(e) = std::os::unix::fs::symlink(target, link) {
        debug!(link = %link.display(), error = %e, "active symlink not created");
    }
}

#[cfg(not(unix))]
fn place_symlink(_target: &Path, _link: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> SessionMeta {
        SessionMeta {
            session_id: id.to_string(),
            created: Utc::now().to_rfc3339(),
            ended: None,
            cwd: "/tmp".to_string(),
            tag: None,
            pid: Some(4242),
            rows: 24,
            cols: 80,
        }
    }

    #[test]
    fn creates_layout_and_metadata() {
        let root = tempfile::tempdir().unwrap();
        let store = TranscriptStore::create(root.path(), meta("s1")).unwrap();

        assert!(store.transcript_path().exists());
        assert!(store.dir().join("interaction.log").exists());
        let json = std::fs::read_to_string(store.dir().join("session.json")).unwrap();
        let parsed: SessionMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, "s1");
        assert_eq!(parsed.pid, Some(4242));
        assert!(parsed.ended.is_none());

        #[cfg(unix)]
        assert!(root.path().join("active").join("s1").symlink_metadata().is_ok());
    }

    #[test]
    fn raw_bytes_appended_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let store = TranscriptStore::create(root.path(), meta("s2")).unwrap();
        store.append_raw(b"\x1b[1mbold\x1b[0m\r\n").unwrap();
        store.append_raw(b"more").unwrap();
        let raw = std::fs::read(store.transcript_path()).unwrap();
        assert_eq!(raw, b"\x1b[1mbold\x1b[0m\r\nmore");
    }

    #[test]
    fn interaction_records_are_single_lines() {
        let root = tempfile::tempdir().unwrap();
        let store = TranscriptStore::create(root.path(), meta("s3")).unwrap();
        store.log_interaction(Direction::In, "echo hi\n");
        store.log_interaction(Direction::Out, "hi");
        let log = std::fs::read_to_string(store.dir().join("interaction.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" in echo hi\\n"));
        assert!(lines[1].contains(" out hi"));
    }

    #[test]
    fn password_is_redacted_everywhere() {
        let root = tempfile::tempdir().unwrap();
        let store = TranscriptStore::create(root.path(), meta("s4")).unwrap();
        store.log_redacted_input();
        store.record_end("terminated");

        let log = std::fs::read_to_string(store.dir().join("interaction.log")).unwrap();
        assert!(log.contains(REDACTION_MARKER));
        assert!(!log.contains("hunter2"));
        let json = std::fs::read_to_string(store.dir().join("session.json")).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn record_end_is_idempotent_and_removes_symlink() {
        let root = tempfile::tempdir().unwrap();
        let store = TranscriptStore::create(root.path(), meta("s5")).unwrap();
        store.record_end("eof");
        let first = store.meta().ended.clone().unwrap();
        store.record_end("terminated");
        assert_eq!(store.meta().ended.unwrap(), first);

        let log = std::fs::read_to_string(store.dir().join("interaction.log")).unwrap();
        assert_eq!(log.lines().filter(|l| l.contains(" end ")).count(), 1);

        #[cfg(unix)]
        assert!(root
            .path()
            .join("active")
            .join("s5")
            .symlink_metadata()
            .is_err());
    }
}

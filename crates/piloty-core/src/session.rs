//! One live session: a shell on a PTY, its emulator, ring, transcript, and
//! the semantic layer, exposing the operations surfaced to tools.
//!
//! All input-producing operations serialize on the session's operation lock,
//! so concurrent tool calls never interleave their PTY writes. The ingestion
//! worker runs independently and keeps appending while an operation waits
//! for quiescence.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PilotyError, Result};
use crate::pty::{
    collect, poll, signal_from_name, spawn_ingest, IngestSinks, OutputRing, PtyChannel, PtyOpen,
    SessionShared,
};
use crate::semantic::{
    PromptDetector, PromptKind, ScreenObservation, SessionStatus, StateClassifier, StateSampler,
};
use crate::term::Emulator;
use crate::text::{parse_jobs, strip_ansi, JobInfo};
use crate::transcript::{Direction, SessionMeta, TranscriptStore, REDACTION_MARKER};

/// Uniform response shape returned by every tool operation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub status: SessionStatus,
    /// Incremental text since the caller's last ingestion point.
    pub output: String,
    /// The current rendered screen.
    pub screen: String,
    /// Short human-readable justification for `status`.
    pub state_reason: String,
}

/// Metadata snapshot for `get_metadata` and registry listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub id: String,
    pub cwd: String,
    pub tag: Option<String>,
    pub created: String,
    pub ended: Option<String>,
    pub last_activity_ms: i64,
    pub pid: Option<u32>,
    pub rows: u16,
    pub cols: u16,
    pub terminated: bool,
    pub eof: bool,
    pub prompt_override: Option<String>,
    pub transcript_dir: String,
    pub renderer_healthy: bool,
}

/// What the interaction log records for an input write.
enum InputRecord<'a> {
    Plain(&'a str),
    Redacted,
}

struct OpState {
    /// The tool surface's ingestion cursor; advanced by every collect.
    cursor: u64,
}

pub struct Session {
    id: String,
    config: Config,
    channel: Arc<PtyChannel>,
    emulator: Arc<StdMutex<Emulator>>,
    ring: Arc<OutputRing>,
    transcript: Arc<TranscriptStore>,
    shared: Arc<SessionShared>,
    op: AsyncMutex<OpState>,
    prompt: StdMutex<PromptDetector>,
    classifier: StateClassifier,
    _ingest: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Spawn the shell, wire up the sinks, and start the ingestion worker.
    /// Must run inside a tokio runtime. On failure nothing is registered.
    pub(crate) fn spawn(
        id: &str,
        cwd: Option<PathBuf>,
        config: Config,
        sampler: Option<Arc<dyn StateSampler>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let cwd = cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));

        let channel = Arc::new(PtyChannel::open(&PtyOpen {
            argv: config.shell.clone(),
            cwd: cwd.clone(),
            env: Vec::new(),
            rows: config.rows,
            cols: config.cols,
        })?);

        let transcript = match TranscriptStore::create(
            &config.root,
            SessionMeta {
                session_id: id.to_string(),
                created: Utc::now().to_rfc3339(),
                ended: None,
                cwd: cwd.display().to_string(),
                tag: None,
                pid: channel.pid(),
                rows: config.rows,
                cols: config.cols,
            },
        ) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                channel.close();
                return Err(PilotyError::Io(e));
            }
        };

        let emulator = Arc::new(StdMutex::new(Emulator::new(
            config.rows,
            config.cols,
            config.scrollback_lines,
        )));
        let ring = Arc::new(OutputRing::new(config.ring_capacity));
        let shared = Arc::new(SessionShared::new());

        let reader = channel.take_reader().ok_or_else(|| {
            PilotyError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pty reader unavailable",
            ))
        })?;
        let ingest = spawn_ingest(
            id.to_string(),
            reader,
            IngestSinks {
                emulator: Arc::clone(&emulator),
                ring: Arc::clone(&ring),
                transcript: Arc::clone(&transcript),
                shared: Arc::clone(&shared),
            },
        );

        let classifier = match sampler {
            Some(s) => StateClassifier::with_sampler(s),
            None => StateClassifier::new(),
        };

        info!(session = %id, pid = ?channel.pid(), cwd = %cwd.display(), "session started");

        Ok(Arc::new(Self {
            id: id.to_string(),
            config,
            channel,
            emulator,
            ring,
            transcript,
            shared,
            op: AsyncMutex::new(OpState { cursor: 0 }),
            prompt: StdMutex::new(PromptDetector::new()),
            classifier,
            _ingest: ingest,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    // ========== Input operations ==========

    /// Write `command` plus a newline, then collect until quiescence.
    pub async fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
        strip: bool,
    ) -> Result<ToolResponse> {
        let mut bytes = command.as_bytes().to_vec();
        bytes.push(b'\n');
        self.write_and_collect(&bytes, InputRecord::Plain(command), timeout, strip, false)
            .await
    }

    /// Write text verbatim, with no appended newline.
    pub async fn send_input(
        &self,
        text: &str,
        timeout: Option<Duration>,
        strip: bool,
    ) -> Result<ToolResponse> {
        self.write_and_collect(text.as_bytes(), InputRecord::Plain(text), timeout, strip, false)
            .await
    }

    /// Translate a control-key mnemonic (`c`, `d`, `z`, `l`, `[`) and send
    /// the matching byte.
    pub async fn send_control(
        &self,
        key: &str,
        timeout: Option<Duration>,
        strip: bool,
    ) -> Result<ToolResponse> {
        let byte = control_byte(key)?;
        let label = format!("^{}", key.to_ascii_uppercase());
        self.write_and_collect(&[byte], InputRecord::Plain(&label), timeout, strip, false)
            .await
    }

    /// Write the password plus newline. The structured log records only a
    /// redaction marker, and the collected echo is not logged either;
    /// terminal echo suppression is the PTY's concern, so the raw transcript
    /// still carries whatever the terminal echoed.
    pub async fn send_password(
        &self,
        password: &str,
        timeout: Option<Duration>,
    ) -> Result<ToolResponse> {
        let mut bytes = password.as_bytes().to_vec();
        bytes.push(b'\n');
        self.write_and_collect(&bytes, InputRecord::Redacted, timeout, false, true)
            .await
    }

    /// Deliver an OS signal to the terminal's foreground process group.
    pub async fn send_signal(&self, name: &str) -> Result<ToolResponse> {
        let sig = signal_from_name(name)?;
        let _op = self.op.lock().await;
        if self.shared.is_terminated() {
            return Ok(self.lifecycle_response(SessionStatus::Terminated));
        }
        if self.shared.is_eof() {
            return Ok(self.lifecycle_response(SessionStatus::Eof));
        }
        self.channel.signal(sig)?;
        self.transcript
            .log_interaction(Direction::In, &format!("signal {sig}"));
        debug!(session = %self.id, signal = %sig, "signal delivered");
        drop(_op);
        Ok(self.view_response())
    }

    // ========== Collect-only operations ==========

    /// Drain available output without sending input.
    pub async fn poll_output(&self, timeout: Option<Duration>) -> Result<ToolResponse> {
        let mut op = self.op.lock().await;
        if self.shared.is_terminated() {
            return Ok(self.lifecycle_response(SessionStatus::Terminated));
        }
        let max_wait = timeout.unwrap_or(self.config.max_wait);
        let collected = poll(&self.ring, &mut op.cursor, max_wait).await;
        drop(op);
        Ok(self.finish_response(collected, false, false))
    }

    /// Wait until `pattern` matches the rendered scrollback+screen view.
    /// Matching is against rendered text, so escape bytes cannot spoof it.
    pub async fn expect(&self, pattern: &str, timeout: Option<Duration>) -> Result<ToolResponse> {
        let re = Regex::new(pattern)
            .map_err(|e| PilotyError::InvalidArgument(format!("bad expect pattern: {e}")))?;
        self.wait_for(timeout, &format!("pattern `{pattern}`"), |session| {
            let em = session.emulator.lock().unwrap_or_else(|e| e.into_inner());
            re.is_match(&em.rendered_text())
        })
        .await
    }

    /// Wait until the prompt detector reports a shell prompt.
    pub async fn expect_prompt(&self, timeout: Option<Duration>) -> Result<ToolResponse> {
        self.wait_for(timeout, "shell prompt", |session| {
            let lines = {
                let em = session.emulator.lock().unwrap_or_else(|e| e.into_inner());
                em.visible_lines()
            };
            let prompt = session.prompt.lock().unwrap_or_else(|e| e.into_inner());
            prompt.classify(&lines) == PromptKind::Shell
        })
        .await
    }

    // ========== View-only operations ==========

    /// Current rendered screen plus classification; consumes nothing.
    pub fn get_screen(&self) -> ToolResponse {
        self.view_response()
    }

    /// Up to the most recent `n` scrollback lines, oldest first.
    pub fn get_scrollback(&self, n: usize) -> Vec<String> {
        let em = self.emulator.lock().unwrap_or_else(|e| e.into_inner());
        em.scrollback(n)
    }

    /// Drop scrollback history; the visible screen is untouched.
    pub fn clear_scrollback(&self) {
        let mut em = self.emulator.lock().unwrap_or_else(|e| e.into_inner());
        em.clear_scrollback();
    }

    pub fn get_metadata(&self) -> SessionMetadata {
        let meta = self.transcript.meta();
        let (prompt_override, healthy) = {
            let prompt = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
            let em = self.emulator.lock().unwrap_or_else(|e| e.into_inner());
            (prompt.override_pattern(), em.is_healthy())
        };
        SessionMetadata {
            id: self.id.clone(),
            cwd: meta.cwd,
            tag: meta.tag,
            created: meta.created,
            ended: meta.ended,
            last_activity_ms: self.shared.last_activity_ms(),
            pid: self.channel.pid(),
            rows: meta.rows,
            cols: meta.cols,
            terminated: self.shared.is_terminated(),
            eof: self.shared.is_eof(),
            prompt_override,
            transcript_dir: self.transcript.dir().display().to_string(),
            renderer_healthy: healthy,
        }
    }

    /// Set the human tag and/or the prompt-override regex.
    pub fn configure(&self, tag: Option<String>, prompt_regex: Option<String>) -> Result<()> {
        if let Some(pattern) = prompt_regex {
            let mut prompt = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
            prompt.set_override(&pattern)?;
        }
        if let Some(tag) = tag {
            self.transcript.set_tag(Some(tag));
        }
        Ok(())
    }

    pub fn transcript_dir(&self) -> PathBuf {
        self.transcript.dir().to_path_buf()
    }

    /// Run `jobs -l` through the normal path and parse the job table.
    pub async fn check_jobs(&self, timeout: Option<Duration>) -> Result<Vec<JobInfo>> {
        let resp = self.run("jobs -l", timeout, true).await?;
        if resp.status == SessionStatus::Terminated {
            return Err(PilotyError::Terminated(self.id.clone()));
        }
        Ok(parse_jobs(&resp.output))
    }

    // ========== Lifecycle ==========

    /// Irrevocable. Releases any in-flight waiter with `terminated`, tears
    /// the channel down, and finalizes the logs.
    pub async fn terminate(&self) -> ToolResponse {
        if self.shared.set_terminated() {
            info!(session = %self.id, "terminating session");
            self.ring.close();
            let channel = Arc::clone(&self.channel);
            let _ = tokio::task::spawn_blocking(move || channel.close()).await;
            self.transcript.record_end("terminated");
        }
        self.lifecycle_response(SessionStatus::Terminated)
    }

    /// Last rendered screen, used by the registry when caching a sentinel.
    pub(crate) fn last_screen(&self) -> String {
        let em = self.emulator.lock().unwrap_or_else(|e| e.into_inner());
        em.screen_text()
    }

    // ========== Internals ==========

    async fn write_and_collect(
        &self,
        bytes: &[u8],
        record: InputRecord<'_>,
        timeout: Option<Duration>,
        strip: bool,
        redact_output: bool,
    ) -> Result<ToolResponse> {
        let mut op = self.op.lock().await;
        if self.shared.is_terminated() {
            return Ok(self.lifecycle_response(SessionStatus::Terminated));
        }
        if self.shared.is_eof() {
            return Ok(self.lifecycle_response(SessionStatus::Eof));
        }

        match record {
            InputRecord::Plain(payload) => self.transcript.log_interaction(Direction::In, payload),
            InputRecord::Redacted => self.transcript.log_redacted_input(),
        }
        if let Err(e) = self.channel.write_all(bytes) {
            warn!(session = %self.id, error = %e, "pty write failed, closing session");
            self.fail_channel();
            return Err(e);
        }
        self.shared.touch();

        let max_wait = timeout.unwrap_or(self.config.max_wait);
        let collected = collect(&self.ring, &mut op.cursor, self.config.quiescence, max_wait).await;
        drop(op);
        Ok(self.finish_response(collected, strip, redact_output))
    }

    /// Shared loop for `expect`/`expect_prompt`: re-scan the rendered view
    /// after each arrival until the condition holds or the deadline passes.
    async fn wait_for<F>(
        &self,
        timeout: Option<Duration>,
        what: &str,
        condition: F,
    ) -> Result<ToolResponse>
    where
        F: Fn(&Self) -> bool,
    {
        let mut op = self.op.lock().await;
        if self.shared.is_terminated() {
            return Ok(self.lifecycle_response(SessionStatus::Terminated));
        }
        let deadline = Instant::now() + timeout.unwrap_or(self.config.max_wait);
        let mut out = Vec::new();
        let matched = loop {
            let (bytes, next) = self.ring.read_from(op.cursor);
            if !bytes.is_empty() {
                op.cursor = next;
                out.extend_from_slice(&bytes);
            }
            if condition(self) {
                break true;
            }
            if self.shared.is_terminated()
                || self.shared.is_eof()
                || Instant::now() >= deadline
            {
                break false;
            }
            self.ring.wait_for_change(op.cursor, deadline).await;
        };
        drop(op);

        let mut resp = self.finish_response(out, false, false);
        if matched {
            resp.state_reason = format!("found {what}; {}", resp.state_reason);
        } else if !matches!(
            resp.status,
            SessionStatus::Terminated | SessionStatus::Eof
        ) {
            resp.state_reason = format!("deadline passed without {what}; {}", resp.state_reason);
        }
        Ok(resp)
    }

    fn finish_response(&self, raw: Vec<u8>, strip: bool, redact_output: bool) -> ToolResponse {
        let saw_output = !raw.is_empty();
        let text = String::from_utf8_lossy(&raw).into_owned();
        let output = if strip { strip_ansi(&text) } else { text };
        if saw_output {
            let logged = if redact_output {
                REDACTION_MARKER
            } else {
                output.as_str()
            };
            self.transcript.log_interaction(Direction::Out, logged);
        }
        let (status, state_reason, screen) = self.classify_now(saw_output);
        ToolResponse {
            status,
            output,
            screen,
            state_reason,
        }
    }

    /// Classification of the current screen without consuming output.
    fn view_response(&self) -> ToolResponse {
        let (status, state_reason, screen) = self.classify_now(self.recently_active());
        ToolResponse {
            status,
            output: String::new(),
            screen,
            state_reason,
        }
    }

    fn classify_now(&self, saw_output: bool) -> (SessionStatus, String, String) {
        let (lines, alt_screen, scrollback) = {
            let em = self.emulator.lock().unwrap_or_else(|e| e.into_inner());
            let context_lines = em.rows() * 4;
            (
                em.visible_lines(),
                em.alt_screen(),
                em.scrollback(context_lines).join("\n"),
            )
        };
        let screen = lines.join("\n");

        if self.shared.is_terminated() {
            return (
                SessionStatus::Terminated,
                "session terminated".to_string(),
                screen,
            );
        }
        if self.shared.is_eof() {
            return (
                SessionStatus::Eof,
                "child process exited".to_string(),
                screen,
            );
        }

        let prompt = {
            let detector = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
            detector.classify(&lines)
        };
        let obs = ScreenObservation {
            lines: &lines,
            alt_screen,
            prompt,
            saw_output,
        };
        let c = self.classifier.classify(&obs, &scrollback);
        (c.status, c.reason, screen)
    }

    fn lifecycle_response(&self, status: SessionStatus) -> ToolResponse {
        let screen = self.last_screen();
        let state_reason = match status {
            SessionStatus::Terminated => "session terminated",
            SessionStatus::Eof => "child process exited",
            _ => "",
        };
        ToolResponse {
            status,
            output: String::new(),
            screen,
            state_reason: state_reason.to_string(),
        }
    }

    /// Whether output arrived within the last couple of quiescence windows;
    /// stands in for `saw_output` on view-only calls.
    fn recently_active(&self) -> bool {
        let idle_ms = Utc::now().timestamp_millis() - self.shared.last_activity_ms();
        idle_ms < 2 * self.config.quiescence.as_millis() as i64
    }

    /// On a write failure the session is done: close everything and let
    /// readers see `eof`.
    fn fail_channel(&self) {
        self.shared.set_eof();
        self.ring.close();
        self.transcript.record_end("io-error");
        let channel = Arc::clone(&self.channel);
        let _ = tokio::task::spawn_blocking(move || channel.close());
    }
}

/// Map a control-key mnemonic to its byte: a lowercase letter to its
/// Ctrl-<letter> byte, `[` to ESC.
fn control_byte(key: &str) -> Result<u8> {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c @ 'a'..='z'), None) => Ok(c as u8 - b'a' + 1),
        (Some('['), None) => Ok(0x1b),
        _ => Err(PilotyError::InvalidArgument(format!(
            "control key must be a-z or [, got {key:?}"
        ))),
    }
}

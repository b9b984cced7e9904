//! State classifier: maps the rendered screen plus prompt hints to the
//! agent-facing status vocabulary.
//!
//! Priority order, highest first: password, confirm, error, repl, editor,
//! pager, ready, running, unknown. `eof` and `terminated` are session
//! lifecycle states injected above the classifier.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompt::PromptKind;

/// Wire-stable status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Ready,
    Repl,
    Password,
    Confirm,
    Editor,
    Pager,
    Error,
    Eof,
    Unknown,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Ready => "ready",
            SessionStatus::Repl => "repl",
            SessionStatus::Password => "password",
            SessionStatus::Confirm => "confirm",
            SessionStatus::Editor => "editor",
            SessionStatus::Pager => "pager",
            SessionStatus::Error => "error",
            SessionStatus::Eof => "eof",
            SessionStatus::Unknown => "unknown",
            SessionStatus::Terminated => "terminated",
        }
    }
}

/// External classification hook, consulted only when heuristics land on
/// `unknown`. The core never implements this; transports may inject an
/// LLM-backed sampler.
pub trait StateSampler: Send + Sync {
    fn sample(&self, screen: &str, scrollback: &str) -> Option<SessionStatus>;
}

/// A status with a short human-readable justification.
#[derive(Debug, Clone)]
pub struct Classification {
    pub status: SessionStatus,
    pub reason: String,
}

impl Classification {
    fn new(status: SessionStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

/// What the classifier looks at: the rendered screen, terminal modes, the
/// prompt detector's verdict, and whether the stream produced output
/// recently.
pub struct ScreenObservation<'a> {
    pub lines: &'a [String],
    pub alt_screen: bool,
    pub prompt: PromptKind,
    pub saw_output: bool,
}

static PASSWORD_CUES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(password|passphrase)[^:]*:\s*$").unwrap(),
        Regex::new(r"(?i)enter .*key[^:]*:\s*$").unwrap(),
    ]
});

static CONFIRM_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\[y(es)?/no?\]|\(y(es)?/no?(/\[fingerprint\])?\)|\[y/n/a\])['?:]*\s*$")
        .unwrap()
});

static ERROR_CUES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^Traceback \(most recent call last\)").unwrap(),
        Regex::new(r"(?i)command not found").unwrap(),
        Regex::new(r"(?i)^\s*error[:!]").unwrap(),
        Regex::new(r"(?i): No such file or directory").unwrap(),
    ]
});

static REPL_CUES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^(>>>|\.\.\.)\s?$").unwrap(),
        Regex::new(r"^In \[\d+\]:\s?$").unwrap(),
        Regex::new(r"(?i)^(mysql|sqlite|psql|redis[\w.:\[\]-]*|mongo\w*|node|irb[\w():.]*)>\s?$")
            .unwrap(),
    ]
});

static EDITOR_CUES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"-- (INSERT|NORMAL|VISUAL|REPLACE|TERMINAL) --").unwrap(),
        Regex::new(r"^\s*GNU nano").unwrap(),
        Regex::new(r#"^".*"( \[[^\]]+\])?( \d+ lines?)?"#).unwrap(),
        Regex::new(r"\d+,\d+(-\d+)?\s+(All|Top|Bot|\d+%)\s*$").unwrap(),
    ]
});

static PAGER_CUES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^:\s*$").unwrap(),
        Regex::new(r"\(END\)\s*$").unwrap(),
        Regex::new(r"--More--").unwrap(),
        Regex::new(r"lines? \d+-\d+(/\d+)?").unwrap(),
        Regex::new(r"byte \d+").unwrap(),
    ]
});

/// How many trailing non-empty lines the error bank scans.
const ERROR_SCAN_LINES: usize = 5;

pub struct StateClassifier {
    sampler: Option<Arc<dyn StateSampler>>,
}

impl StateClassifier {
    pub fn new() -> Self {
        Self { sampler: None }
    }

    pub fn with_sampler(sampler: Arc<dyn StateSampler>) -> Self {
        Self {
            sampler: Some(sampler),
        }
    }

    /// Classify the current screen. `scrollback` is only handed to the
    /// sampler; the heuristics look at the visible screen.
    pub fn classify(&self, obs: &ScreenObservation<'_>, scrollback: &str) -> Classification {
        let recent: Vec<&str> = obs
            .lines
            .iter()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(ERROR_SCAN_LINES)
            .map(|l| l.trim_end())
            .collect();
        let last = recent.first().copied().unwrap_or("");

        if PASSWORD_CUES.iter().any(|re| re.is_match(last)) {
            return Classification::new(
                SessionStatus::Password,
                "password prompt on last line",
            );
        }
        if CONFIRM_CUES.is_match(last) {
            return Classification::new(
                SessionStatus::Confirm,
                "confirmation prompt on last line",
            );
        }
        if recent
            .iter()
            .any(|line| ERROR_CUES.iter().any(|re| re.is_match(line)))
        {
            return Classification::new(SessionStatus::Error, "error banner in recent output");
        }
        if matches!(obs.prompt, PromptKind::Python | PromptKind::Pdb)
            || REPL_CUES.iter().any(|re| re.is_match(last))
        {
            return Classification::new(SessionStatus::Repl, "repl prompt detected");
        }
        if obs.alt_screen {
            if EDITOR_CUES.iter().any(|re| re.is_match(last)) {
                return Classification::new(
                    SessionStatus::Editor,
                    "alternate screen with editor status bar",
                );
            }
            if PAGER_CUES.iter().any(|re| re.is_match(last)) {
                return Classification::new(
                    SessionStatus::Pager,
                    "alternate screen with pager prompt",
                );
            }
        }
        if obs.prompt == PromptKind::Shell {
            return Classification::new(SessionStatus::Ready, "shell prompt detected");
        }
        if obs.saw_output {
            return Classification::new(SessionStatus::Running, "output still arriving");
        }

        if let Some(sampler) = &self.sampler {
            let screen = obs.lines.join("\n");
            if let Some(status) = sampler.sample(&screen, scrollback) {
                debug!(status = status.as_str(), "sampler resolved unknown screen");
                return Classification::new(status, "sampler classification");
            }
        }
        Classification::new(SessionStatus::Unknown, "no cues matched")
    }
}

impl Default for StateClassifier {
    fn default() -> Self {
        Self::new()
    }
}

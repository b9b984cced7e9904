//! Shell-prompt detection over the rendered screen.
//!
//! A small bank of regexes matches common prompts on the last non-empty
//! line. A per-session override, when set, takes priority over the bank.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{PilotyError, Result};

/// What the last rendered line looks like it is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    Shell,
    Python,
    Pdb,
    /// A line is present but matches no known prompt.
    None,
    /// Nothing rendered yet.
    Unknown,
}

static PYTHON_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(>>>|\.\.\.)\s?$").unwrap());
static PDB_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\(pdb\+?\)|i?pdb>)\s?$").unwrap());

/// The `$`/`#`/`%` family: bare bash/zsh/root prompts, `user@host` prefixed
/// variants, and fish's `user@host dir>` shape. A lone `>` is deliberately
/// not a shell prompt: that is a continuation (PS2) or a REPL.
static SHELL_PROMPTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"[$#%]\s?$").unwrap(),
        Regex::new(r"^\S+@\S+\s+[^>]*\S>\s?$").unwrap(),
    ]
});

pub struct PromptDetector {
    override_re: Option<Regex>,
}

impl PromptDetector {
    pub fn new() -> Self {
        Self { override_re: None }
    }

    /// Install a session-supplied PS1 pattern. Takes priority over the bank.
    pub fn set_override(&mut self, pattern: &str) -> Result<()> {
        let re = Regex::new(pattern)
            .map_err(|e| PilotyError::InvalidArgument(format!("bad prompt regex: {e}")))?;
        self.override_re = Some(re);
        Ok(())
    }

    pub fn override_pattern(&self) -> Option<String> {
        self.override_re.as_ref().map(|r| r.as_str().to_string())
    }

    /// Classify the last non-empty rendered line.
    pub fn classify(&self, lines: &[String]) -> PromptKind {
        let Some(last) = lines.iter().rev().find(|l| !l.trim().is_empty()) else {
            return PromptKind::Unknown;
        };
        let last = last.trim_end();

        if let Some(re) = &self.override_re {
            if re.is_match(last) {
                return PromptKind::Shell;
            }
        }
        if PYTHON_PROMPT.is_match(last) {
            return PromptKind::Python;
        }
        if PDB_PROMPT.is_match(last.trim()) {
            return PromptKind::Pdb;
        }
        if SHELL_PROMPTS.iter().any(|re| re.is_match(last)) {
            return PromptKind::Shell;
        }
        PromptKind::None
    }
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bash_and_zsh_prompts_are_shell() {
        let det = PromptDetector::new();
        assert_eq!(det.classify(&lines(&["bash-5.2$"])), PromptKind::Shell);
        assert_eq!(det.classify(&lines(&["host%"])), PromptKind::Shell);
        assert_eq!(det.classify(&lines(&["root@box:~#"])), PromptKind::Shell);
        assert_eq!(
            det.classify(&lines(&["alice@box ~/src>"])),
            PromptKind::Shell
        );
    }

    #[test]
    fn python_prompts_detected() {
        let det = PromptDetector::new();
        assert_eq!(det.classify(&lines(&["4", ">>>"])), PromptKind::Python);
        assert_eq!(det.classify(&lines(&["..."])), PromptKind::Python);
    }

    #[test]
    fn pdb_prompt_detected() {
        let det = PromptDetector::new();
        assert_eq!(det.classify(&lines(&["(Pdb)"])), PromptKind::Pdb);
        assert_eq!(det.classify(&lines(&["ipdb>"])), PromptKind::Pdb);
    }

    #[test]
    fn bare_continuation_is_not_shell() {
        let det = PromptDetector::new();
        assert_eq!(det.classify(&lines(&[">"])), PromptKind::None);
    }

    #[test]
    fn empty_screen_is_unknown() {
        let det = PromptDetector::new();
        assert_eq!(det.classify(&lines(&["", "  "])), PromptKind::Unknown);
        assert_eq!(det.classify(&[]), PromptKind::Unknown);
    }

    #[test]
    fn override_beats_bank() {
        let mut det = PromptDetector::new();
        det.set_override(r"^MCP> $|^MCP>$").unwrap();
        assert_eq!(det.classify(&lines(&["MCP>"])), PromptKind::Shell);
        // Bank still applies when the override misses.
        assert_eq!(det.classify(&lines(&[">>>"])), PromptKind::Python);
    }

    #[test]
    fn bad_override_is_invalid_argument() {
        let mut det = PromptDetector::new();
        assert!(matches!(
            det.set_override("["),
            Err(PilotyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn mid_output_line_is_none() {
        let det = PromptDetector::new();
        assert_eq!(
            det.classify(&lines(&["downloading 45%..."])),
            PromptKind::None
        );
    }
}

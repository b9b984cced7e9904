//! Runtime configuration for sessions and the registry.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PilotyError, Result};

/// Default quiescence window in milliseconds, overridable via `QUIESCENCE_MS`.
pub const DEFAULT_QUIESCENCE_MS: u64 = 1000;

/// Default cap a collect waits before returning whatever accumulated.
pub const DEFAULT_MAX_WAIT_MS: u64 = 30_000;

/// In-memory ring capacity. Durability beyond this relies on the transcript.
pub const DEFAULT_RING_CAPACITY: usize = 512 * 1024;

/// Emulator scrollback bound in lines; overflow drops the oldest lines.
pub const DEFAULT_SCROLLBACK_LINES: usize = 4000;

/// Configuration shared by every session a [`crate::Registry`] creates.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the on-disk layout (`sessions/<id>/...`, `active/<id>`).
    pub root: PathBuf,
    /// Terminal rows, fixed for the life of each session.
    pub rows: u16,
    /// Terminal columns, fixed for the life of each session.
    pub cols: u16,
    /// Silence window that ends a collect.
    pub quiescence: Duration,
    /// Default deadline for collects when the caller passes none.
    pub max_wait: Duration,
    /// Ingestion ring capacity in bytes.
    pub ring_capacity: usize,
    /// Emulator scrollback cap in lines.
    pub scrollback_lines: usize,
    /// Shell argv spawned per session.
    pub shell: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            rows: 24,
            cols: 80,
            quiescence: Duration::from_millis(quiescence_from_env()),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            ring_capacity: DEFAULT_RING_CAPACITY,
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
            shell: vec![
                "bash".to_string(),
                "--norc".to_string(),
                "--noprofile".to_string(),
            ],
        }
    }
}

impl Config {
    /// Reject dimensions a PTY cannot have.
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(PilotyError::InvalidArgument(format!(
                "terminal dimensions must be at least 1x1, got {}x{}",
                self.cols, self.rows
            )));
        }
        if self.shell.is_empty() {
            return Err(PilotyError::InvalidArgument(
                "shell argv must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".piloty")
}

fn quiescence_from_env() -> u64 {
    std::env::var("QUIESCENCE_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_QUIESCENCE_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_dimensions_rejected() {
        let cfg = Config {
            rows: 0,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PilotyError::InvalidArgument(_))
        ));
    }
}

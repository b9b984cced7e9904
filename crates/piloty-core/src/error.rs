//! Error taxonomy for the session runtime.
//!
//! Quiescence and expect deadlines are deliberately absent here: a timeout is
//! not an error to the caller. The collector returns whatever accumulated and
//! the classifier reports its best guess in-band.

use thiserror::Error;

/// Errors surfaced by the tool-facing API.
#[derive(Debug, Error)]
pub enum PilotyError {
    /// A view-only operation referenced an id that was never registered.
    #[error("no such session: {0}")]
    NoSuchSession(String),

    /// An input operation was issued against a terminated session.
    #[error("session terminated: {0}")]
    Terminated(String),

    /// Fork/exec of the shell failed; the session id was not registered.
    #[error("failed to spawn session shell: {source}")]
    Spawn {
        #[source]
        source: anyhow::Error,
    },

    /// PTY read/write failure after spawn. Final for the session: the channel
    /// is closed and the session transitions to `eof`.
    #[error("pty i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed control-key mnemonic, unknown signal name, bad regex, or
    /// dimensions below 1.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, PilotyError>;

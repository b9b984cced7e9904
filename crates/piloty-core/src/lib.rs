//! piloty-core: the per-session runtime behind an agent-facing PTY server.
//!
//! Each session pairs a shell with a PTY master and keeps three synchronized
//! views of its output: an append-only transcript on disk, an in-memory
//! ingestion ring handing out "new since cursor" bytes, and a VT100 emulator
//! rendering screen plus scrollback. Tool operations write input, wait for
//! quiescence, and come back with the uniform
//! `{status, output, screen, state_reason}` shape, where `status` is
//! inferred from the rendered screen so an agent knows whether the terminal
//! wants a command, a password, a pager keystroke, or patience.
//!
//! The request/response transport that exposes these operations to clients
//! lives outside this crate; so does any LLM-backed sampler, for which
//! [`StateSampler`] is the hook.

pub mod config;
pub mod error;
pub mod pty;
pub mod registry;
pub mod semantic;
pub mod session;
pub mod term;
pub mod text;
pub mod transcript;

pub use config::Config;
pub use error::{PilotyError, Result};
pub use pty::{signal_from_name, OutputRing, PtyChannel, PtyOpen};
pub use registry::{Registry, RegistrySummary, SessionHandle, TerminatedSentinel};
pub use semantic::{
    Classification, PromptDetector, PromptKind, ScreenObservation, SessionStatus, StateClassifier,
    StateSampler,
};
pub use session::{Session, SessionMetadata, ToolResponse};
pub use term::{Emulator, ScreenView};
pub use text::{parse_jobs, strip_ansi, JobInfo};
pub use transcript::{Direction, SessionMeta, TranscriptStore, REDACTION_MARKER};

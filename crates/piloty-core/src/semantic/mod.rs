//! Screen-state inference: prompt detection and the agent-facing status
//! classifier with its pluggable sampler hook.

mod classifier;
mod prompt;

pub use classifier::{
    Classification, ScreenObservation, SessionStatus, StateClassifier, StateSampler,
};
pub use prompt::{PromptDetector, PromptKind};

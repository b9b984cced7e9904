//! Terminal emulation: the canonical "what a human would see" view of a
//! session's byte stream.

mod emulator;

pub use emulator::{Emulator, ScreenView};

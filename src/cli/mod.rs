//! CLI-specific utilities for linkrelay
//!
//! Terminal display of the status channel, kept out of the library.

pub mod progress;

pub use progress::ProgressManager;

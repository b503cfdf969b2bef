//! SnapEdit Common Utilities
//!
//! Shared infrastructure for all SnapEdit crates:
//! - Error types, stable error codes, and result aliases
//! - Frame timing helpers (sequence index <-> presentation timestamp)
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;

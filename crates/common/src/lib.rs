//! Cutlog Common Utilities
//!
//! Shared infrastructure for all Cutlog crates:
//! - Error taxonomy and result aliases
//! - Clock abstraction for timestamps and retention windows
//! - Keyed locks for per-project and per-record critical sections
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod locks;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use locks::*;

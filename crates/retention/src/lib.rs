//! Cutlog Retention
//!
//! Tracks every full-resolution export and reclaims disk space in three
//! deliberately separate stages:
//!
//! ```text
//! mark     flags old, unpinned exports beyond the newest N     (no byte I/O)
//! archive  moves flagged exports' bytes to archive/            (reversible by hand)
//! delete   removes archived bytes, only with confirmation      (frees space)
//! ```
//!
//! Pinning an export at any point before deletion pulls it back to `active`
//! and keeps every later mark from touching it.

pub mod gc;
pub mod registry;

pub use gc::*;
pub use registry::*;

//! Cutlog Edit Log
//!
//! Turns a stream of edit requests into monotonically versioned project
//! state. Every successful [`EditLog::append`] stores one immutable batch and
//! advances the project's `currentVersion` by exactly one, so the versions
//! present for a project are always `1..=currentVersion`.
//!
//! # Concurrency
//!
//! Appends to one project are serialized in-process by a keyed mutex.
//! Across processes sharing a storage root, the batch record key
//! `{projectId}-v{version}` is created with create-if-absent semantics: the
//! writer that creates it owns the version, and the loser sees a conflict,
//! rolls the counter forward, and retries a bounded number of times.

pub mod log;

pub use log::*;

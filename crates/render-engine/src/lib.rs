//! Cutlog Render Engine
//!
//! Reconstructs a project's edit-decision list at a given version and hands
//! it to a transcoder, producing either a low-resolution proxy or a
//! full-resolution export.
//!
//! # Job Flow
//!
//! ```text
//! enqueue ──▶ renderJobs/<id>.json (queued)
//!                 │
//!                 ├── proxy pool  (render.proxy_workers)
//!                 └── export pool (render.export_workers)
//!                         │
//!                  claim job ── claims/job-<id>.json
//!                         │
//!                  claim target ── output exists? ──yes──▶ succeeded (reused)
//!                         │no
//!                  <key>.partial ── transcoder ── rename ──▶ <key>
//!                         │
//!                  project pointer (highest version wins)
//!                         │
//!                  export only: registry record + retention mark
//! ```
//!
//! Claims are shared by every process on a storage root, so a job runs once
//! and a target is transcoded once no matter how many queues are started.
//!
//! Transcoding failures fail the job and are never retried automatically.

pub mod claims;
pub mod event;
pub mod queue;
pub mod targets;
pub mod transcoder;
pub mod worker;

pub use event::RenderEvent;
pub use queue::RenderQueue;
pub use transcoder::{CommandTranscoder, RenderRequest, Transcoder};
pub use worker::RenderServices;

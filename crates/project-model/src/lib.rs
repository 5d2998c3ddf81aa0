//! Cutlog Project Model
//!
//! Defines the durable records of the hybrid editing workflow:
//! - **Project:** version counter and pointers to the latest rendered artifacts
//! - **Edit batches:** the append-only, versioned edit-decision log
//! - **Source assets:** content-addressed uploads with reference counts
//! - **Export versions:** full-resolution renders and their GC lifecycle
//! - **Render jobs:** the persisted proxy/export queue
//! - **Claims:** cross-process ownership of render targets and jobs
//!
//! Records live in [`collection::Collection`]s, one JSON file per record,
//! and artifacts live at stable subpaths described by [`layout::ArtifactLayout`].

pub mod asset;
pub mod claim;
pub mod collection;
pub mod edit;
pub mod export;
pub mod job;
pub mod layout;
pub mod project;

pub use asset::*;
pub use claim::*;
pub use collection::*;
pub use edit::*;
pub use export::*;
pub use job::*;
pub use layout::*;
pub use project::*;

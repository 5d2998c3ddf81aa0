//! Cutlog Content Store
//!
//! Deduplicates uploaded source media by SHA-256. Identical byte streams
//! share one stored copy and one [`SourceAsset`](cutlog_project_model::SourceAsset)
//! record whose `refCount` tracks how many projects point at it. Bytes are
//! physically removed only by [`ContentStore::purge_unreferenced`], and only
//! for assets whose count is zero at the moment of removal.

pub mod hash;
pub mod store;

pub use hash::*;
pub use store::*;

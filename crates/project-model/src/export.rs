//! Export version records and their garbage-collection lifecycle.
//!
//! ```text
//! active ──mark──▶ gcCandidate ──archive──▶ archived ──delete──▶ deleted
//!    ▲                  │                      │
//!    └──────pin─────────┴──────────pin─────────┘
//! ```
//!
//! Transitions only move forward except through an explicit pin. `pinned`
//! and `gc_candidate` are never both set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cutlog_common::error::{CutlogError, CutlogResult};

use crate::collection::Record;

/// Lifecycle state of a rendered export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportState {
    Active,
    GcCandidate,
    Archived,
    Deleted,
}

impl std::fmt::Display for ExportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::GcCandidate => write!(f, "gcCandidate"),
            Self::Archived => write!(f, "archived"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// One full-resolution render (`exportVersions/<projectId>-v<version>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportVersion {
    pub id: String,
    pub project_id: String,

    /// Edit-log version this export was rendered from.
    pub version: u64,

    /// Current subpath of the artifact bytes.
    pub location: String,

    pub size_bytes: u64,
    pub pinned: bool,
    pub gc_candidate: bool,

    #[serde(default)]
    pub gc_marked_at: Option<DateTime<Utc>>,

    pub state: ExportState,

    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Record for ExportVersion {
    const KIND: &'static str = "export";

    fn key(&self) -> &str {
        &self.id
    }
}

impl ExportVersion {
    /// Export identifier for a project version; one record per pair.
    pub fn id_for(project_id: &str, version: u64) -> String {
        format!("{project_id}-v{version}")
    }

    pub fn new(
        project_id: impl Into<String>,
        version: u64,
        location: impl Into<String>,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let project_id = project_id.into();
        Self {
            id: Self::id_for(&project_id, version),
            project_id,
            version,
            location: location.into(),
            size_bytes,
            pinned: false,
            gc_candidate: false,
            gc_marked_at: None,
            state: ExportState::Active,
            archived_at: None,
            deleted_at: None,
            created_at: now,
        }
    }

    /// Whether the record still has bytes somewhere.
    pub fn is_live(&self) -> bool {
        self.state != ExportState::Deleted
    }

    /// `active → gcCandidate`.
    ///
    /// Returns `Ok(false)` when the export is already a candidate. Pinned,
    /// archived, and deleted exports cannot be marked.
    pub fn mark(&mut self, now: DateTime<Utc>) -> CutlogResult<bool> {
        if self.pinned {
            return Err(CutlogError::state(format!(
                "export {} is pinned and cannot be marked",
                self.id
            )));
        }
        match self.state {
            ExportState::Active => {
                self.state = ExportState::GcCandidate;
                self.gc_candidate = true;
                self.gc_marked_at = Some(now);
                Ok(true)
            }
            ExportState::GcCandidate => Ok(false),
            other => Err(CutlogError::state(format!(
                "export {} is {other} and cannot be marked",
                self.id
            ))),
        }
    }

    /// Check that `archive` would succeed, before any bytes move.
    pub fn ensure_archivable(&self) -> CutlogResult<()> {
        if self.state != ExportState::GcCandidate || self.pinned {
            return Err(CutlogError::state(format!(
                "export {} is {} and not a GC candidate",
                self.id, self.state
            )));
        }
        Ok(())
    }

    /// `gcCandidate → archived`, recording where the bytes now live.
    pub fn archive(&mut self, archive_location: impl Into<String>, now: DateTime<Utc>) -> CutlogResult<()> {
        self.ensure_archivable()?;
        self.state = ExportState::Archived;
        self.gc_candidate = false;
        self.location = archive_location.into();
        self.archived_at = Some(now);
        Ok(())
    }

    /// Check that `mark_deleted` would succeed, before any bytes are removed.
    pub fn ensure_deletable(&self) -> CutlogResult<()> {
        if self.state != ExportState::Archived {
            return Err(CutlogError::state(format!(
                "export {} is {}; only archived exports can be deleted",
                self.id, self.state
            )));
        }
        Ok(())
    }

    /// `archived → deleted`.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) -> CutlogResult<()> {
        self.ensure_deletable()?;
        self.state = ExportState::Deleted;
        self.deleted_at = Some(now);
        Ok(())
    }

    /// Flip the pin. Pinning clears any GC marking and returns the export
    /// to `active`; archived bytes stay where they are.
    pub fn toggle_pin(&mut self) -> CutlogResult<bool> {
        if self.state == ExportState::Deleted {
            return Err(CutlogError::state(format!(
                "export {} is deleted and cannot be pinned",
                self.id
            )));
        }
        if self.pinned {
            self.pinned = false;
        } else {
            self.pinned = true;
            self.gc_candidate = false;
            self.gc_marked_at = None;
            self.state = ExportState::Active;
        }
        Ok(self.pinned)
    }

    /// Bring a deleted export back to life with a fresh render.
    pub fn revive(&mut self, location: impl Into<String>, size_bytes: u64, now: DateTime<Utc>) {
        self.location = location.into();
        self.size_bytes = size_bytes;
        self.pinned = false;
        self.gc_candidate = false;
        self.gc_marked_at = None;
        self.state = ExportState::Active;
        self.archived_at = None;
        self.deleted_at = None;
        self.created_at = now;
    }
}

//! Project records.
//!
//! A project is one editing session over one source asset. It owns the
//! version counter advanced by the edit log and the pointers to the most
//! recently rendered proxy and export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::Record;

/// Top-level project record (`projects/<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique project identifier (UUID).
    pub id: String,

    /// Human-readable project name.
    pub name: String,

    /// Source asset this project edits.
    #[serde(default)]
    pub source_asset_id: Option<String>,

    /// Highest edit-log version. Only the edit log advances it.
    pub current_version: u64,

    /// Subpath of the newest proxy render.
    #[serde(default)]
    pub latest_proxy_key: Option<String>,

    /// Version `latest_proxy_key` was rendered from.
    #[serde(default)]
    pub latest_proxy_version: Option<u64>,

    /// Subpath of the newest full-resolution export.
    #[serde(default)]
    pub latest_export_key: Option<String>,

    /// Version `latest_export_key` was rendered from.
    #[serde(default)]
    pub latest_export_version: Option<u64>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last modified timestamp.
    pub modified_at: DateTime<Utc>,
}

impl Record for Project {
    const KIND: &'static str = "project";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Project {
    /// Create a project at version 0.
    pub fn new(
        name: impl Into<String>,
        source_asset_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            source_asset_id,
            current_version: 0,
            latest_proxy_key: None,
            latest_proxy_version: None,
            latest_export_key: None,
            latest_export_version: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Point `latest_proxy_key` at a finished proxy unless a newer one is
    /// already recorded. Returns whether the pointer moved.
    pub fn record_proxy(&mut self, version: u64, key: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !newer(self.latest_proxy_version, version) {
            return false;
        }
        self.latest_proxy_key = Some(key.into());
        self.latest_proxy_version = Some(version);
        self.modified_at = now;
        true
    }

    /// Point `latest_export_key` at a finished export unless a newer one is
    /// already recorded. Returns whether the pointer moved.
    pub fn record_export(&mut self, version: u64, key: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !newer(self.latest_export_version, version) {
            return false;
        }
        self.latest_export_key = Some(key.into());
        self.latest_export_version = Some(version);
        self.modified_at = now;
        true
    }
}

fn newer(current: Option<u64>, candidate: u64) -> bool {
    current.map_or(true, |v| candidate >= v)
}

//! Content-addressed source assets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::Record;

/// One distinct uploaded byte stream (`sourceAssets/sha256-<hex>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAsset {
    pub id: String,

    /// Lowercase hex SHA-256 of the full byte stream.
    pub content_hash: String,

    /// Subpath of the stored bytes under the storage root.
    pub location: String,

    pub size_bytes: u64,

    /// Live references; bytes may only be removed at zero.
    pub ref_count: u64,

    pub created_at: DateTime<Utc>,
}

impl Record for SourceAsset {
    const KIND: &'static str = "source asset";

    fn key(&self) -> &str {
        &self.id
    }
}

impl SourceAsset {
    /// Asset identifier for a content hash.
    pub fn id_for_hash(content_hash: &str) -> String {
        format!("sha256-{content_hash}")
    }

    pub fn new(
        content_hash: impl Into<String>,
        location: impl Into<String>,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let content_hash = content_hash.into();
        Self {
            id: Self::id_for_hash(&content_hash),
            content_hash,
            location: location.into(),
            size_bytes,
            ref_count: 1,
            created_at: now,
        }
    }

    pub fn is_referenced(&self) -> bool {
        self.ref_count > 0
    }
}

//! Cross-process ownership claims (`claims/<key>.json`).
//!
//! Every process working on a storage root shares these records. A claim
//! is taken with [`Collection::insert_new`](crate::collection::Collection::insert_new),
//! kept alive by renewing `renewedAt`, and removed by its owner. A claim
//! whose owner stopped renewing it past the lease may be taken over.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use cutlog_common::clock::age;

use crate::collection::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub key: String,
    /// Identifier of the render queue holding the claim.
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
}

impl Record for Claim {
    const KIND: &'static str = "claim";

    fn key(&self) -> &str {
        &self.key
    }
}

impl Claim {
    pub fn new(key: impl Into<String>, owner: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            acquired_at: now,
            renewed_at: now,
        }
    }

    /// Claim key for an artifact key (`export/p1/v2` becomes `export-p1-v2`).
    pub fn for_target(artifact_key: &str) -> String {
        artifact_key.replace('/', "-")
    }

    pub fn for_job(job_id: &str) -> String {
        format!("job-{job_id}")
    }

    /// Whether the owner has not renewed the claim within `lease`.
    pub fn is_stale(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        age(now, self.renewed_at) > lease
    }
}

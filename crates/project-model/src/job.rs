//! Persisted render jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cutlog_common::error::ErrorKind;

use crate::collection::Record;

/// What a render job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Low-resolution preview.
    Proxy,
    /// Full-resolution export.
    Export,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proxy => write!(f, "proxy"),
            Self::Export => write!(f, "export"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proxy" => Ok(Self::Proxy),
            "export" => Ok(Self::Export),
            other => Err(format!("unknown job kind: {other} (use proxy or export)")),
        }
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One proxy or export request (`renderJobs/<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub id: String,
    pub kind: JobKind,
    pub project_id: String,
    pub version: u64,
    pub status: JobStatus,

    /// Artifact subpath once the job succeeded.
    #[serde(default)]
    pub output: Option<String>,

    /// Failure message once the job failed.
    #[serde(default)]
    pub error: Option<String>,

    /// Failure classification once the job failed.
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,

    /// Whether the output already existed and no render was performed.
    #[serde(default)]
    pub reused_existing: bool,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Record for RenderJob {
    const KIND: &'static str = "render job";

    fn key(&self) -> &str {
        &self.id
    }
}

impl RenderJob {
    pub fn new(kind: JobKind, project_id: impl Into<String>, version: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            project_id: project_id.into(),
            version,
            status: JobStatus::Queued,
            output: None,
            error: None,
            error_kind: None,
            reused_existing: false,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether a restarted queue should pick this job up again.
    pub fn is_resumable(&self) -> bool {
        matches!(self.status, JobStatus::Queued | JobStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parses_and_displays() {
        assert_eq!("proxy".parse::<JobKind>().unwrap(), JobKind::Proxy);
        assert_eq!(JobKind::Export.to_string(), "export");
        assert!("preview".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_new_job_is_queued_and_resumable() {
        let job = RenderJob::new(JobKind::Export, "p1", 3, Utc::now());
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.is_resumable());
        assert!(!job.status.is_terminal());

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "export");
        assert_eq!(value["projectId"], "p1");
    }
}

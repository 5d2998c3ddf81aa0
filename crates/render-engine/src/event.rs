//! Job lifecycle notifications.

use serde::Serialize;

use cutlog_project_model::job::{JobKind, JobStatus, RenderJob};

/// Emitted on every job status change. Delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEvent {
    pub job_id: String,
    pub project_id: String,
    pub version: u64,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RenderJob> for RenderEvent {
    fn from(job: &RenderJob) -> Self {
        Self {
            job_id: job.id.clone(),
            project_id: job.project_id.clone(),
            version: job.version,
            kind: job.kind,
            status: job.status,
            output: job.output.clone(),
            error: job.error.clone(),
        }
    }
}

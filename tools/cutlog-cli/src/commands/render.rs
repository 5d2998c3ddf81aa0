//! Render a proxy or export and wait for the result.

use cutlog_common::error::{CutlogError, ErrorKind};
use cutlog_project_model::job::{JobKind, JobStatus, RenderJob};

use crate::context::Context;

pub async fn run(
    ctx: &Context,
    kind: JobKind,
    project_id: &str,
    version: Option<u64>,
) -> anyhow::Result<()> {
    let version = match version {
        Some(v) => v,
        None => ctx.services.edit_log.latest_version(project_id)?,
    };

    let queue = ctx.start_queue()?;
    let job_id = queue.enqueue(kind, project_id, version)?;
    println!("Queued {kind} job {job_id} for {project_id} v{version}");

    let waited = queue.wait(&job_id).await;
    queue.shutdown().await;
    let job = waited?;

    match job.status {
        JobStatus::Succeeded => {
            let output = job.output.unwrap_or_default();
            let path = ctx.services.layout.resolve(&output);
            if job.reused_existing {
                println!("Already rendered: {}", path.display());
            } else {
                println!("Rendered: {}", path.display());
            }
            Ok(())
        }
        _ => Err(job_failure(&job).into()),
    }
}

/// Error for a job that did not succeed, classified like its cause.
fn job_failure(job: &RenderJob) -> CutlogError {
    match job.status {
        JobStatus::Failed => CutlogError::from_kind(
            job.error_kind.unwrap_or(ErrorKind::Transcoding),
            format!(
                "{} job {}: {}",
                job.kind,
                job.id,
                job.error.as_deref().unwrap_or_default()
            ),
        ),
        other => CutlogError::state(format!("{} job {} ended {other}", job.kind, job.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn failed(kind: Option<ErrorKind>) -> RenderJob {
        let mut job = RenderJob::new(JobKind::Proxy, "p1", 1, Utc::now());
        job.status = JobStatus::Failed;
        job.error = Some("project p1 has no source asset".to_string());
        job.error_kind = kind;
        job
    }

    #[test]
    fn test_failed_job_exits_with_its_cause() {
        let err = job_failure(&failed(Some(ErrorKind::Validation)));
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("no source asset"));

        assert_eq!(job_failure(&failed(Some(ErrorKind::Transcoding))).exit_code(), 5);
        // Jobs recorded before failures were classified.
        assert_eq!(job_failure(&failed(None)).exit_code(), 5);
    }

    #[test]
    fn test_cancelled_job_is_a_state_error() {
        let mut job = failed(None);
        job.status = JobStatus::Cancelled;
        assert_eq!(job_failure(&job).exit_code(), 6);
    }
}

//! List render jobs.

use crate::context::Context;

pub async fn run(ctx: &Context, resume: bool) -> anyhow::Result<()> {
    if resume {
        let queue = ctx.start_queue()?;
        let pending: Vec<_> = queue
            .jobs()?
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .collect();
        println!("Resuming {} job(s)", pending.len());
        for job in &pending {
            if let Err(e) = queue.wait(&job.id).await {
                tracing::warn!(job_id = %job.id, error = %e, "Stopped waiting for job");
            }
        }
        queue.shutdown().await;
    }

    let mut jobs = ctx.services.db.render_jobs.list()?;
    jobs.sort_by_key(|job| job.created_at);
    if jobs.is_empty() {
        println!("No render jobs.");
        return Ok(());
    }
    for job in jobs {
        let detail = match (&job.output, &job.error) {
            (Some(output), _) if job.reused_existing => format!("{output} (reused)"),
            (Some(output), _) => output.clone(),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{}  {:<6} {} v{:<4} {:<9} {}",
            job.id,
            job.kind.to_string(),
            job.project_id,
            job.version,
            job.status.to_string(),
            detail
        );
    }
    Ok(())
}

//! Persisted render queue with separate proxy and export pools.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use cutlog_common::config::{RenderConfig, RetentionPolicy};
use cutlog_common::error::{CutlogError, CutlogResult};
use cutlog_project_model::claim::Claim;
use cutlog_project_model::job::{JobKind, JobStatus, RenderJob};

use crate::event::RenderEvent;
use crate::worker::{RenderServices, Renderer};

const EVENT_CAPACITY: usize = 256;

/// How often `wait` re-reads a job that another process may be running.
const WAIT_POLL: Duration = Duration::from_millis(250);

type JobReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>;

/// Accepts proxy and export jobs and runs them on bounded worker pools.
///
/// Jobs are persisted before they are dispatched. A queue started on a
/// storage root picks up every job a previous process left `queued` or
/// `running`. Queues in different processes may share a root: a worker
/// runs a job only while holding its claim.
#[derive(Debug)]
pub struct RenderQueue {
    inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug)]
struct QueueInner {
    renderer: Renderer,
    proxy_tx: mpsc::UnboundedSender<String>,
    export_tx: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<RenderEvent>,
    shutdown: watch::Sender<bool>,
}

impl RenderQueue {
    /// Check the transcoder, start both pools and resume persisted jobs.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        services: RenderServices,
        config: &RenderConfig,
        retention: RetentionPolicy,
    ) -> CutlogResult<Self> {
        let transcoder = Arc::clone(&services.transcoder);
        if !transcoder.is_available() {
            return Err(CutlogError::config(format!(
                "transcoder {} is not available",
                transcoder.name()
            )));
        }

        let (proxy_tx, proxy_rx) = mpsc::unbounded_channel();
        let (export_tx, export_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(QueueInner {
            renderer: Renderer::new(services, config, retention),
            proxy_tx,
            export_tx,
            events,
            shutdown,
        });

        let proxy_workers = config.proxy_workers.max(1);
        let export_workers = config.export_workers.max(1);
        let mut workers = spawn_pool(&inner, JobKind::Proxy, proxy_rx, proxy_workers);
        workers.extend(spawn_pool(&inner, JobKind::Export, export_rx, export_workers));

        let queue = Self {
            inner,
            workers: Mutex::new(workers),
        };
        let resumed = queue.resume()?;

        tracing::info!(
            proxy_workers,
            export_workers,
            resumed,
            transcoder = transcoder.name(),
            "Render queue started"
        );
        Ok(queue)
    }

    /// Validate and persist a job, then hand it to its pool.
    pub fn enqueue(&self, kind: JobKind, project_id: &str, version: u64) -> CutlogResult<String> {
        if *self.inner.shutdown.borrow() {
            return Err(CutlogError::state("render queue is shutting down"));
        }

        let services = self.inner.renderer.services();
        let current = services.edit_log.latest_version(project_id)?;
        if version == 0 || version > current {
            return Err(CutlogError::validation(format!(
                "version {version} of project {project_id} does not exist (current is {current})"
            )));
        }

        let job = RenderJob::new(kind, project_id, version, services.clock.now());
        if !services.db.render_jobs.insert_new(&job)? {
            return Err(CutlogError::conflict(format!("job id {} already exists", job.id)));
        }
        self.inner.emit(&job);
        self.inner.dispatch(&job)?;

        tracing::info!(job_id = %job.id, %kind, project_id, version, "Enqueued render job");
        Ok(job.id)
    }

    /// Reload unfinished jobs in creation order. Jobs caught mid-render go
    /// back to `queued` unless another live queue still holds them;
    /// idempotent workers make re-running them safe.
    fn resume(&self) -> CutlogResult<usize> {
        let jobs = &self.inner.renderer.services().db.render_jobs;
        let claims = self.inner.renderer.claims();
        let mut pending: Vec<_> = jobs
            .list()?
            .into_iter()
            .filter(RenderJob::is_resumable)
            .collect();
        pending.sort_by_key(|job| job.created_at);

        for job in &pending {
            if job.status == JobStatus::Running && !claims.is_held(&Claim::for_job(&job.id))? {
                jobs.update(&job.id, |job| {
                    if job.status == JobStatus::Running {
                        job.status = JobStatus::Queued;
                        job.started_at = None;
                    }
                    Ok(())
                })?;
                tracing::warn!(job_id = %job.id, "Requeued job interrupted mid-render");
            }
            self.inner.dispatch(job)?;
        }
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Resumed persisted render jobs");
        }
        Ok(pending.len())
    }

    /// Withdraw a job that has not started.
    pub fn cancel(&self, job_id: &str) -> CutlogResult<RenderJob> {
        let services = self.inner.renderer.services();
        // A worker somewhere holds the claim from before it starts the job.
        let Some(_claim) = self.inner.renderer.claims().try_acquire(&Claim::for_job(job_id))? else {
            services.db.render_jobs.require(job_id)?;
            return Err(CutlogError::state(format!("job {job_id} is already running")));
        };
        let now = services.clock.now();
        let job = services.db.render_jobs.update(job_id, |job| match job.status {
            JobStatus::Queued => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(now);
                Ok(job.clone())
            }
            JobStatus::Running => Err(CutlogError::state(format!(
                "job {job_id} is already running"
            ))),
            other => Err(CutlogError::state(format!("job {job_id} is already {other}"))),
        })?;

        self.inner.emit(&job);
        tracing::info!(job_id, "Cancelled render job");
        Ok(job)
    }

    pub fn job(&self, job_id: &str) -> CutlogResult<RenderJob> {
        self.inner.renderer.services().db.render_jobs.require(job_id)
    }

    /// Every persisted job, oldest first.
    pub fn jobs(&self) -> CutlogResult<Vec<RenderJob>> {
        let mut jobs = self.inner.renderer.services().db.render_jobs.list()?;
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    /// Resolve once the job reaches a terminal status.
    ///
    /// Fails with a state error if the queue shuts down while the job is
    /// still waiting for a worker.
    pub async fn wait(&self, job_id: &str) -> CutlogResult<RenderJob> {
        let mut events = self.inner.events.subscribe();
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            let job = self.job(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if *shutdown.borrow() && job.status == JobStatus::Queued {
                return Err(CutlogError::state(format!(
                    "render queue stopped before job {job_id} started"
                )));
            }

            // Wake on this job's terminal event, on shutdown, when events
            // were dropped, or periodically; then re-read the record.
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) if event.job_id == job_id && event.status.is_terminal() => break,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(CutlogError::state("render queue closed"));
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return Err(CutlogError::state("render queue closed"));
                        }
                        break;
                    }
                    _ = tokio::time::sleep(WAIT_POLL) => break,
                }
            }
        }
    }

    /// Status-change notifications for every job.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.inner.events.subscribe()
    }

    /// Stop accepting jobs and wait for workers to finish their current job.
    /// Jobs still queued stay persisted for the next start.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Render worker ended abnormally");
            }
        }
        tracing::info!("Render queue stopped");
    }
}

impl Drop for RenderQueue {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
    }
}

impl QueueInner {
    fn dispatch(&self, job: &RenderJob) -> CutlogResult<()> {
        let sender = match job.kind {
            JobKind::Proxy => &self.proxy_tx,
            JobKind::Export => &self.export_tx,
        };
        sender
            .send(job.id.clone())
            .map_err(|_| CutlogError::state(format!("{} workers have stopped", job.kind)))
    }

    fn emit(&self, job: &RenderJob) {
        // No subscribers is fine.
        self.events.send(RenderEvent::from(job)).ok();
    }

    async fn run_job(&self, job_id: &str) {
        let services = self.renderer.services();
        let jobs = &services.db.render_jobs;

        // Held until the terminal status is recorded.
        let claim_key = Claim::for_job(job_id);
        let mut shutdown = self.shutdown.subscribe();
        let claim = tokio::select! {
            biased;
            claim = self.renderer.claims().acquire(&claim_key) => claim,
            _ = shutdown.wait_for(|stopped| *stopped) => {
                tracing::debug!(job_id, "Stopped waiting for job claim");
                return;
            }
        };
        let _claim = match claim {
            Ok(claim) => claim,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to claim render job");
                return;
            }
        };

        let started = services.clock.now();
        let claimed = jobs.update(job_id, |job| {
            match job.status {
                JobStatus::Queued => {}
                // Holding the claim means whoever set this is gone.
                JobStatus::Running => {
                    tracing::warn!(job_id, "Taking over job abandoned mid-render");
                }
                _ => return Ok(None),
            }
            job.status = JobStatus::Running;
            job.started_at = Some(started);
            Ok(Some(job.clone()))
        });
        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(job_id, "Skipping job that is no longer queued");
                return;
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to mark render job running");
                return;
            }
        };
        self.emit(&job);
        tracing::info!(
            job_id,
            kind = %job.kind,
            project_id = %job.project_id,
            version = job.version,
            "Render job started"
        );

        let result = self.renderer.execute(&job).await;

        let finished = services.clock.now();
        let recorded = jobs.update(job_id, |job| {
            match &result {
                Ok(outcome) => {
                    job.status = JobStatus::Succeeded;
                    job.output = Some(outcome.output.clone());
                    job.reused_existing = outcome.reused;
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    job.error_kind = Some(e.kind());
                }
            }
            job.finished_at = Some(finished);
            Ok(job.clone())
        });

        match (recorded, &result) {
            (Ok(job), Ok(outcome)) => {
                tracing::info!(
                    job_id,
                    output = %outcome.output,
                    reused_existing = outcome.reused,
                    "Render job succeeded"
                );
                self.emit(&job);
            }
            (Ok(job), Err(e)) => {
                tracing::error!(job_id, error = %e, "Render job failed");
                self.emit(&job);
            }
            (Err(e), _) => {
                tracing::error!(job_id, error = %e, "Failed to record render job result");
            }
        }
    }
}

fn spawn_pool(
    inner: &Arc<QueueInner>,
    kind: JobKind,
    receiver: mpsc::UnboundedReceiver<String>,
    workers: usize,
) -> Vec<JoinHandle<()>> {
    let receiver: JobReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
    (0..workers)
        .map(|index| {
            let inner = Arc::clone(inner);
            let receiver = Arc::clone(&receiver);
            let shutdown = inner.shutdown.subscribe();
            tokio::spawn(worker_loop(inner, kind, index, receiver, shutdown))
        })
        .collect()
}

async fn worker_loop(
    inner: Arc<QueueInner>,
    kind: JobKind,
    index: usize,
    receiver: JobReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(%kind, worker = index, "Render worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                job_id = receiver.recv() => job_id,
            }
        };
        let Some(job_id) = next else {
            break;
        };
        inner.run_job(&job_id).await;
    }
    tracing::debug!(%kind, worker = index, "Render worker stopped");
}

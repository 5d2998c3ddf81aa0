//! What a worker does with one job.

use std::sync::Arc;

use cutlog_common::clock::SharedClock;
use cutlog_common::config::{EditLogConfig, QualityProfile, RenderConfig, RetentionPolicy};
use cutlog_common::error::{CutlogError, CutlogResult};
use cutlog_content_store::store::ContentStore;
use cutlog_edit_log::EditLog;
use cutlog_project_model::collection::Database;
use cutlog_project_model::job::{JobKind, RenderJob};
use cutlog_project_model::layout::ArtifactLayout;
use cutlog_retention::{ExportRegistry, GarbageCollector};

use crate::claims::Claims;
use crate::targets::TargetLocks;
use crate::transcoder::{RenderRequest, Transcoder};

/// Everything a render needs, shared by all workers.
#[derive(Debug, Clone)]
pub struct RenderServices {
    pub db: Arc<Database>,
    pub layout: ArtifactLayout,
    pub clock: SharedClock,
    pub edit_log: Arc<EditLog>,
    pub content: Arc<ContentStore>,
    pub registry: Arc<ExportRegistry>,
    pub gc: Arc<GarbageCollector>,
    pub transcoder: Arc<dyn Transcoder>,
}

impl RenderServices {
    /// Open every store under one storage root.
    pub fn open(
        layout: ArtifactLayout,
        clock: SharedClock,
        edit_log: &EditLogConfig,
        transcoder: Arc<dyn Transcoder>,
    ) -> CutlogResult<Self> {
        let db = Database::open(layout.db_dir())?;
        Ok(Self {
            edit_log: Arc::new(EditLog::new(Arc::clone(&db), Arc::clone(&clock), edit_log)),
            content: Arc::new(ContentStore::new(
                Arc::clone(&db),
                layout.clone(),
                Arc::clone(&clock),
            )),
            registry: Arc::new(ExportRegistry::new(Arc::clone(&db), Arc::clone(&clock))),
            gc: Arc::new(GarbageCollector::new(
                Arc::clone(&db),
                layout.clone(),
                Arc::clone(&clock),
            )),
            db,
            layout,
            clock,
            transcoder,
        })
    }
}

/// Result of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JobOutcome {
    pub output: String,
    pub reused: bool,
}

/// Executes proxy and export jobs.
///
/// A job holds its target's lock from the existence check until the project
/// pointer is updated, so duplicate jobs for one target run one after the
/// other and every duplicate after the first finds the output in place.
/// The lock includes a claim record, so this holds for duplicates submitted
/// to different processes as well.
#[derive(Debug)]
pub(crate) struct Renderer {
    services: RenderServices,
    proxy_profile: QualityProfile,
    export_profile: QualityProfile,
    retention: RetentionPolicy,
    claims: Arc<Claims>,
    targets: TargetLocks,
}

impl Renderer {
    pub fn new(services: RenderServices, config: &RenderConfig, retention: RetentionPolicy) -> Self {
        let claims = Arc::new(Claims::new(
            Arc::clone(&services.db),
            Arc::clone(&services.clock),
            config.claim_lease_secs,
        ));
        Self {
            services,
            proxy_profile: config.proxy_profile.clone(),
            export_profile: config.export_profile.clone(),
            retention,
            targets: TargetLocks::new(Arc::clone(&claims)),
            claims,
        }
    }

    pub fn services(&self) -> &RenderServices {
        &self.services
    }

    pub fn claims(&self) -> &Arc<Claims> {
        &self.claims
    }

    pub async fn execute(&self, job: &RenderJob) -> CutlogResult<JobOutcome> {
        match job.kind {
            JobKind::Proxy => self.proxy(&job.project_id, job.version).await,
            JobKind::Export => self.export(&job.project_id, job.version).await,
        }
    }

    async fn proxy(&self, project_id: &str, version: u64) -> CutlogResult<JobOutcome> {
        let key = ArtifactLayout::proxy_key(project_id, version);
        let _target = self.targets.lock(&key).await?;

        let reused = self.services.layout.resolve(&key).is_file();
        if reused {
            tracing::info!(project_id, version, "Proxy already rendered; skipping transcoder");
        } else {
            self.render_into(&key, project_id, version, &self.proxy_profile)
                .await?;
        }

        let now = self.services.clock.now();
        let advanced = self.services.db.projects.update(project_id, |project| {
            Ok(project.record_proxy(version, key.clone(), now))
        })?;
        if !advanced {
            tracing::debug!(project_id, version, "Newer proxy already current; pointer unchanged");
        }
        Ok(JobOutcome {
            output: key,
            reused,
        })
    }

    async fn export(&self, project_id: &str, version: u64) -> CutlogResult<JobOutcome> {
        let key = ArtifactLayout::export_key(project_id, version);
        let _target = self.targets.lock(&key).await?;

        // Archived exports count as existing; their bytes are still on disk.
        if let Some(existing) = self.services.registry.find(project_id, version)? {
            tracing::info!(
                project_id,
                version,
                state = %existing.state,
                "Export already recorded; skipping transcoder"
            );
            self.point_export(project_id, version, &existing.location)?;
            return Ok(JobOutcome {
                output: existing.location,
                reused: true,
            });
        }

        let path = self.services.layout.resolve(&key);
        let (size_bytes, reused) = if path.is_file() {
            // Rendered before a crash, never recorded.
            tracing::info!(project_id, version, "Recording previously rendered export");
            (std::fs::metadata(&path)?.len(), true)
        } else {
            let size = self
                .render_into(&key, project_id, version, &self.export_profile)
                .await?;
            (size, false)
        };

        let (export, _) = self
            .services
            .registry
            .record(project_id, version, &key, size_bytes)?;
        self.point_export(project_id, version, &export.location)?;

        if let Err(e) = self.services.gc.mark_project(project_id, &self.retention) {
            tracing::warn!(project_id, error = %e, "Retention mark after export failed");
        }
        Ok(JobOutcome {
            output: export.location,
            reused,
        })
    }

    fn point_export(&self, project_id: &str, version: u64, location: &str) -> CutlogResult<()> {
        let now = self.services.clock.now();
        let advanced = self.services.db.projects.update(project_id, |project| {
            Ok(project.record_export(version, location, now))
        })?;
        if !advanced {
            tracing::debug!(project_id, version, "Newer export already current; pointer unchanged");
        }
        Ok(())
    }

    /// Render into `<key>.partial` and promote it to `key`. Returns the
    /// artifact size. The partial file never survives a failure.
    async fn render_into(
        &self,
        key: &str,
        project_id: &str,
        version: u64,
        profile: &QualityProfile,
    ) -> CutlogResult<u64> {
        let project = self.services.edit_log.project(project_id)?;
        let asset_id = project.source_asset_id.ok_or_else(|| {
            CutlogError::validation(format!("project {project_id} has no source asset"))
        })?;
        let source = self.services.content.source_path(&asset_id)?;
        let operations = self.services.edit_log.operations_up_to(project_id, version)?;

        let output = self.services.layout.resolve(key);
        let partial = self.services.layout.partial_path(key);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let request = RenderRequest {
            source,
            operations,
            profile: profile.clone(),
            output: partial.clone(),
        };
        let transcoder = &self.services.transcoder;
        tracing::info!(
            project_id,
            version,
            profile = %profile.name,
            operations = request.operations.len(),
            transcoder = transcoder.name(),
            "Rendering"
        );

        let rendered = match transcoder.render(&request).await {
            Ok(()) => promote(&partial, &output, transcoder.name()),
            Err(e) => Err(e),
        };
        if rendered.is_err() {
            std::fs::remove_file(&partial).ok();
        }
        rendered
    }
}

fn promote(
    partial: &std::path::Path,
    output: &std::path::Path,
    transcoder: &str,
) -> CutlogResult<u64> {
    let size = std::fs::metadata(partial)
        .map_err(|_| CutlogError::transcoding(format!("{transcoder} produced no output")))?
        .len();
    std::fs::rename(partial, output)?;
    Ok(size)
}

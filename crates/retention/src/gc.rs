//! Three-stage export garbage collection.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use cutlog_common::clock::{age, SharedClock};
use cutlog_common::config::RetentionPolicy;
use cutlog_common::error::{CutlogError, CutlogResult};
use cutlog_project_model::collection::Database;
use cutlog_project_model::export::{ExportState, ExportVersion};
use cutlog_project_model::layout::ArtifactLayout;

/// What a mark pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReport {
    /// Exports flagged by this pass.
    pub marked: Vec<String>,
    /// Exports exempt as one of a project's newest.
    pub kept_latest: usize,
    /// Old enough, but pinned.
    pub pinned: Vec<String>,
    /// Unpinned exports younger than the TTL.
    pub too_recent: usize,
}

impl MarkReport {
    fn absorb(&mut self, other: MarkReport) {
        self.marked.extend(other.marked);
        self.kept_latest += other.kept_latest;
        self.pinned.extend(other.pinned);
        self.too_recent += other.too_recent;
    }
}

/// An export that failed one stage of GC.
#[derive(Debug)]
pub struct GcFailure {
    pub export_id: String,
    pub error: CutlogError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedExport {
    pub export_id: String,
    pub location: String,
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
pub struct ArchiveReport {
    pub archived: Vec<ArchivedExport>,
    pub failed: Vec<GcFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedExport {
    pub export_id: String,
    pub bytes_freed: u64,
}

#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: Vec<DeletedExport>,
    pub failed: Vec<GcFailure>,
    pub bytes_freed: u64,
}

/// Applies retention policy to the export registry.
///
/// Every per-export step runs inside that export's record critical section,
/// the same one `ExportRegistry::toggle_pin` takes, so a pin either lands
/// before the step and vetoes it or after it and undoes it.
#[derive(Debug)]
pub struct GarbageCollector {
    db: Arc<Database>,
    layout: ArtifactLayout,
    clock: SharedClock,
}

impl GarbageCollector {
    pub fn new(db: Arc<Database>, layout: ArtifactLayout, clock: SharedClock) -> Self {
        Self { db, layout, clock }
    }

    /// Mark across every project.
    pub fn calculate(&self, ttl_days: u32, keep_latest_n: usize) -> CutlogResult<MarkReport> {
        let mut by_project: BTreeMap<String, Vec<ExportVersion>> = BTreeMap::new();
        for export in self.db.export_versions.list()? {
            by_project
                .entry(export.project_id.clone())
                .or_default()
                .push(export);
        }

        let mut report = MarkReport::default();
        for (_, exports) in by_project {
            report.absorb(self.mark_exports(exports, ttl_days, keep_latest_n)?);
        }
        tracing::info!(
            marked = report.marked.len(),
            pinned = report.pinned.len(),
            ttl_days,
            keep_latest_n,
            "Mark pass complete"
        );
        Ok(report)
    }

    /// Mark one project's exports; runs after every export render.
    pub fn mark_project(&self, project_id: &str, policy: &RetentionPolicy) -> CutlogResult<MarkReport> {
        let exports: Vec<_> = self
            .db
            .export_versions
            .list()?
            .into_iter()
            .filter(|e| e.project_id == project_id)
            .collect();
        let report = self.mark_exports(exports, policy.ttl_days, policy.keep_latest_n)?;
        if !report.marked.is_empty() {
            tracing::info!(project_id, marked = ?report.marked, "Marked exports for GC");
        }
        Ok(report)
    }

    fn mark_exports(
        &self,
        mut exports: Vec<ExportVersion>,
        ttl_days: u32,
        keep_latest_n: usize,
    ) -> CutlogResult<MarkReport> {
        let now = self.clock.now();
        let ttl = Duration::days(i64::from(ttl_days));
        let mut report = MarkReport::default();

        exports.retain(ExportVersion::is_live);
        exports.sort_by(|a, b| b.version.cmp(&a.version));

        for (rank, export) in exports.iter().enumerate() {
            if rank < keep_latest_n {
                report.kept_latest += 1;
                continue;
            }
            if export.state != ExportState::Active {
                continue;
            }
            if export.pinned {
                report.pinned.push(export.id.clone());
                continue;
            }
            if age(now, export.created_at) <= ttl {
                report.too_recent += 1;
                continue;
            }

            let collection = &self.db.export_versions;
            let marked = collection.with_lock(&export.id, || -> CutlogResult<bool> {
                let Some(mut current) = collection.get(&export.id)? else {
                    return Ok(false);
                };
                // A pin may have landed since the listing.
                if current.pinned || current.state != ExportState::Active {
                    return Ok(false);
                }
                let changed = current.mark(now)?;
                if changed {
                    collection.put(&current)?;
                }
                Ok(changed)
            })?;
            if marked {
                tracing::debug!(export_id = %export.id, "Marked export as GC candidate");
                report.marked.push(export.id.clone());
            }
        }
        Ok(report)
    }

    /// Move candidates' bytes into the archive. Each id succeeds or fails on
    /// its own.
    pub fn archive(&self, export_ids: &[String]) -> ArchiveReport {
        let mut report = ArchiveReport::default();
        for id in export_ids {
            match self.archive_one(id) {
                Ok(archived) => {
                    tracing::info!(export_id = %id, location = %archived.location, "Archived export");
                    report.archived.push(archived);
                }
                Err(error) => {
                    tracing::warn!(export_id = %id, error = %error, "Failed to archive export");
                    report.failed.push(GcFailure {
                        export_id: id.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    fn archive_one(&self, export_id: &str) -> CutlogResult<ArchivedExport> {
        let exports = &self.db.export_versions;
        exports.with_lock(export_id, || {
            let mut export = exports.require(export_id)?;
            export.ensure_archivable()?;

            let previous = export.location.clone();
            let from = self.layout.resolve(&previous);
            let key = ArtifactLayout::archive_key(&export.id, export.version);
            let to = self.layout.resolve(&key);
            move_artifact(&from, &to)?;

            export.archive(key.clone(), self.clock.now())?;
            if let Err(e) = exports.put(&export) {
                // Keep bytes where the stored record says they are.
                if let Err(back) = move_artifact(&to, &from) {
                    tracing::error!(export_id, error = %back, "Failed to restore export bytes after record write failure");
                }
                return Err(e);
            }
            self.repoint_project(&export.project_id, &previous, Some(&key));
            Ok(ArchivedExport {
                export_id: export.id,
                location: key,
                size_bytes: export.size_bytes,
            })
        })
    }

    /// Permanently remove archived exports. Refuses to touch anything
    /// without confirmation.
    pub fn delete(&self, export_ids: &[String], confirmed: bool) -> CutlogResult<DeleteReport> {
        if !confirmed {
            return Err(CutlogError::validation(
                "deleting archived exports requires explicit confirmation",
            ));
        }

        let mut report = DeleteReport::default();
        for id in export_ids {
            match self.delete_one(id) {
                Ok(bytes_freed) => {
                    tracing::info!(export_id = %id, bytes_freed, "Deleted archived export");
                    report.bytes_freed += bytes_freed;
                    report.deleted.push(DeletedExport {
                        export_id: id.clone(),
                        bytes_freed,
                    });
                }
                Err(error) => {
                    tracing::warn!(export_id = %id, error = %error, "Failed to delete export");
                    report.failed.push(GcFailure {
                        export_id: id.clone(),
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    fn delete_one(&self, export_id: &str) -> CutlogResult<u64> {
        let exports = &self.db.export_versions;
        exports.with_lock(export_id, || {
            let mut export = exports.require(export_id)?;
            export.ensure_deletable()?;

            let path = self.layout.resolve(&export.location);
            let freed = match std::fs::metadata(&path) {
                Ok(meta) => {
                    std::fs::remove_file(&path)?;
                    meta.len()
                }
                // Already gone; finish the transition.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };

            export.mark_deleted(self.clock.now())?;
            exports.put(&export)?;
            self.repoint_project(&export.project_id, &export.location, None);
            Ok(freed)
        })
    }

    /// Keep a project's export pointer on the bytes it names: follow them
    /// into the archive, or clear it once they are deleted.
    fn repoint_project(&self, project_id: &str, from: &str, to: Option<&str>) {
        let now = self.clock.now();
        let result = self.db.projects.update(project_id, |project| {
            if project.latest_export_key.as_deref() != Some(from) {
                return Ok(());
            }
            match to {
                Some(to) => project.latest_export_key = Some(to.to_string()),
                None => {
                    project.latest_export_key = None;
                    project.latest_export_version = None;
                }
            }
            project.modified_at = now;
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(project_id, error = %e, "Failed to update project export pointer");
        }
    }

    pub fn list_candidates(&self) -> CutlogResult<Vec<ExportVersion>> {
        let mut candidates: Vec<_> = self
            .db
            .export_versions
            .list()?
            .into_iter()
            .filter(|e| e.state == ExportState::GcCandidate)
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(candidates)
    }
}

/// Rename, or copy and remove when the archive sits on another filesystem.
fn move_artifact(from: &Path, to: &Path) -> CutlogResult<()> {
    if !from.exists() {
        return Err(CutlogError::not_found(
            "artifact",
            from.display().to_string(),
        ));
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    tracing::debug!(from = %from.display(), to = %to.display(), "Rename failed; copying");
    let partial = to.with_extension("partial");
    if let Err(e) = std::fs::copy(from, &partial).and_then(|_| std::fs::rename(&partial, to)) {
        std::fs::remove_file(&partial).ok();
        return Err(e.into());
    }
    std::fs::remove_file(from)?;
    Ok(())
}

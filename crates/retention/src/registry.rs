//! Export version registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use cutlog_common::clock::SharedClock;
use cutlog_common::error::CutlogResult;
use cutlog_project_model::collection::Database;
use cutlog_project_model::export::{ExportState, ExportVersion};

/// Per-state totals across all exports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySummary {
    pub counts: BTreeMap<String, usize>,
    pub bytes: BTreeMap<String, u64>,
    pub pinned: usize,
}

/// One record per rendered `(projectId, version)`.
#[derive(Debug)]
pub struct ExportRegistry {
    db: Arc<Database>,
    clock: SharedClock,
}

impl ExportRegistry {
    pub fn new(db: Arc<Database>, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Create the export record for a finished render, or return the one
    /// that already exists. The flag is `true` when this call created (or
    /// revived a deleted) record.
    pub fn record(
        &self,
        project_id: &str,
        version: u64,
        location: &str,
        size_bytes: u64,
    ) -> CutlogResult<(ExportVersion, bool)> {
        let id = ExportVersion::id_for(project_id, version);
        let exports = &self.db.export_versions;
        exports.with_lock(&id, || {
            let now = self.clock.now();
            match exports.get(&id)? {
                Some(existing) if existing.is_live() => Ok((existing, false)),
                Some(mut deleted) => {
                    deleted.revive(location, size_bytes, now);
                    exports.put(&deleted)?;
                    tracing::info!(export_id = %id, "Revived deleted export with a fresh render");
                    Ok((deleted, true))
                }
                None => {
                    let export = ExportVersion::new(project_id, version, location, size_bytes, now);
                    if exports.insert_new(&export)? {
                        tracing::info!(export_id = %id, size_bytes, "Registered export version");
                        Ok((export, true))
                    } else {
                        Ok((exports.require(&id)?, false))
                    }
                }
            }
        })
    }

    /// Live export for a project version, if one exists.
    pub fn find(&self, project_id: &str, version: u64) -> CutlogResult<Option<ExportVersion>> {
        let found = self
            .db
            .export_versions
            .get(&ExportVersion::id_for(project_id, version))?;
        Ok(found.filter(ExportVersion::is_live))
    }

    pub fn get(&self, export_id: &str) -> CutlogResult<ExportVersion> {
        self.db.export_versions.require(export_id)
    }

    pub fn all(&self) -> CutlogResult<Vec<ExportVersion>> {
        self.db.export_versions.list()
    }

    /// A project's exports, newest version first.
    pub fn for_project(&self, project_id: &str) -> CutlogResult<Vec<ExportVersion>> {
        let mut exports: Vec<_> = self
            .all()?
            .into_iter()
            .filter(|e| e.project_id == project_id)
            .collect();
        exports.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(exports)
    }

    /// Flip an export's pin and return the new value.
    pub fn toggle_pin(&self, export_id: &str) -> CutlogResult<bool> {
        let pinned = self
            .db
            .export_versions
            .update(export_id, ExportVersion::toggle_pin)?;
        tracing::info!(export_id, pinned, "Toggled export pin");
        Ok(pinned)
    }

    pub fn summary(&self) -> CutlogResult<RegistrySummary> {
        let mut summary = RegistrySummary::default();
        for export in self.all()? {
            let state = export.state.to_string();
            *summary.counts.entry(state.clone()).or_default() += 1;
            if export.state != ExportState::Deleted {
                *summary.bytes.entry(state).or_default() += export.size_bytes;
            }
            if export.pinned {
                summary.pinned += 1;
            }
        }
        Ok(summary)
    }
}

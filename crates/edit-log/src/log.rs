//! The edit log and project registry.

use std::sync::Arc;

use cutlog_common::clock::SharedClock;
use cutlog_common::config::EditLogConfig;
use cutlog_common::error::{CutlogError, CutlogResult};
use cutlog_common::locks::KeyedLocks;
use cutlog_project_model::collection::Database;
use cutlog_project_model::edit::{
    flatten_operations, validate_operations, EditOperation, EditOperationBatch,
};
use cutlog_project_model::project::Project;

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    /// The version this batch produced.
    pub version: u64,
    /// Identifier of the stored batch.
    pub batch_id: String,
}

/// Append-only, per-project versioned edit log.
#[derive(Debug)]
pub struct EditLog {
    db: Arc<Database>,
    clock: SharedClock,
    project_locks: KeyedLocks,
    max_append_retries: u32,
}

impl EditLog {
    pub fn new(db: Arc<Database>, clock: SharedClock, config: &EditLogConfig) -> Self {
        Self {
            db,
            clock,
            project_locks: KeyedLocks::new(),
            max_append_retries: config.max_append_retries,
        }
    }

    /// Create an empty project at version 0.
    pub fn create_project(
        &self,
        name: impl Into<String>,
        source_asset_id: Option<String>,
    ) -> CutlogResult<Project> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CutlogError::validation("project name must not be empty"));
        }
        let project = Project::new(name, source_asset_id, self.clock.now());
        if !self.db.projects.insert_new(&project)? {
            return Err(CutlogError::conflict(format!(
                "project id {} already exists",
                project.id
            )));
        }
        tracing::info!(project_id = %project.id, name = %project.name, "Created project");
        Ok(project)
    }

    /// Fetch a project.
    pub fn project(&self, project_id: &str) -> CutlogResult<Project> {
        self.db.projects.require(project_id)
    }

    /// All projects.
    pub fn projects(&self) -> CutlogResult<Vec<Project>> {
        self.db.projects.list()
    }

    /// Point a project at a different source asset, returning the previous
    /// one. Reference counts are the caller's responsibility.
    pub fn set_source(
        &self,
        project_id: &str,
        asset_id: Option<String>,
    ) -> CutlogResult<Option<String>> {
        let now = self.clock.now();
        self.db.projects.update(project_id, |project| {
            let previous = std::mem::replace(&mut project.source_asset_id, asset_id);
            project.modified_at = now;
            Ok(previous)
        })
    }

    /// Append one batch of operations and return the version it produced.
    pub fn append(
        &self,
        project_id: &str,
        user_id: &str,
        ops: Vec<EditOperation>,
    ) -> CutlogResult<AppendReceipt> {
        validate_operations(&ops)?;
        if user_id.trim().is_empty() {
            return Err(CutlogError::validation("user id must not be empty"));
        }

        self.project_locks.with(project_id, || {
            let mut attempt: u32 = 0;
            loop {
                match self.try_append(project_id, user_id, &ops) {
                    Err(CutlogError::Conflict { message })
                        if attempt < self.max_append_retries =>
                    {
                        attempt += 1;
                        tracing::debug!(
                            project_id,
                            attempt,
                            %message,
                            "Append lost version race; retrying"
                        );
                    }
                    Err(CutlogError::Conflict { message }) => {
                        tracing::warn!(
                            project_id,
                            attempts = attempt + 1,
                            "Append gave up after repeated version races"
                        );
                        return Err(CutlogError::conflict(message));
                    }
                    other => return other,
                }
            }
        })
    }

    fn try_append(
        &self,
        project_id: &str,
        user_id: &str,
        ops: &[EditOperation],
    ) -> CutlogResult<AppendReceipt> {
        let version = self.committed_version(project_id)? + 1;
        let batch = EditOperationBatch::new(
            project_id,
            version,
            ops.to_vec(),
            user_id,
            self.clock.now(),
        );

        // Creating the batch record is the commit point for `version`.
        if !self.db.edit_operations.insert_new(&batch)? {
            self.roll_forward(project_id)?;
            return Err(CutlogError::conflict(format!(
                "version {version} of project {project_id} was claimed concurrently"
            )));
        }
        self.advance_to(project_id, version)?;

        tracing::info!(
            project_id,
            version,
            operations = ops.len(),
            user_id,
            "Appended edit batch"
        );
        Ok(AppendReceipt {
            version,
            batch_id: batch.id,
        })
    }

    /// Advance `currentVersion` over batches that were committed but not yet
    /// counted (a concurrent writer, or a crash between the two writes).
    fn roll_forward(&self, project_id: &str) -> CutlogResult<()> {
        loop {
            let project = self.db.projects.require(project_id)?;
            let next = project.current_version + 1;
            let next_id = EditOperationBatch::id_for(project_id, next);
            if !self.db.edit_operations.contains(&next_id)? {
                return Ok(());
            }
            tracing::debug!(project_id, version = next, "Rolling version counter forward");
            self.advance_to(project_id, next)?;
        }
    }

    fn advance_to(&self, project_id: &str, version: u64) -> CutlogResult<()> {
        let now = self.clock.now();
        self.db.projects.update(project_id, |project| {
            if project.current_version < version {
                project.current_version = version;
                project.modified_at = now;
            }
            Ok(())
        })
    }

    /// All batches with `batch.version <= version`, ascending.
    pub fn list_up_to(
        &self,
        project_id: &str,
        version: u64,
    ) -> CutlogResult<Vec<EditOperationBatch>> {
        let last = version.min(self.committed_version(project_id)?);
        (1..=last)
            .map(|v| {
                let id = EditOperationBatch::id_for(project_id, v);
                self.db.edit_operations.get(&id)?.ok_or_else(|| {
                    CutlogError::Other(anyhow::anyhow!(
                        "edit log of project {project_id} has no batch for version {v}"
                    ))
                })
            })
            .collect()
    }

    /// The edit-decision list for `version`: every batch's operations, in order.
    pub fn operations_up_to(
        &self,
        project_id: &str,
        version: u64,
    ) -> CutlogResult<Vec<EditOperation>> {
        Ok(flatten_operations(&self.list_up_to(project_id, version)?))
    }

    /// Current version of a project; 0 before the first append.
    pub fn latest_version(&self, project_id: &str) -> CutlogResult<u64> {
        self.committed_version(project_id)
    }

    /// Highest committed version. Normally the stored counter; when another
    /// process committed batches it has not counted yet, those are included.
    fn committed_version(&self, project_id: &str) -> CutlogResult<u64> {
        let mut version = self.db.projects.require(project_id)?.current_version;
        while self
            .db
            .edit_operations
            .contains(&EditOperationBatch::id_for(project_id, version + 1))?
        {
            version += 1;
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutlog_common::clock::system_clock;
    use serde_json::json;

    fn log(dir: &std::path::Path) -> EditLog {
        let db = Database::open(dir).unwrap();
        EditLog::new(db, system_clock(), &EditLogConfig::default())
    }

    fn op(t: &str) -> EditOperation {
        EditOperation::new(t, json!({}))
    }

    #[test]
    fn test_append_assigns_sequential_versions() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let p = log.create_project("demo", None).unwrap();
        assert_eq!(log.latest_version(&p.id).unwrap(), 0);

        let first = log.append(&p.id, "u1", vec![op("opA")]).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.batch_id, format!("{}-v1", p.id));

        let second = log.append(&p.id, "u1", vec![op("opB"), op("opC")]).unwrap();
        assert_eq!(second.version, 2);

        let types: Vec<_> = log
            .operations_up_to(&p.id, 2)
            .unwrap()
            .into_iter()
            .map(|o| o.op_type)
            .collect();
        assert_eq!(types, vec!["opA", "opB", "opC"]);
    }

    #[test]
    fn test_list_up_to_clamps_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let p = log.create_project("demo", None).unwrap();
        for t in ["a", "b", "c"] {
            log.append(&p.id, "u1", vec![op(t)]).unwrap();
        }

        let versions: Vec<_> = log
            .list_up_to(&p.id, 2)
            .unwrap()
            .iter()
            .map(|b| b.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(log.list_up_to(&p.id, 99).unwrap().len(), 3);
        assert!(log.list_up_to(&p.id, 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_batch_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let p = log.create_project("demo", None).unwrap();

        let err = log.append(&p.id, "u1", vec![]).unwrap_err();
        assert!(matches!(err, CutlogError::Validation { .. }));
        let err = log.append(&p.id, "", vec![op("a")]).unwrap_err();
        assert!(matches!(err, CutlogError::Validation { .. }));
        assert_eq!(log.latest_version(&p.id).unwrap(), 0);
    }

    #[test]
    fn test_unknown_project_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let err = log.append("missing", "u1", vec![op("a")]).unwrap_err();
        assert!(matches!(err, CutlogError::NotFound { .. }));
        assert!(matches!(
            log.latest_version("missing"),
            Err(CutlogError::NotFound { .. })
        ));
    }

    #[test]
    fn test_orphaned_batch_is_rolled_forward_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let log = EditLog::new(Arc::clone(&db), system_clock(), &EditLogConfig::default());
        let p = log.create_project("demo", None).unwrap();
        log.append(&p.id, "u1", vec![op("a")]).unwrap();

        // Simulate a writer that committed v2 and crashed before counting it.
        let orphan = EditOperationBatch::new(&p.id, 2, vec![op("b")], "u2", chrono::Utc::now());
        assert!(db.edit_operations.insert_new(&orphan).unwrap());

        let receipt = log.append(&p.id, "u1", vec![op("c")]).unwrap();
        assert_eq!(receipt.version, 3);
        let types: Vec<_> = log
            .operations_up_to(&p.id, 3)
            .unwrap()
            .into_iter()
            .map(|o| o.op_type)
            .collect();
        assert_eq!(types, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_set_source_returns_previous() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let p = log.create_project("demo", Some("sha256-a".to_string())).unwrap();
        let previous = log.set_source(&p.id, Some("sha256-b".to_string())).unwrap();
        assert_eq!(previous.as_deref(), Some("sha256-a"));
        assert_eq!(
            log.project(&p.id).unwrap().source_asset_id.as_deref(),
            Some("sha256-b")
        );
    }
}

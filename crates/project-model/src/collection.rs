//! Durable keyed record collections.
//!
//! Each collection is a directory holding one JSON file per record
//! (`<dir>/<key>.json`). Replacing a record writes a temporary sibling and
//! renames it over the old file, so readers see either the old or the new
//! record, never a torn one. Creating a record with
//! [`Collection::insert_new`] hard-links the fully written temporary file
//! into place, which fails atomically when the key already exists; this is
//! the compare-and-swap primitive the edit log and content store build on.

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use cutlog_common::error::{CutlogError, CutlogResult};
use cutlog_common::locks::KeyedLocks;

use crate::asset::SourceAsset;
use crate::claim::Claim;
use crate::edit::EditOperationBatch;
use crate::export::ExportVersion;
use crate::job::RenderJob;
use crate::project::Project;

/// A record that can be stored in a [`Collection`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Human-readable record kind used in not-found errors.
    const KIND: &'static str;

    /// Storage key (also the record identifier).
    fn key(&self) -> &str;
}

/// A directory of JSON records keyed by identifier.
#[derive(Debug)]
pub struct Collection<T> {
    dir: PathBuf,
    locks: KeyedLocks,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Collection<T> {
    /// Open (creating if needed) the collection `name` under `db_dir`.
    pub fn open(db_dir: impl AsRef<Path>, name: &'static str) -> CutlogResult<Self> {
        let dir = db_dir.as_ref().join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: KeyedLocks::new(),
            _record: PhantomData,
        })
    }

    /// Fetch a record.
    pub fn get(&self, key: &str) -> CutlogResult<Option<T>> {
        let path = self.path_for(key)?;
        read_record(&path)
    }

    /// Fetch a record or fail with a not-found error.
    pub fn require(&self, key: &str) -> CutlogResult<T> {
        self.get(key)?
            .ok_or_else(|| CutlogError::not_found(T::KIND, key))
    }

    /// Whether a record exists.
    pub fn contains(&self, key: &str) -> CutlogResult<bool> {
        Ok(self.path_for(key)?.exists())
    }

    /// Create or replace a record.
    pub fn put(&self, record: &T) -> CutlogResult<()> {
        let path = self.path_for(record.key())?;
        let tmp = self.write_temp(record)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            std::fs::remove_file(&tmp).ok();
            return Err(e.into());
        }
        Ok(())
    }

    /// Create a record only if its key is unused.
    ///
    /// Returns `false` without touching the stored record when the key is
    /// already taken.
    pub fn insert_new(&self, record: &T) -> CutlogResult<bool> {
        let path = self.path_for(record.key())?;
        let tmp = self.write_temp(record)?;
        let linked = std::fs::hard_link(&tmp, &path);
        std::fs::remove_file(&tmp).ok();
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write one record inside its critical section.
    ///
    /// When `f` returns an error nothing is written. Updates to the same key
    /// are serialized; updates to different keys run concurrently.
    pub fn update<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut T) -> CutlogResult<R>,
    ) -> CutlogResult<R> {
        self.locks.with(key, || {
            let mut record = self.require(key)?;
            let result = f(&mut record)?;
            self.put(&record)?;
            Ok(result)
        })
    }

    /// Run `f` inside the critical section of `key`.
    ///
    /// For multi-step work (check, move bytes, write) that must not
    /// interleave with other updates to the same record. `f` must use the
    /// unlocked accessors (`get`, `put`, `insert_new`, `remove`); calling
    /// `update` or `remove_if` for the same key from inside deadlocks.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        self.locks.with(key, f)
    }

    /// Remove a record. Returns whether it existed.
    pub fn remove(&self, key: &str) -> CutlogResult<bool> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a record if `f` approves it, inside the record's critical
    /// section. `f` may perform cleanup before approving.
    pub fn remove_if(
        &self,
        key: &str,
        f: impl FnOnce(&T) -> CutlogResult<bool>,
    ) -> CutlogResult<bool> {
        self.locks.with(key, || {
            let Some(record) = self.get(key)? else {
                return Ok(false);
            };
            if !f(&record)? {
                return Ok(false);
            }
            self.remove(key)
        })
    }

    /// All record keys, sorted.
    pub fn keys(&self) -> CutlogResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// All records, sorted by key.
    pub fn list(&self) -> CutlogResult<Vec<T>> {
        let mut records = Vec::new();
        for key in self.keys()? {
            // A record removed between listing and reading is simply skipped.
            if let Some(record) = self.get(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn path_for(&self, key: &str) -> CutlogResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn write_temp(&self, record: &T) -> CutlogResult<PathBuf> {
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", record.key(), uuid::Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(record)?;
        let mut file = std::fs::File::create(&tmp)?;
        let written = file.write_all(&json).and_then(|_| file.sync_all());
        if let Err(e) = written {
            std::fs::remove_file(&tmp).ok();
            return Err(e.into());
        }
        Ok(tmp)
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> CutlogResult<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Keys become file names, so they must stay inside the collection directory.
pub fn validate_key(key: &str) -> CutlogResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CutlogError::validation(format!(
            "invalid identifier {key:?}: use ASCII letters, digits, '-', '_' or '.'"
        )))
    }
}

/// The durable collections of a storage root.
#[derive(Debug)]
pub struct Database {
    pub projects: Collection<Project>,
    pub edit_operations: Collection<EditOperationBatch>,
    pub export_versions: Collection<ExportVersion>,
    pub source_assets: Collection<SourceAsset>,
    pub render_jobs: Collection<RenderJob>,
    pub claims: Collection<Claim>,
}

impl Database {
    /// Open every collection under `db_dir`.
    pub fn open(db_dir: impl AsRef<Path>) -> CutlogResult<Arc<Self>> {
        let db_dir = db_dir.as_ref();
        tracing::debug!(path = %db_dir.display(), "Opening record collections");
        Ok(Arc::new(Self {
            projects: Collection::open(db_dir, "projects")?,
            edit_operations: Collection::open(db_dir, "editOperations")?,
            export_versions: Collection::open(db_dir, "exportVersions")?,
            source_assets: Collection::open(db_dir, "sourceAssets")?,
            render_jobs: Collection::open(db_dir, "renderJobs")?,
            claims: Collection::open(db_dir, "claims")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn projects(dir: &Path) -> Collection<Project> {
        Collection::open(dir, "projects").unwrap()
    }

    #[test]
    fn test_put_get_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let col = projects(dir.path());
        let project = Project::new("demo", None, Utc::now());

        assert!(col.get(&project.id).unwrap().is_none());
        col.put(&project).unwrap();
        let loaded = col.require(&project.id).unwrap();
        assert_eq!(loaded.name, "demo");
        assert!(dir
            .path()
            .join("projects")
            .join(format!("{}.json", project.id))
            .exists());
    }

    #[test]
    fn test_insert_new_refuses_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let col = projects(dir.path());
        let mut project = Project::new("first", None, Utc::now());

        assert!(col.insert_new(&project).unwrap());
        project.name = "second".to_string();
        assert!(!col.insert_new(&project).unwrap());
        assert_eq!(col.require(&project.id).unwrap().name, "first");
    }

    #[test]
    fn test_update_error_leaves_record_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let col = projects(dir.path());
        let project = Project::new("demo", None, Utc::now());
        col.put(&project).unwrap();

        let result: CutlogResult<()> = col.update(&project.id, |p| {
            p.name = "changed".to_string();
            Err(CutlogError::state("refused"))
        });
        assert!(result.is_err());
        assert_eq!(col.require(&project.id).unwrap().name, "demo");
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let col = projects(dir.path());
        let err = col.update("nope", |_| Ok(())).unwrap_err();
        assert!(matches!(err, CutlogError::NotFound { kind: "project", .. }));
    }

    #[test]
    fn test_keys_skip_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let col = projects(dir.path());
        col.put(&Project::new("a", None, Utc::now())).unwrap();
        std::fs::write(dir.path().join("projects").join(".x.tmp"), b"{}").unwrap();

        assert_eq!(col.keys().unwrap().len(), 1);
        assert_eq!(col.list().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let col = projects(dir.path());
        let project = Project::new("a", None, Utc::now());
        col.put(&project).unwrap();

        assert!(!col
            .remove_if(&project.id, |p| Ok(p.current_version > 0))
            .unwrap());
        assert!(col
            .remove_if(&project.id, |p| Ok(p.current_version == 0))
            .unwrap());
        assert!(!col.contains(&project.id).unwrap());
    }

    #[test]
    fn test_path_traversal_keys_rejected() {
        for key in ["", "../etc", "a/b", ".hidden", "a b"] {
            assert!(validate_key(key).is_err(), "{key:?} should be rejected");
        }
        assert!(validate_key("sha256-abc_v1.2").is_ok());
    }

    #[test]
    fn test_database_lays_out_named_collections() {
        let dir = tempfile::tempdir().unwrap();
        let _db = Database::open(dir.path()).unwrap();
        for name in [
            "projects",
            "editOperations",
            "exportVersions",
            "sourceAssets",
            "renderJobs",
            "claims",
        ] {
            assert!(dir.path().join(name).is_dir(), "{name} missing");
        }
    }
}

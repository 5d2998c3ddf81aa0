//! Reference-counted asset storage.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use cutlog_common::clock::SharedClock;
use cutlog_common::error::{CutlogError, CutlogResult};
use cutlog_project_model::asset::SourceAsset;
use cutlog_project_model::collection::Database;
use cutlog_project_model::layout::ArtifactLayout;

use crate::hash::{content_hash, content_hash_reader};

/// Result of an ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub asset_id: String,
    /// True when the bytes were already stored and only the count moved.
    pub is_duplicate: bool,
    pub ref_count: u64,
}

/// Result of a purge sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub removed: Vec<String>,
    pub bytes_freed: u64,
    pub failed: Vec<(String, String)>,
}

/// Counters for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Times source bytes were written to storage.
    pub byte_writes: u64,
    /// Ingests answered from an existing asset.
    pub duplicates: u64,
}

/// Where the bytes of a new asset come from.
enum Payload<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Content-addressed store of source assets.
#[derive(Debug)]
pub struct ContentStore {
    db: Arc<Database>,
    layout: ArtifactLayout,
    clock: SharedClock,
    byte_writes: AtomicU64,
    duplicates: AtomicU64,
}

impl ContentStore {
    pub fn new(db: Arc<Database>, layout: ArtifactLayout, clock: SharedClock) -> Self {
        Self {
            db,
            layout,
            clock,
            byte_writes: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Store a byte stream, or count another reference to an identical one.
    pub fn ingest(&self, bytes: &[u8]) -> CutlogResult<IngestOutcome> {
        let hash = content_hash(bytes);
        self.ingest_hashed(&hash, bytes.len() as u64, Payload::Bytes(bytes))
    }

    /// Ingest a file without loading it into memory.
    pub fn ingest_file(&self, path: &Path) -> CutlogResult<IngestOutcome> {
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CutlogError::not_found("file", path.display().to_string())
            }
            _ => e.into(),
        })?;
        let (hash, size) = content_hash_reader(std::io::BufReader::new(file))?;
        self.ingest_hashed(&hash, size, Payload::File(path))
    }

    fn ingest_hashed(
        &self,
        hash: &str,
        size: u64,
        payload: Payload<'_>,
    ) -> CutlogResult<IngestOutcome> {
        let asset_id = SourceAsset::id_for_hash(hash);
        let assets = &self.db.source_assets;

        assets.with_lock(&asset_id, || {
            if let Some(outcome) = self.add_reference(&asset_id)? {
                return Ok(outcome);
            }

            let location = ArtifactLayout::source_key(hash);
            self.write_payload(&location, payload)?;
            let asset = SourceAsset::new(hash, location, size, self.clock.now());
            if !assets.insert_new(&asset)? {
                // Another process created the record after our lookup.
                return self
                    .add_reference(&asset_id)?
                    .ok_or_else(|| CutlogError::conflict(format!("asset {asset_id} vanished during ingest")));
            }

            tracing::info!(asset_id = %asset.id, size_bytes = size, "Stored new source asset");
            Ok(IngestOutcome {
                asset_id: asset.id,
                is_duplicate: false,
                ref_count: 1,
            })
        })
    }

    /// Increment an existing asset's count. Caller holds the asset lock.
    fn add_reference(&self, asset_id: &str) -> CutlogResult<Option<IngestOutcome>> {
        let assets = &self.db.source_assets;
        let Some(mut asset) = assets.get(asset_id)? else {
            return Ok(None);
        };
        asset.ref_count += 1;
        assets.put(&asset)?;
        self.duplicates.fetch_add(1, Ordering::Relaxed);
        tracing::info!(asset_id, ref_count = asset.ref_count, "Deduplicated source asset");
        Ok(Some(IngestOutcome {
            asset_id: asset.id,
            is_duplicate: true,
            ref_count: asset.ref_count,
        }))
    }

    fn write_payload(&self, location: &str, payload: Payload<'_>) -> CutlogResult<()> {
        let target = self.layout.resolve(location);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = target.with_file_name(format!(
            ".{}.{}.tmp",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            uuid::Uuid::new_v4()
        ));
        let written = match payload {
            Payload::Bytes(bytes) => std::fs::write(&tmp, bytes),
            Payload::File(path) => std::fs::copy(path, &tmp).map(|_| ()),
        };
        if let Err(e) = written.and_then(|_| std::fs::rename(&tmp, &target)) {
            std::fs::remove_file(&tmp).ok();
            return Err(e.into());
        }
        self.byte_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Count one more reference to an existing asset.
    pub fn retain(&self, asset_id: &str) -> CutlogResult<u64> {
        self.db.source_assets.update(asset_id, |asset| {
            asset.ref_count += 1;
            Ok(asset.ref_count)
        })
    }

    /// Drop one reference. At zero the asset becomes eligible for purge.
    pub fn release(&self, asset_id: &str) -> CutlogResult<u64> {
        let remaining = self.db.source_assets.update(asset_id, |asset| {
            if asset.ref_count == 0 {
                return Err(CutlogError::state(format!(
                    "asset {asset_id} has no references to release"
                )));
            }
            asset.ref_count -= 1;
            Ok(asset.ref_count)
        })?;
        tracing::info!(asset_id, ref_count = remaining, "Released source asset reference");
        Ok(remaining)
    }

    pub fn asset(&self, asset_id: &str) -> CutlogResult<SourceAsset> {
        self.db.source_assets.require(asset_id)
    }

    pub fn assets(&self) -> CutlogResult<Vec<SourceAsset>> {
        self.db.source_assets.list()
    }

    /// Absolute path of an asset's bytes.
    pub fn source_path(&self, asset_id: &str) -> CutlogResult<PathBuf> {
        let asset = self.asset(asset_id)?;
        Ok(self.layout.resolve(&asset.location))
    }

    /// Physically delete every asset whose count is zero.
    ///
    /// The count is re-checked inside the asset's critical section, so an
    /// ingest racing the sweep either revives the asset first or recreates
    /// it afterwards.
    pub fn purge_unreferenced(&self) -> CutlogResult<SweepReport> {
        let mut report = SweepReport::default();
        for asset in self.assets()? {
            if asset.is_referenced() {
                continue;
            }
            let mut freed = 0;
            let removed = self.db.source_assets.remove_if(&asset.id, |current| {
                if current.is_referenced() {
                    return Ok(false);
                }
                let path = self.layout.resolve(&current.location);
                match std::fs::remove_file(&path) {
                    Ok(()) => freed = current.size_bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(true)
            });
            match removed {
                Ok(true) => {
                    tracing::info!(asset_id = %asset.id, bytes_freed = freed, "Purged source asset");
                    report.bytes_freed += freed;
                    report.removed.push(asset.id);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(asset_id = %asset.id, error = %e, "Failed to purge source asset");
                    report.failed.push((asset.id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            byte_writes: self.byte_writes.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutlog_common::clock::system_clock;

    fn store(dir: &Path) -> ContentStore {
        let layout = ArtifactLayout::new(dir);
        let db = Database::open(layout.db_dir()).unwrap();
        ContentStore::new(db, layout, system_clock())
    }

    #[test]
    fn test_identical_ingests_share_one_asset() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let first = store.ingest(b"frame data").unwrap();
        let second = store.ingest(b"frame data").unwrap();

        assert!(!first.is_duplicate);
        assert!(second.is_duplicate);
        assert_eq!(first.asset_id, second.asset_id);
        assert_eq!(store.asset(&first.asset_id).unwrap().ref_count, 2);
        assert_eq!(store.stats().byte_writes, 1);
        assert_eq!(std::fs::read(store.source_path(&first.asset_id).unwrap()).unwrap(), b"frame data");
    }

    #[test]
    fn test_different_bytes_get_different_assets() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let a = store.ingest(b"a").unwrap();
        let b = store.ingest(b"b").unwrap();
        assert_ne!(a.asset_id, b.asset_id);
        assert_eq!(store.stats().byte_writes, 2);
    }

    #[test]
    fn test_release_to_zero_then_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let outcome = store.ingest(b"clip").unwrap();
        let path = store.source_path(&outcome.asset_id).unwrap();

        assert_eq!(store.release(&outcome.asset_id).unwrap(), 0);
        assert!(matches!(
            store.release(&outcome.asset_id),
            Err(CutlogError::State { .. })
        ));
        assert!(path.exists());

        let report = store.purge_unreferenced().unwrap();
        assert_eq!(report.removed, vec![outcome.asset_id.clone()]);
        assert_eq!(report.bytes_freed, 4);
        assert!(!path.exists());
        assert!(matches!(
            store.asset(&outcome.asset_id),
            Err(CutlogError::NotFound { .. })
        ));
    }

    #[test]
    fn test_purge_keeps_referenced_assets() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let outcome = store.ingest(b"kept").unwrap();
        store.ingest(b"kept").unwrap();
        store.release(&outcome.asset_id).unwrap();

        let report = store.purge_unreferenced().unwrap();
        assert!(report.removed.is_empty());
        assert!(store.source_path(&outcome.asset_id).unwrap().exists());
    }

    #[test]
    fn test_reingest_after_release_revives_without_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let outcome = store.ingest(b"again").unwrap();
        store.release(&outcome.asset_id).unwrap();

        let revived = store.ingest(b"again").unwrap();
        assert!(revived.is_duplicate);
        assert_eq!(revived.ref_count, 1);
        assert_eq!(store.stats().byte_writes, 1);
    }

    #[test]
    fn test_ingest_file_streams_and_dedups_with_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let upload = dir.path().join("upload.mp4");
        std::fs::write(&upload, b"mp4 bytes").unwrap();

        let from_file = store.ingest_file(&upload).unwrap();
        let from_bytes = store.ingest(b"mp4 bytes").unwrap();
        assert_eq!(from_file.asset_id, from_bytes.asset_id);
        assert!(from_bytes.is_duplicate);

        let missing = store.ingest_file(&dir.path().join("nope.mp4"));
        assert!(matches!(missing, Err(CutlogError::NotFound { .. })));
    }
}

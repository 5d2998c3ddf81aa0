//! Artifact layout under the storage root.
//!
//! ```text
//! <root>/
//! ├── db/                              (record collections)
//! ├── sources/{hash}                   (deduplicated source bytes)
//! ├── proxy/{projectId}/v{version}     (low-resolution previews)
//! ├── export/{projectId}/v{version}    (full-resolution renders)
//! └── archive/{exportId}_v{version}    (GC-archived exports)
//! ```
//!
//! Records store artifact locations as root-relative subpaths ("keys") so a
//! storage root can be moved as a whole.

use std::path::PathBuf;

/// Resolves artifact keys against a storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the record collections.
    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    pub fn proxy_key(project_id: &str, version: u64) -> String {
        format!("proxy/{project_id}/v{version}")
    }

    pub fn export_key(project_id: &str, version: u64) -> String {
        format!("export/{project_id}/v{version}")
    }

    pub fn archive_key(export_id: &str, version: u64) -> String {
        format!("archive/{export_id}_v{version}")
    }

    pub fn source_key(content_hash: &str) -> String {
        format!("sources/{content_hash}")
    }

    /// Absolute path of an artifact key.
    pub fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Scratch path a render writes to before it is promoted to `key`.
    pub fn partial_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.partial"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_subpaths() {
        assert_eq!(ArtifactLayout::proxy_key("p1", 3), "proxy/p1/v3");
        assert_eq!(ArtifactLayout::export_key("p1", 3), "export/p1/v3");
        assert_eq!(ArtifactLayout::archive_key("p1-v3", 3), "archive/p1-v3_v3");
        assert_eq!(ArtifactLayout::source_key("ab12"), "sources/ab12");
    }

    #[test]
    fn test_resolve_and_partial_stay_under_root() {
        let layout = ArtifactLayout::new("/srv/cutlog");
        assert_eq!(
            layout.resolve("export/p1/v2"),
            PathBuf::from("/srv/cutlog/export/p1/v2")
        );
        assert_eq!(
            layout.partial_path("proxy/p1/v2"),
            PathBuf::from("/srv/cutlog/proxy/p1/v2.partial")
        );
        assert_eq!(layout.db_dir(), PathBuf::from("/srv/cutlog/db"));
    }
}

use std::sync::Arc;

use chrono::{Duration, Utc};

use cutlog_common::clock::{Clock, ManualClock};
use cutlog_common::config::RetentionPolicy;
use cutlog_common::error::CutlogError;
use cutlog_project_model::collection::Database;
use cutlog_project_model::export::ExportState;
use cutlog_project_model::layout::ArtifactLayout;
use cutlog_project_model::project::Project;
use cutlog_retention::{ExportRegistry, GarbageCollector};

struct Harness {
    _dir: tempfile::TempDir,
    db: Arc<Database>,
    layout: ArtifactLayout,
    clock: Arc<ManualClock>,
    registry: ExportRegistry,
    gc: GarbageCollector,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        let db = Database::open(layout.db_dir()).unwrap();
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let registry = ExportRegistry::new(Arc::clone(&db), clock.clone());
        let gc = GarbageCollector::new(Arc::clone(&db), layout.clone(), clock.clone());
        Self {
            _dir: dir,
            db,
            layout,
            clock,
            registry,
            gc,
        }
    }

    /// Write export bytes and register them, as an export job would.
    fn export(&self, project_id: &str, version: u64) -> String {
        let key = ArtifactLayout::export_key(project_id, version);
        let path = self.layout.resolve(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let bytes = format!("{project_id} v{version}");
        std::fs::write(&path, &bytes).unwrap();
        let (export, _) = self
            .registry
            .record(project_id, version, &key, bytes.len() as u64)
            .unwrap();
        export.id
    }
}

#[test]
fn forty_day_old_exports_beyond_latest_are_marked() {
    let h = Harness::new();
    for v in 1..=3 {
        h.export("p1", v);
    }
    h.clock.advance(Duration::days(40));

    let report = h.gc.calculate(30, 1).unwrap();
    let mut marked = report.marked.clone();
    marked.sort();
    assert_eq!(marked, vec!["p1-v1", "p1-v2"]);
    assert_eq!(report.kept_latest, 1);
    assert_eq!(h.registry.get("p1-v3").unwrap().state, ExportState::Active);

    // Flags only: nothing moved.
    for v in 1..=3 {
        assert!(h.layout.resolve(&ArtifactLayout::export_key("p1", v)).exists());
    }
}

#[test]
fn pin_after_mark_vetoes_archive() {
    let h = Harness::new();
    for v in 1..=3 {
        h.export("p1", v);
    }
    h.clock.advance(Duration::days(40));
    h.gc.calculate(30, 1).unwrap();

    assert!(h.registry.toggle_pin("p1-v2").unwrap());
    let pinned = h.registry.get("p1-v2").unwrap();
    assert_eq!(pinned.state, ExportState::Active);
    assert!(!pinned.gc_candidate);
    assert!(pinned.gc_marked_at.is_none());

    let report = h.gc.archive(&["p1-v2".to_string()]);
    assert!(report.archived.is_empty());
    assert!(matches!(report.failed[0].error, CutlogError::State { .. }));
    assert!(h.layout.resolve("export/p1/v2").exists());
}

#[test]
fn pinned_exports_are_never_marked() {
    let h = Harness::new();
    let id = h.export("p1", 1);
    h.export("p1", 2);
    h.registry.toggle_pin(&id).unwrap();
    h.clock.advance(Duration::days(365));

    let report = h.gc.calculate(30, 0).unwrap();
    assert_eq!(report.marked, vec!["p1-v2"]);
    assert_eq!(report.pinned, vec![id.clone()]);
    assert_eq!(h.registry.get(&id).unwrap().state, ExportState::Active);
}

#[test]
fn delete_without_confirmation_keeps_bytes() {
    let h = Harness::new();
    let id = h.export("p1", 1);
    h.clock.advance(Duration::days(40));
    h.gc.calculate(30, 0).unwrap();
    h.gc.archive(&[id.clone()]);
    let archived = h.layout.resolve("archive/p1-v1_v1");
    assert!(archived.exists());

    let err = h.gc.delete(&[id.clone()], false).unwrap_err();
    assert!(matches!(err, CutlogError::Validation { .. }));
    assert!(archived.exists());
    assert_eq!(h.registry.get(&id).unwrap().state, ExportState::Archived);
}

#[test]
fn full_pipeline_frees_archived_bytes() {
    let h = Harness::new();
    let id = h.export("p1", 1);
    let size = h.registry.get(&id).unwrap().size_bytes;
    h.clock.advance(Duration::days(40));

    assert_eq!(h.gc.calculate(30, 0).unwrap().marked, vec![id.clone()]);
    assert_eq!(h.gc.list_candidates().unwrap().len(), 1);
    assert_eq!(h.gc.archive(&[id.clone()]).archived.len(), 1);
    assert!(h.gc.list_candidates().unwrap().is_empty());

    let report = h.gc.delete(&[id.clone()], true).unwrap();
    assert_eq!(report.bytes_freed, size);
    assert!(!h.layout.resolve("archive/p1-v1_v1").exists());

    let deleted = h.registry.get(&id).unwrap();
    assert_eq!(deleted.state, ExportState::Deleted);
    assert!(deleted.deleted_at.is_some());
    assert!(h.registry.find("p1", 1).unwrap().is_none());
    assert!(matches!(
        h.registry.toggle_pin(&id),
        Err(CutlogError::State { .. })
    ));
}

#[test]
fn pin_rescues_archived_export_from_deletion() {
    let h = Harness::new();
    let id = h.export("p1", 1);
    h.clock.advance(Duration::days(40));
    h.gc.calculate(30, 0).unwrap();
    h.gc.archive(&[id.clone()]);

    h.registry.toggle_pin(&id).unwrap();
    let report = h.gc.delete(&[id.clone()], true).unwrap();
    assert!(report.deleted.is_empty());
    assert!(h.layout.resolve("archive/p1-v1_v1").exists());

    // Still readable from the archive location it was left in.
    let export = h.registry.get(&id).unwrap();
    assert_eq!(export.state, ExportState::Active);
    assert_eq!(export.location, "archive/p1-v1_v1");
}

#[test]
fn deleted_export_is_revived_by_rerender() {
    let h = Harness::new();
    let id = h.export("p1", 1);
    h.clock.advance(Duration::days(40));
    h.gc.calculate(30, 0).unwrap();
    h.gc.archive(&[id.clone()]);
    h.gc.delete(&[id.clone()], true).unwrap();

    let (revived, created) = h.registry.record("p1", 1, "export/p1/v1", 7).unwrap();
    assert!(created);
    assert_eq!(revived.state, ExportState::Active);
    assert_eq!(revived.created_at, h.clock.now());
    assert_eq!(h.registry.all().unwrap().len(), 1);
}

#[test]
fn mark_project_leaves_other_projects_alone() {
    let h = Harness::new();
    h.export("p1", 1);
    h.export("p2", 1);
    h.clock.advance(Duration::days(40));

    let policy = RetentionPolicy {
        ttl_days: 30,
        keep_latest_n: 0,
    };
    let report = h.gc.mark_project("p1", &policy).unwrap();
    assert_eq!(report.marked, vec!["p1-v1"]);
    assert_eq!(h.registry.get("p2-v1").unwrap().state, ExportState::Active);
}

#[test]
fn archive_and_delete_keep_project_pointer_honest() {
    let h = Harness::new();
    let mut project = Project::new("demo", None, h.clock.now());
    let id = h.export(&project.id, 1);
    project.record_export(1, ArtifactLayout::export_key(&project.id, 1), h.clock.now());
    h.db.projects.put(&project).unwrap();

    h.clock.advance(Duration::days(40));
    h.gc.calculate(30, 0).unwrap();
    h.gc.archive(&[id.clone()]);
    let archived = h.db.projects.require(&project.id).unwrap();
    assert_eq!(archived.latest_export_key, Some(format!("archive/{id}_v1")));

    h.gc.delete(&[id], true).unwrap();
    let deleted = h.db.projects.require(&project.id).unwrap();
    assert!(deleted.latest_export_key.is_none());
    assert!(deleted.latest_export_version.is_none());
}

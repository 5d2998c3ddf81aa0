//! Store source media.

use std::path::PathBuf;

use crate::context::Context;

pub fn run(ctx: &Context, path: PathBuf, project: Option<String>) -> anyhow::Result<()> {
    let content = &ctx.services.content;
    let outcome = content.ingest_file(&path)?;
    let stats = content.stats();
    tracing::debug!(
        asset_id = %outcome.asset_id,
        byte_writes = stats.byte_writes,
        duplicates = stats.duplicates,
        "Ingested source"
    );

    if outcome.is_duplicate {
        println!("Deduplicated {} as {}", path.display(), outcome.asset_id);
    } else {
        println!("Stored {} as {}", path.display(), outcome.asset_id);
    }

    // The ingest took a reference on behalf of a project; without one,
    // hand it back so the count matches the projects using the asset.
    let Some(project_id) = project else {
        let remaining = content.release(&outcome.asset_id)?;
        if remaining == 0 {
            println!("No project uses it yet; `gc assets --purge` may reclaim it");
        } else {
            println!("Used by {remaining} project(s)");
        }
        return Ok(());
    };
    match ctx
        .services
        .edit_log
        .set_source(&project_id, Some(outcome.asset_id.clone()))
    {
        Ok(previous) => {
            if let Some(previous) = previous {
                let remaining = content.release(&previous)?;
                tracing::debug!(asset_id = %previous, remaining, "Released previous project source");
            }
            println!("Project {project_id} now uses {}", outcome.asset_id);
            Ok(())
        }
        Err(e) => {
            content.release(&outcome.asset_id).ok();
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutlog_common::config::AppConfig;

    fn context(dir: &tempfile::TempDir) -> Context {
        let config = AppConfig {
            storage_root: dir.path().join("root"),
            ..AppConfig::default()
        };
        Context::open(config).unwrap()
    }

    fn media(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_ingest_without_project_holds_no_reference() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let clip = media(&dir, "clip.mov", b"clip bytes");

        run(&ctx, clip.clone(), None).unwrap();
        run(&ctx, clip, None).unwrap();

        let assets = ctx.services.content.assets().unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].ref_count, 0);
    }

    #[test]
    fn test_reference_returns_to_zero_when_project_switches_source() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let clip = media(&dir, "clip.mov", b"clip bytes");
        let other = media(&dir, "other.mov", b"other bytes");
        let project = ctx.services.edit_log.create_project("demo", None).unwrap();

        run(&ctx, clip.clone(), None).unwrap();
        run(&ctx, clip, Some(project.id.clone())).unwrap();
        let source = ctx.services.edit_log.project(&project.id).unwrap().source_asset_id.unwrap();
        assert_eq!(ctx.services.content.asset(&source).unwrap().ref_count, 1);

        run(&ctx, other, Some(project.id.clone())).unwrap();
        assert_eq!(ctx.services.content.asset(&source).unwrap().ref_count, 0);

        let sweep = ctx.services.content.purge_unreferenced().unwrap();
        assert_eq!(sweep.removed, vec![source]);
    }
}

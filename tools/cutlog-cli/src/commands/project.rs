//! Create, show, and list projects.

use std::path::PathBuf;

use cutlog_project_model::project::Project;

use crate::context::Context;

pub fn create(ctx: &Context, name: String, source: Option<PathBuf>) -> anyhow::Result<()> {
    let asset_id = match source {
        Some(path) => {
            let outcome = ctx.services.content.ingest_file(&path)?;
            if outcome.is_duplicate {
                println!("Source already stored as {}", outcome.asset_id);
            }
            Some(outcome.asset_id)
        }
        None => None,
    };

    let project = match ctx.services.edit_log.create_project(name, asset_id.clone()) {
        Ok(project) => project,
        Err(e) => {
            // Undo the reference taken for the new project.
            if let Some(asset_id) = &asset_id {
                ctx.services.content.release(asset_id).ok();
            }
            return Err(e.into());
        }
    };

    println!("Created project {}", project.id);
    println!("  Name: {}", project.name);
    if let Some(asset) = &project.source_asset_id {
        println!("  Source: {asset}");
    }
    Ok(())
}

pub fn show(ctx: &Context, project_id: &str) -> anyhow::Result<()> {
    let project = ctx.services.edit_log.project(project_id)?;
    let version = ctx.services.edit_log.latest_version(project_id)?;

    println!("Project: {}", project.name);
    println!("  ID: {}", project.id);
    println!("  Version: {version}");
    println!(
        "  Source: {}",
        project.source_asset_id.as_deref().unwrap_or("(none)")
    );
    println!("  Created: {}", project.created_at);
    println!("  Modified: {}", project.modified_at);
    println!();

    println!("Renders:");
    match (&project.latest_proxy_key, project.latest_proxy_version) {
        (Some(key), Some(v)) => println!("  Proxy: v{v} at {key}"),
        _ => println!("  Proxy: (none)"),
    }
    match (&project.latest_export_key, project.latest_export_version) {
        (Some(key), Some(v)) => println!("  Export: v{v} at {key}"),
        _ => println!("  Export: (none)"),
    }
    println!();

    let exports = ctx.services.registry.for_project(project_id)?;
    println!("Exports: {}", exports.len());
    for export in exports {
        println!(
            "  v{:<4} {:<12} {:>12} bytes  {}{}",
            export.version,
            export.state.to_string(),
            export.size_bytes,
            export.created_at.format("%Y-%m-%d %H:%M"),
            if export.pinned { "  (pinned)" } else { "" }
        );
    }
    Ok(())
}

pub fn list(ctx: &Context) -> anyhow::Result<()> {
    let rows = listing(ctx)?;
    if rows.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    for (project, version) in rows {
        println!("{}  v{:<4} {}", project.id, version, project.name);
    }
    Ok(())
}

/// Projects, oldest first, with their committed versions.
fn listing(ctx: &Context) -> anyhow::Result<Vec<(Project, u64)>> {
    let mut projects = ctx.services.edit_log.projects()?;
    projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    projects
        .into_iter()
        .map(|project| -> anyhow::Result<(Project, u64)> {
            let version = ctx.services.edit_log.latest_version(&project.id)?;
            Ok((project, version))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cutlog_common::config::AppConfig;
    use cutlog_project_model::edit::{EditOperation, EditOperationBatch};

    #[test]
    fn test_listing_counts_batches_the_counter_missed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(AppConfig {
            storage_root: dir.path().to_path_buf(),
            ..AppConfig::default()
        })
        .unwrap();
        let log = &ctx.services.edit_log;
        let project = log.create_project("demo", None).unwrap();
        log.append(&project.id, "u1", vec![EditOperation::new("trim", serde_json::json!({}))])
            .unwrap();

        // Committed by a process that stopped before bumping the counter.
        let orphan = EditOperationBatch::new(
            &project.id,
            2,
            vec![EditOperation::new("fade", serde_json::json!({}))],
            "u2",
            Utc::now(),
        );
        ctx.services.db.edit_operations.put(&orphan).unwrap();

        let rows = listing(&ctx).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0.current_version, 1);
        assert_eq!(rows[0].1, 2);
    }
}

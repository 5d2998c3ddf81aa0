//! Export garbage collection.

use cutlog_project_model::export::ExportState;
use cutlog_retention::GcFailure;

use crate::context::Context;

pub fn mark(ctx: &Context, ttl_days: Option<u32>, keep_latest: Option<usize>) -> anyhow::Result<()> {
    let policy = ctx.config.retention;
    let ttl_days = ttl_days.unwrap_or(policy.ttl_days);
    let keep_latest = keep_latest.unwrap_or(policy.keep_latest_n);

    let report = ctx.services.gc.calculate(ttl_days, keep_latest)?;
    println!(
        "Marked {} export(s) older than {ttl_days} days (keeping newest {keep_latest} per project)",
        report.marked.len()
    );
    for id in &report.marked {
        println!("  {id}");
    }
    if !report.pinned.is_empty() {
        println!("Skipped {} pinned export(s)", report.pinned.len());
    }
    Ok(())
}

pub fn candidates(ctx: &Context) -> anyhow::Result<()> {
    let candidates = ctx.services.gc.list_candidates()?;
    if candidates.is_empty() {
        println!("No GC candidates.");
        return Ok(());
    }
    let total: u64 = candidates.iter().map(|e| e.size_bytes).sum();
    for export in &candidates {
        let marked = export
            .gc_marked_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!(
            "{:<40} {:>12} bytes  created {}  marked {}",
            export.id,
            export.size_bytes,
            export.created_at.format("%Y-%m-%d"),
            marked
        );
    }
    println!("{} candidate(s), {total} bytes", candidates.len());
    Ok(())
}

pub fn archive(ctx: &Context, ids: Vec<String>, all: bool) -> anyhow::Result<()> {
    let ids = if all {
        ctx.services
            .gc
            .list_candidates()?
            .into_iter()
            .map(|e| e.id)
            .collect()
    } else {
        ids
    };
    if ids.is_empty() {
        println!("Nothing to archive.");
        return Ok(());
    }

    let report = ctx.services.gc.archive(&ids);
    for archived in &report.archived {
        println!("Archived {} -> {}", archived.export_id, archived.location);
    }
    finish(report.failed)
}

pub fn delete(ctx: &Context, ids: Vec<String>, all: bool, confirm: bool) -> anyhow::Result<()> {
    let ids = if all {
        ctx.services
            .registry
            .all()?
            .into_iter()
            .filter(|e| e.state == ExportState::Archived)
            .map(|e| e.id)
            .collect()
    } else {
        ids
    };

    let report = ctx.services.gc.delete(&ids, confirm)?;
    for deleted in &report.deleted {
        println!("Deleted {} ({} bytes)", deleted.export_id, deleted.bytes_freed);
    }
    println!("Freed {} bytes", report.bytes_freed);
    finish(report.failed)
}

pub fn status(ctx: &Context) -> anyhow::Result<()> {
    let summary = ctx.services.registry.summary()?;
    if summary.counts.is_empty() {
        println!("No exports.");
        return Ok(());
    }
    for (state, count) in &summary.counts {
        let bytes = summary.bytes.get(state).copied().unwrap_or(0);
        println!("{state:<12} {count:>6} export(s) {bytes:>14} bytes");
    }
    println!("{:<12} {:>6}", "pinned", summary.pinned);
    Ok(())
}

pub fn assets(ctx: &Context, purge: bool) -> anyhow::Result<()> {
    let content = &ctx.services.content;
    if purge {
        let report = content.purge_unreferenced()?;
        for id in &report.removed {
            println!("Purged {id}");
        }
        for (id, error) in &report.failed {
            eprintln!("Failed to purge {id}: {error}");
        }
        println!("Freed {} bytes", report.bytes_freed);
    }

    let mut assets = content.assets()?;
    assets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    for asset in assets {
        println!(
            "{}  {:>12} bytes  refs {}",
            asset.id, asset.size_bytes, asset.ref_count
        );
    }
    Ok(())
}

/// Report per-id failures; the first one decides the exit code.
fn finish(failed: Vec<GcFailure>) -> anyhow::Result<()> {
    for failure in &failed {
        eprintln!("Failed {}: {}", failure.export_id, failure.error);
    }
    match failed.into_iter().next() {
        Some(first) => Err(anyhow::Error::from(first.error)
            .context(format!("GC failed for {}", first.export_id))),
        None => Ok(()),
    }
}

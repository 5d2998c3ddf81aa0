//! Show a project's edit log.

use crate::context::Context;

pub fn run(ctx: &Context, project_id: &str, version: Option<u64>, edl: bool) -> anyhow::Result<()> {
    let log = &ctx.services.edit_log;
    let version = match version {
        Some(v) => v,
        None => log.latest_version(project_id)?,
    };

    if edl {
        let operations = log.operations_up_to(project_id, version)?;
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    let batches = log.list_up_to(project_id, version)?;
    if batches.is_empty() {
        println!("No edits yet.");
        return Ok(());
    }
    for batch in batches {
        let types: Vec<_> = batch.operations.iter().map(|op| op.op_type.as_str()).collect();
        println!(
            "v{:<4} {}  {:<12} {}",
            batch.version,
            batch.created_at.format("%Y-%m-%d %H:%M:%S"),
            batch.user_id,
            types.join(", ")
        );
    }
    Ok(())
}

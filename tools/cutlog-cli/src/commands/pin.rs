//! Toggle an export's pin.

use crate::context::Context;

pub fn run(ctx: &Context, export_id: &str) -> anyhow::Result<()> {
    if ctx.services.registry.toggle_pin(export_id)? {
        println!("Pinned {export_id}; it will never be garbage collected");
    } else {
        println!("Unpinned {export_id}");
    }
    Ok(())
}

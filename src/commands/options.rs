use anyhow::Result;

use super::Session;
use crate::Context;
use crate::{display, ui};

pub fn run(ctx: &Context, filter: Option<&str>) -> Result<()> {
    let session = Session::open(ctx)?;
    let schema = session.reconciler.schema();
    let table = display::render_options(schema, filter);

    if table.is_empty() {
        ui::warn(&format!(
            "No options match '{}'",
            filter.unwrap_or_default()
        ));
        return Ok(());
    }
    if !ctx.quiet {
        ui::header(&format!("Options ({} defined)", schema.len()));
    }
    print!("{table}");
    Ok(())
}

use anyhow::Result;

use super::{Session, print_warnings};
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let source = session.read_declaration()?;
    let checked = session.reconciler.check(&source, &session.env()?)?;

    print_warnings(ctx, &checked.warnings);
    ui::success(&format!(
        "{} is valid ({} resources)",
        session.declaration.display(),
        checked.desired.len()
    ));
    if ctx.verbose > 0 {
        for kind in checked.desired.kinds() {
            ui::kv(kind.as_str(), &checked.desired.of_kind(kind).count().to_string());
        }
    }
    Ok(())
}

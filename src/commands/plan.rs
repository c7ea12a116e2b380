use anyhow::Result;
use declarative::{DiffSummary, Plan, ProbeError, ValidationWarning};
use serde::Serialize;

use super::{Session, print_warnings};
use crate::Context;
use crate::{display, ui};

#[derive(Serialize)]
struct PlanOutput<'a> {
    summary: DiffSummary,
    plan: &'a Plan,
    probe_errors: &'a [ProbeError],
    warnings: &'a [ValidationWarning],
}

pub fn run(ctx: &Context, json: bool, target: Option<&str>) -> Result<()> {
    let session = Session::open(ctx)?;
    let source = session.read_declaration()?;
    let planned = session.reconciler.plan(&source, &session.env()?)?;
    let shown = planned.plan.clone().filter_by_target(target);

    if json {
        let output = PlanOutput {
            summary: shown.summary(),
            plan: &shown,
            probe_errors: &planned.probe.errors,
            warnings: &planned.warnings,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_warnings(ctx, &planned.warnings);
        display::print_probe_errors(&planned.probe.errors);
        if !ctx.quiet {
            ui::header(&format!("Plan for {}", session.declaration.display()));
        }
        display::print_plan(&shown, ctx.verbose > 0);
    }

    session.reconciler.dry_run(planned)?;
    Ok(())
}

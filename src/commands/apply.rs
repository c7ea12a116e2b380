use anyhow::Result;
use declarative::{AutoConfirm, CancelToken, ConfirmCallback, RunStage};
use dialoguer::Confirm;

use super::{Session, print_warnings};
use crate::Context;
use crate::progress::BarProgress;
use crate::state::RunJournal;
use crate::{display, ui};

/// Asks on the terminal; an interrupted prompt counts as an error
struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
    }
}

pub fn run(ctx: &Context, yes: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let source = session.read_declaration()?;
    let planned = session.reconciler.plan(&source, &session.env()?)?;

    print_warnings(ctx, &planned.warnings);
    display::print_probe_errors(&planned.probe.errors);
    if !ctx.quiet {
        display::print_plan(&planned.plan, ctx.verbose > 0);
    }
    let plan = planned.plan.clone();

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler.cancel()) {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }

    let mut progress = BarProgress::new(ctx.quiet);
    let outcome = if yes {
        session
            .reconciler
            .apply(planned, &mut progress, &mut AutoConfirm, &cancel)?
    } else {
        session
            .reconciler
            .apply(planned, &mut progress, &mut PromptConfirm, &cancel)?
    };

    if outcome.stage == RunStage::DryRunReported {
        ui::info("Nothing was applied");
        return Ok(());
    }

    if !ctx.quiet {
        display::print_report(&outcome.report);
    }

    let journal = RunJournal::from_outcome(&session.declaration, &source, &plan, &outcome);
    if let Err(e) = journal.save(&session.state_dir) {
        ui::warn(&format!("Could not record run: {e:#}"));
    }

    let report = outcome.into_result()?;
    if report.summary.total_changes() == 0 {
        ui::success("System already converged");
    } else {
        ui::success(&format!("Applied {} change(s)", report.summary.total_changes()));
    }
    Ok(())
}

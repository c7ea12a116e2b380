use anyhow::Result;
use colored::Colorize;

use super::Session;
use crate::Context;
use crate::state::RunJournal;
use crate::ui;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let journal = RunJournal::load(&session.state_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&journal)?);
        return Ok(());
    }

    ui::header("converge status");
    ui::kv("declaration", &session.declaration.display().to_string());
    ui::kv("state", &session.state_dir.display().to_string());
    ui::kv("root", &session.config.root().display().to_string());

    let Some(journal) = journal else {
        ui::section("Last run");
        ui::dim("No apply recorded yet");
        return Ok(());
    };

    ui::section("Last run");
    ui::kv(
        "when",
        &journal.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    ui::kv("declaration", &journal.declaration);
    let outcome = match journal.outcome.as_str() {
        "executed" => journal.outcome.green(),
        "failed" => journal.outcome.red(),
        _ => journal.outcome.yellow(),
    };
    ui::kv("outcome", &outcome.to_string());
    if let Some(error) = &journal.error {
        ui::kv("error", error);
    }
    let s = &journal.summary;
    ui::kv(
        "changes",
        &format!(
            "{} created, {} modified, {} removed, {} unchanged",
            s.created, s.modified, s.removed, s.unchanged
        ),
    );

    let touched: Vec<_> = journal
        .actions
        .iter()
        .filter(|e| e.result != "unchanged")
        .collect();
    if !touched.is_empty() && !ctx.quiet {
        ui::section("Actions");
        for entry in touched {
            match &entry.error {
                Some(error) => println!("  {} {} {} ({error})", "✗".red(), entry.action, entry.id),
                None => println!("  • {} {} ({})", entry.action, entry.id, entry.result),
            }
        }
    }
    Ok(())
}

//! Rendering of plans, execution reports and the option table

use colored::Colorize;
use declarative::{
    Action, ActionKind, ActionRecord, ApplyResult, ChangeReason, ExecutionReport, Plan,
    ProbeError, ResourceKind, ResourceValue, Schema, group_by_kind,
};
use similar::TextDiff;
use std::fmt::Write;

use crate::ui;

fn kind_title(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Package => "Packages",
        ResourceKind::Service => "Services",
        ResourceKind::User => "Users",
        ResourceKind::EnvVar => "Environment",
        ResourceKind::FileContent => "Files",
        ResourceKind::Alias => "Aliases",
    }
}

fn symbol(kind: ActionKind) -> colored::ColoredString {
    match kind {
        ActionKind::Install => "+".green(),
        ActionKind::Remove => "-".red(),
        ActionKind::Modify => "~".yellow(),
        ActionKind::Noop => "=".dimmed(),
    }
}

fn describe(action: &Action) -> String {
    match (&action.kind, &action.reason) {
        (ActionKind::Install, ChangeReason::AssumedAbsent { cause }) => {
            format!("(assumed absent: {cause})")
        }
        (ActionKind::Install, _) => format!("(not present) → {}", action.declaration.value.summary()),
        (ActionKind::Remove, _) => "(not declared, will remove)".to_string(),
        (ActionKind::Modify, ChangeReason::Drifted { changes }) => changes
            .iter()
            .map(|c| format!("{}: {} → {}", c.field, c.from, c.to))
            .collect::<Vec<_>>()
            .join(", "),
        _ => action.reason.to_string(),
    }
}

/// Unified diff of file content for a modified file
fn content_diff(action: &Action) -> Option<String> {
    let (
        Some(ResourceValue::FileContent { content: current, .. }),
        ResourceValue::FileContent { content: desired, .. },
    ) = (&action.observed, &action.declaration.value)
    else {
        return None;
    };
    if current == desired {
        return None;
    }
    let diff = TextDiff::from_lines(current.as_str(), desired.as_str());
    Some(
        diff.unified_diff()
            .context_radius(2)
            .header("current", "desired")
            .to_string(),
    )
}

/// Plan grouped by kind; unchanged resources only when `show_noop`
pub fn render_plan(plan: &Plan, show_noop: bool) -> String {
    let mut out = String::new();
    let shown: Vec<&Action> = plan
        .actions()
        .iter()
        .filter(|a| show_noop || a.is_change())
        .collect();

    if shown.is_empty() {
        let _ = writeln!(out, "  {} No changes needed", "✓".green());
        return out;
    }

    let _ = writeln!(out, "┌─ {} ─────────────────────────────────────────┐", "Plan".bold());
    let _ = writeln!(out, "│");
    for (kind, actions) in group_by_kind(shown) {
        let _ = writeln!(out, "│ {}", kind_title(kind).bold());
        for action in actions {
            let _ = writeln!(
                out,
                "│   {} {:<30} {}",
                symbol(action.kind),
                action.id().name,
                describe(action).dimmed()
            );
            if action.kind == ActionKind::Modify
                && let Some(diff) = content_diff(action)
            {
                for line in diff.lines() {
                    let line = if line.starts_with('+') && !line.starts_with("+++") {
                        line.green().to_string()
                    } else if line.starts_with('-') && !line.starts_with("---") {
                        line.red().to_string()
                    } else {
                        line.dimmed().to_string()
                    };
                    let _ = writeln!(out, "│       {line}");
                }
            }
        }
        let _ = writeln!(out, "│");
    }

    let summary = plan.summary();
    let _ = writeln!(out, "├─────────────────────────────────────────────────────┤");
    let _ = writeln!(
        out,
        "│ Summary: {} to install, {} to modify, {} to remove, {} unchanged",
        summary.installs.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red(),
        summary.unchanged
    );
    let _ = writeln!(out, "└─────────────────────────────────────────────────────┘");
    out
}

pub fn print_plan(plan: &Plan, show_noop: bool) {
    println!();
    print!("{}", render_plan(plan, show_noop));
}

pub fn print_probe_errors(errors: &[ProbeError]) {
    for error in errors {
        ui::warn(&format!("{error}; assuming absent"));
    }
}

fn record_line(record: &ActionRecord) -> String {
    let mark = match &record.result {
        ApplyResult::Created | ApplyResult::Modified | ApplyResult::Removed => "✓".green(),
        ApplyResult::Failed { .. } => "✗".red(),
        ApplyResult::NoChange => "=".dimmed(),
        ApplyResult::Skipped { .. } | ApplyResult::NotAttempted => "•".dimmed(),
    };
    let detail = match &record.result {
        ApplyResult::Failed { error } => format!("{}: {error}", record.result.label()),
        other => other.label().to_string(),
    };
    format!("  {mark} {} {} ({detail})", record.kind, record.id)
}

/// Per-action results followed by the summary
pub fn render_report(report: &ExecutionReport) -> String {
    let mut out = String::new();
    for record in report.records.iter().filter(|r| r.kind != ActionKind::Noop) {
        let _ = writeln!(out, "{}", record_line(record));
    }
    let s = &report.summary;
    let _ = writeln!(out);
    let _ = writeln!(out, "Summary:");
    let _ = writeln!(out, "  • Created: {}", s.created);
    let _ = writeln!(out, "  • Modified: {}", s.modified);
    let _ = writeln!(out, "  • Removed: {}", s.removed);
    let _ = writeln!(out, "  • Unchanged: {}", s.unchanged);
    if s.skipped > 0 {
        let _ = writeln!(out, "  • Skipped: {}", s.skipped);
    }
    if s.failed > 0 {
        let _ = writeln!(out, "  • {}: {}", "Failed".red(), s.failed);
    }
    if s.not_attempted > 0 {
        let _ = writeln!(out, "  • Not attempted: {}", s.not_attempted);
    }
    if let Some(failure) = &report.failure {
        let _ = writeln!(out, "  • {}", failure.rollback);
    }
    out
}

pub fn print_report(report: &ExecutionReport) {
    println!();
    print!("{}", render_report(report));
}

/// Option table, optionally restricted to paths containing `filter`
pub fn render_options(schema: &Schema, filter: Option<&str>) -> String {
    let mut out = String::new();
    for option in schema.options() {
        let pattern = option.pattern();
        if filter.is_some_and(|f| !pattern.contains(f)) {
            continue;
        }
        let mut line = format!("{:<45} {:<28}", pattern, ui::truncate(&option.ty.describe(), 28));
        if let Some(replacement) = &option.replaced_by {
            line.push_str(&format!(" deprecated, use {}", replacement.join(".")).yellow().to_string());
        } else {
            line.push(' ');
            line.push_str(&option.description.dimmed().to_string());
        }
        if let Some(default) = &option.default
            && let Ok(json) = serde_json::to_string(default)
        {
            line.push_str(&format!(" [default: {json}]").dimmed().to_string());
        }
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out
}

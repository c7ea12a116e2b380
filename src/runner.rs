use anyhow::{Context, Result, bail};
use std::process::{Command, Output};

/// Split a command template into arguments and substitute placeholders
///
/// Substitution happens per argument, so values never split into several
/// arguments and no shell is involved.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Vec<String> {
    template
        .split_whitespace()
        .map(|part| {
            vars.iter().fold(part.to_string(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
        })
        .filter(|part| !part.is_empty())
        .collect()
}

fn output(args: &[String]) -> Result<Output> {
    let Some((cmd, rest)) = args.split_first() else {
        bail!("Empty command");
    };
    Command::new(cmd)
        .args(rest)
        .output()
        .with_context(|| format!("Failed to execute: {}", args.join(" ")))
}

/// Run a command and capture output
pub fn run_capture(args: &[String]) -> Result<String> {
    let output = output(args)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("Command failed: {}: {}", args.join(" "), stderr.trim())
    }
}

/// Run a command, returning its trimmed stdout when it succeeds
pub fn run_probe(args: &[String]) -> Result<Option<String>> {
    let output = output(args)?;
    Ok(output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

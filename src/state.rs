//! Journal of the last apply, kept in the state directory

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{ApplyResult, ExecuteSummary, Plan, ResourceValue, RunOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const JOURNAL_FILE: &str = "last-run.toml";

/// What the last apply did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunJournal {
    pub timestamp: DateTime<Utc>,
    /// Declaration file the run read
    pub declaration: String,
    /// blake3 of the declaration source
    pub declaration_hash: String,
    /// Final stage of the run
    pub outcome: String,
    #[serde(default)]
    pub error: Option<String>,
    pub summary: ExecuteSummary,
    #[serde(default)]
    pub actions: Vec<JournalEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub action: String,
    pub result: String,
    #[serde(default)]
    pub error: Option<String>,
    /// blake3 of the written content, for files
    #[serde(default)]
    pub content_hash: Option<String>,
}

fn hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

impl RunJournal {
    pub fn from_outcome(declaration: &Path, source: &str, plan: &Plan, outcome: &RunOutcome) -> Self {
        let contents: HashMap<_, _> = plan
            .actions()
            .iter()
            .filter_map(|a| match &a.declaration.value {
                ResourceValue::FileContent { content, .. } => Some((a.id(), hash(content))),
                _ => None,
            })
            .collect();

        let actions = outcome
            .report
            .records
            .iter()
            .map(|record| JournalEntry {
                id: record.id.to_string(),
                action: record.kind.to_string(),
                result: record.result.label().to_string(),
                error: match &record.result {
                    ApplyResult::Failed { error } => Some(error.clone()),
                    _ => None,
                },
                content_hash: record
                    .result
                    .is_change()
                    .then(|| contents.get(&record.id).cloned())
                    .flatten(),
            })
            .collect();

        Self {
            timestamp: Utc::now(),
            declaration: declaration.display().to_string(),
            declaration_hash: hash(source),
            outcome: outcome.stage.to_string(),
            error: outcome.report.failure.as_ref().map(ToString::to_string),
            summary: outcome.report.summary.clone(),
            actions,
        }
    }

    fn path(dir: &Path) -> PathBuf {
        dir.join(JOURNAL_FILE)
    }

    /// The last journal, if any run was recorded
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(dir);
        if !path.exists() {
            log::debug!("No journal at {}", path.display());
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read journal: {}", path.display()))?;
        let journal = toml::from_str(&content)
            .with_context(|| format!("Failed to parse journal: {}", path.display()))?;
        Ok(Some(journal))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        let path = Self::path(dir);
        let content = toml::to_string_pretty(self).context("Failed to serialize journal to TOML")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write journal: {}", path.display()))?;
        log::debug!("Saved journal to {}", path.display());
        Ok(())
    }
}

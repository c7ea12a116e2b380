//! Error types for the reconciliation pipeline
//!
//! Each stage has its own error type carrying structured fields. The
//! umbrella [`Error`] maps a failed run to its process exit code.

use crate::planner::ActionKind;
use crate::resource::{ResourceId, ResourceKind};
use crate::run::RunStage;
use serde::Serialize;
use thiserror::Error;

/// The declaration text could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("line {line}, column {column}: {message}")]
pub struct SyntaxError {
    /// 1-based line
    pub line: usize,
    /// 1-based column, in characters
    pub column: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// A value in the tree does not match the schema
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{path}: expected {expected}, found {found}")]
pub struct ValidationError {
    /// Dotted path of the offending key
    pub path: String,
    pub expected: String,
    pub found: String,
}

/// Every validation error of one run, sorted by path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn new(mut errors: Vec<ValidationError>) -> Self {
        errors.sort_by(|a, b| a.path.cmp(&b.path));
        Self(errors)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// One identity key declared twice with different values
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{key} is declared at {site_a} ({value_a}) and at {site_b} ({value_b})")]
pub struct ConflictError {
    pub key: ResourceId,
    pub value_a: String,
    pub value_b: String,
    pub site_a: String,
    pub site_b: String,
}

/// Errors lowering a validated tree into resources
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", content = "details", rename_all = "snake_case")]
pub enum ModelError {
    #[error("conflicting declarations: {0}")]
    Conflict(ConflictError),

    #[error("{from} requires {to}, which is not declared")]
    UnknownDependency { from: ResourceId, to: ResourceId },

    #[error("{path}: invalid resource reference '{value}' (expected kind:name)")]
    InvalidReference { path: String, value: String },

    #[error(transparent)]
    Cycle(PlanError),
}

/// A resource kind could not be probed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("probing {kind} failed: {cause}")]
pub struct ProbeError {
    pub kind: ResourceKind,
    pub cause: String,
}

/// The dependency graph cannot be ordered
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum PlanError {
    #[error("dependency cycle: {}", render_cycle(cycle))]
    Cycle { cycle: Vec<ResourceId> },
}

fn render_cycle(cycle: &[ResourceId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = parts.first().cloned() {
        parts.push(first);
    }
    parts.join(" -> ")
}

/// Outcome of rolling back a failed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    RolledBack,
    Failed { cause: String },
    NotAttempted,
}

impl std::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RolledBack => write!(f, "rolled back"),
            Self::Failed { cause } => write!(f, "rollback failed: {cause}"),
            Self::NotAttempted => write!(f, "no rollback attempted"),
        }
    }
}

/// An action failed while applying a plan
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{action_kind} {action} failed: {cause} ({rollback})")]
pub struct ExecutionError {
    pub action: ResourceId,
    pub action_kind: ActionKind,
    pub cause: String,
    pub rollback: RollbackOutcome,
}

/// A run tried to repeat a stage or move backwards
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("run cannot move from {} to {to}", stage_name(.from))]
pub struct StageError {
    pub from: Option<RunStage>,
    pub to: RunStage,
}

fn stage_name(stage: &Option<RunStage>) -> String {
    stage.map_or_else(|| "start".to_string(), |s| s.to_string())
}

/// Any error that ends a run
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", content = "details", rename_all = "snake_case")]
pub enum Error {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("validation failed:\n{0}")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("every probe failed ({} kinds)", errors.len())]
    Probe { errors: Vec<ProbeError> },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("cancelled after {applied} applied actions")]
    Cancelled { applied: usize },

    #[error("internal error: {0}")]
    Stage(#[from] StageError),
}

impl Error {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Execution(_) | Self::Cancelled { .. } | Self::Stage(_) => 1,
            Self::Syntax(_) | Self::Validation(_) | Self::Model(_) | Self::Plan(_) => 2,
            Self::Probe { .. } => 3,
        }
    }
}

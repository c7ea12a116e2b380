//! Diff computation between desired and observed state

use crate::model::DesiredStateSet;
use crate::planner::{Action, ActionKind};
use crate::probe::ObservedState;
use crate::resource::{FieldChange, ResourceDeclaration, ResourceKind};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Why an action was chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ChangeReason {
    /// Not present on the system
    Missing,
    /// The kind's probe failed, so the resource is assumed absent
    AssumedAbsent { cause: String },
    /// Present with different fields
    Drifted { changes: Vec<FieldChange> },
    InSync,
    /// Present, not declared, and its kind is exclusively managed
    Undeclared,
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "not present"),
            Self::AssumedAbsent { cause } => write!(f, "assumed absent ({cause})"),
            Self::Drifted { changes } => {
                let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
                write!(f, "differs in {}", fields.join(", "))
            }
            Self::InSync => write!(f, "in sync"),
            Self::Undeclared => write!(f, "not declared"),
        }
    }
}

/// Compute one action per desired resource, plus removals for exclusive kinds
///
/// Kinds are diffed in parallel; the result is in kind order, desired
/// resources in declaration order followed by removals in name order.
pub fn compute_actions(desired: &DesiredStateSet, observed: &ObservedState) -> Vec<Action> {
    let kinds: Vec<ResourceKind> = desired.kinds().into_iter().collect();
    kinds
        .par_iter()
        .map(|kind| diff_kind(desired, observed, *kind))
        .collect::<Vec<Vec<Action>>>()
        .into_iter()
        .flatten()
        .collect()
}

fn diff_kind(desired: &DesiredStateSet, observed: &ObservedState, kind: ResourceKind) -> Vec<Action> {
    let mut actions: Vec<Action> = desired
        .of_kind(kind)
        .map(|declaration| diff_one(declaration, observed))
        .collect();

    if desired.is_exclusive(kind) && !observed.is_failed(kind) {
        for (id, value) in observed.of_kind(kind) {
            if desired.contains(id) {
                continue;
            }
            actions.push(Action {
                kind: ActionKind::Remove,
                declaration: ResourceDeclaration::observed(id.clone(), value.clone()),
                observed: Some(value.clone()),
                reason: ChangeReason::Undeclared,
            });
        }
    }
    actions
}

fn diff_one(declaration: &ResourceDeclaration, observed: &ObservedState) -> Action {
    let current = observed.get(&declaration.id);
    let (kind, reason) = match current {
        None => match observed.failure(declaration.id.kind) {
            Some(cause) => (
                ActionKind::Install,
                ChangeReason::AssumedAbsent {
                    cause: cause.to_string(),
                },
            ),
            None => (ActionKind::Install, ChangeReason::Missing),
        },
        Some(value) if declaration.value.converged(value) => (ActionKind::Noop, ChangeReason::InSync),
        Some(value) => (
            ActionKind::Modify,
            ChangeReason::Drifted {
                changes: declaration.value.changes_from(value),
            },
        ),
    };
    Action {
        kind,
        declaration: declaration.clone(),
        observed: current.cloned(),
        reason,
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub installs: usize,
    pub modifications: usize,
    pub removals: usize,
    pub unchanged: usize,
}

impl DiffSummary {
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut summary = Self::default();
        for action in actions {
            match action.kind {
                ActionKind::Install => summary.installs += 1,
                ActionKind::Modify => summary.modifications += 1,
                ActionKind::Remove => summary.removals += 1,
                ActionKind::Noop => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.installs + self.modifications + self.removals
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group actions by resource kind
pub fn group_by_kind<'a>(
    actions: impl IntoIterator<Item = &'a Action>,
) -> BTreeMap<ResourceKind, Vec<&'a Action>> {
    let mut groups: BTreeMap<ResourceKind, Vec<&Action>> = BTreeMap::new();
    for action in actions {
        groups.entry(action.id().kind).or_default().push(action);
    }
    groups
}

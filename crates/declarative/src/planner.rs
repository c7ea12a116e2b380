//! Execution planner - orders actions into a plan

use crate::diff::{ChangeReason, DiffSummary, compute_actions};
use crate::error::PlanError;
use crate::model::DesiredStateSet;
use crate::probe::ObservedState;
use crate::resource::{ResourceDeclaration, ResourceId, ResourceKind, ResourceValue};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// What an action does to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Install,
    Remove,
    Modify,
    Noop,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Modify => "modify",
            Self::Noop => "noop",
        })
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Desired state, or the observed state for a removal
    pub declaration: ResourceDeclaration,
    /// What the probe saw before the run
    pub observed: Option<ResourceValue>,
    pub reason: ChangeReason,
}

impl Action {
    pub fn id(&self) -> &ResourceId {
        &self.declaration.id
    }

    /// Whether executing the action touches the system
    pub fn is_change(&self) -> bool {
        self.kind != ActionKind::Noop
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id())
    }
}

/// Ordered actions transforming observed into desired state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    /// Actions that touch the system
    pub fn changes(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.is_change())
    }

    /// Nothing to do
    pub fn is_noop(&self) -> bool {
        self.changes().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_actions(&self.actions)
    }

    /// Filter plan to only include actions matching a predicate
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&Action) -> bool,
    {
        Self {
            actions: self.actions.into_iter().filter(|a| predicate(a)).collect(),
        }
    }

    /// Filter plan to only include actions matching a target pattern
    ///
    /// Target format: "kind" or "kind.name"
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (kind, name) = parse_target(t);
                self.filter(|a| matches_filter(a, kind.as_deref(), name.as_deref()))
            }
        }
    }
}

/// Parse a target string like "kind.name" into (kind, name)
///
/// Names may contain dots, so only the first one separates.
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    match target.split_once('.') {
        None => (Some(target.to_string()), None),
        Some((kind, name)) if kind.parse::<ResourceKind>().is_ok() => {
            (Some(kind.to_string()), Some(name.to_string()))
        }
        Some(_) => (None, Some(target.to_string())),
    }
}

/// Check if an action matches the filter criteria
fn matches_filter(action: &Action, kind: Option<&str>, name: Option<&str>) -> bool {
    if let Some(k) = kind {
        match k.parse::<ResourceKind>() {
            Ok(kind) if kind == action.id().kind => {}
            _ => return false,
        }
    }

    if let Some(n) = name
        && !action.id().name.contains(n)
    {
        return false;
    }

    true
}

/// Build the ordered plan for `desired` against `observed`
///
/// Desired resources come in dependency order with ties broken by
/// declaration order. Removals follow, dependents first, then by name.
pub fn plan(desired: &DesiredStateSet, observed: &ObservedState) -> Result<Plan, PlanError> {
    let order = desired.apply_order()?;

    let mut pending: HashMap<ResourceId, Action> = HashMap::new();
    let mut removals = Vec::new();
    for action in compute_actions(desired, observed) {
        if action.kind == ActionKind::Remove {
            removals.push(action);
        } else {
            pending.insert(action.id().clone(), action);
        }
    }

    let declarations = desired.declarations();
    let mut actions: Vec<Action> = order
        .into_iter()
        .filter_map(|pos| pending.remove(&declarations[pos].id))
        .collect();

    removals.sort_by(|a, b| {
        (a.id().kind.removal_rank(), &a.id().name).cmp(&(b.id().kind.removal_rank(), &b.id().name))
    });
    actions.extend(removals);

    let plan = Plan::new(actions);
    let summary = plan.summary();
    log::debug!(
        "planned {} install(s), {} modification(s), {} removal(s), {} unchanged",
        summary.installs,
        summary.modifications,
        summary.removals,
        summary.unchanged
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(name: &str) -> ResourceDeclaration {
        ResourceDeclaration::new(name, ResourceValue::Package { version: None }, "test")
    }

    fn service(name: &str) -> ResourceDeclaration {
        ResourceDeclaration::new(
            name,
            ResourceValue::Service {
                active: true,
                config_hash: String::new(),
            },
            "test",
        )
    }

    fn user(name: &str) -> ResourceDeclaration {
        ResourceDeclaration::new(
            name,
            ResourceValue::User {
                home: format!("/home/{name}"),
                shell: None,
                groups: Vec::new(),
                normal: true,
            },
            "test",
        )
    }

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn rendered(plan: &Plan) -> Vec<String> {
        plan.actions().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("package"), (Some("package".to_string()), None));
        assert_eq!(
            parse_target("file./etc/hosts.allow"),
            (Some("file".to_string()), Some("/etc/hosts.allow".to_string()))
        );
        assert_eq!(parse_target("a.b.c"), (None, Some("a.b.c".to_string())));
    }

    #[test]
    fn test_install_into_empty_system() {
        let mut desired = DesiredStateSet::new();
        desired.declare(package("git")).unwrap();
        let plan = plan(&desired, &ObservedState::new()).unwrap();
        assert_eq!(rendered(&plan), ["install package:git"]);
    }

    #[test]
    fn test_dependency_precedes_dependent() {
        let mut desired = DesiredStateSet::new();
        desired
            .declare(service("ssh").requiring(id("user:chris")))
            .unwrap();
        desired.declare(user("chris")).unwrap();
        let plan = plan(&desired, &ObservedState::new()).unwrap();
        assert_eq!(rendered(&plan), ["install user:chris", "install service:ssh"]);
    }

    #[test]
    fn test_identical_state_is_all_noop() {
        let mut desired = DesiredStateSet::new();
        desired.declare(package("git")).unwrap();
        desired.declare(user("chris")).unwrap();
        let mut observed = ObservedState::new();
        for declaration in desired.declarations() {
            observed.insert(declaration.id.clone(), declaration.value.clone());
        }
        let plan = plan(&desired, &observed).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.is_noop());
        assert_eq!(plan.summary().unchanged, 2);
    }

    #[test]
    fn test_removals_follow_dependents_first() {
        let mut desired = DesiredStateSet::new();
        desired.declare(package("git")).unwrap();
        desired.mark_exclusive(ResourceKind::Package);
        desired.mark_exclusive(ResourceKind::Service);
        let mut observed = ObservedState::new();
        observed.insert(id("package:zsh"), ResourceValue::Package { version: None });
        observed.insert(id("package:htop"), ResourceValue::Package { version: None });
        observed.insert(id("service:cups"), service("cups").value);

        let plan = plan(&desired, &observed).unwrap();
        assert_eq!(
            rendered(&plan),
            [
                "install package:git",
                "remove service:cups",
                "remove package:htop",
                "remove package:zsh",
            ]
        );
    }

    #[test]
    fn test_cycle_is_plan_error() {
        let mut desired = DesiredStateSet::new();
        desired.declare(service("a").requiring(id("service:b"))).unwrap();
        desired.declare(service("b").requiring(id("service:a"))).unwrap();
        let PlanError::Cycle { cycle } = plan(&desired, &ObservedState::new()).unwrap_err();
        assert_eq!(cycle, vec![id("service:a"), id("service:b")]);
    }

    #[test]
    fn test_plans_are_byte_identical() {
        let build = || {
            let mut desired = DesiredStateSet::new();
            for name in ["vim", "git", "htop", "tmux", "jq"] {
                desired.declare(package(name)).unwrap();
            }
            desired.declare(service("ssh").requiring(id("user:chris"))).unwrap();
            desired.declare(user("chris")).unwrap();
            desired.mark_exclusive(ResourceKind::Alias);
            let mut observed = ObservedState::new();
            observed.insert(id("package:git"), ResourceValue::Package { version: Some("2.45".into()) });
            observed.insert(id("alias:ll"), ResourceValue::Alias { command: "ls -l".into() });
            observed.insert(id("alias:la"), ResourceValue::Alias { command: "ls -a".into() });
            serde_json::to_string(&plan(&desired, &observed).unwrap()).unwrap()
        };
        let first = build();
        for _ in 0..10 {
            assert_eq!(build(), first);
        }
    }

    #[test]
    fn test_filter_by_target() {
        let mut desired = DesiredStateSet::new();
        desired.declare(package("git")).unwrap();
        desired.declare(package("gitui")).unwrap();
        desired.declare(service("ssh")).unwrap();
        let plan = plan(&desired, &ObservedState::new()).unwrap();

        assert_eq!(plan.clone().filter_by_target(Some("services")).len(), 1);
        assert_eq!(plan.clone().filter_by_target(Some("package.git")).len(), 2);
        assert_eq!(plan.clone().filter_by_target(Some("bogus")).len(), 0);
        assert_eq!(plan.filter_by_target(None).len(), 3);
    }
}

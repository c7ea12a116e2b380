//! Execution engine - applies a plan one action at a time

use crate::backend::Backends;
use crate::context::{CancelToken, ProgressCallback};
use crate::error::{ExecutionError, RollbackOutcome};
use crate::planner::{Action, ActionKind, Plan};
use crate::resource::ResourceId;
use crate::types::{ApplyResult, ExecuteOptions, ExecuteSummary};
use anyhow::{Result, anyhow};
use serde::Serialize;

/// Result of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub id: ResourceId,
    pub kind: ActionKind,
    pub result: ApplyResult,
}

/// Everything that happened while executing a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub records: Vec<ActionRecord>,
    pub summary: ExecuteSummary,
    /// The action that halted execution
    pub failure: Option<ExecutionError>,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl ExecutionReport {
    /// Records of actions that changed the system
    pub fn applied(&self) -> impl Iterator<Item = &ActionRecord> {
        self.records.iter().filter(|r| r.result.is_change())
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }

    fn record(&mut self, action: &Action, result: ApplyResult) {
        self.summary.add_result(&result);
        self.records.push(ActionRecord {
            id: action.id().clone(),
            kind: action.kind,
            result,
        });
    }
}

/// Execute a plan strictly in order
///
/// The first failing action is rolled back on its own and halts the run;
/// earlier actions stay applied and later ones are reported as not
/// attempted. Cancellation is only observed between actions.
pub fn execute<P: ProgressCallback + ?Sized>(
    plan: &Plan,
    backends: &Backends,
    options: &ExecuteOptions,
    progress: &mut P,
    cancel: &CancelToken,
) -> ExecutionReport {
    let mut report = ExecutionReport {
        dry_run: options.dry_run,
        ..Default::default()
    };
    progress.on_plan_start(plan.len(), options.dry_run);

    for action in plan.actions() {
        if report.failure.is_some() || report.cancelled {
            report.record(action, ApplyResult::NotAttempted);
            continue;
        }
        if cancel.is_cancelled() {
            log::warn!("cancelled before {action}");
            report.cancelled = true;
            report.record(action, ApplyResult::NotAttempted);
            continue;
        }

        progress.on_action_start(action);
        let result = if options.dry_run {
            if action.is_change() {
                ApplyResult::Skipped {
                    reason: "dry run".to_string(),
                }
            } else {
                ApplyResult::NoChange
            }
        } else {
            match apply_action(action, backends) {
                Ok(result) => result,
                Err(e) => {
                    let cause = format!("{e:#}");
                    log::error!("{action} failed: {cause}");
                    let rollback = roll_back(action, backends);
                    let error = ExecutionError {
                        action: action.id().clone(),
                        action_kind: action.kind,
                        cause: cause.clone(),
                        rollback,
                    };
                    report.failure = Some(error);
                    ApplyResult::Failed { error: cause }
                }
            }
        };
        progress.on_action_complete(action, &result);
        report.record(action, result);
    }

    progress.on_plan_complete(&report.summary);
    report
}

fn apply_action(action: &Action, backends: &Backends) -> Result<ApplyResult> {
    if action.kind == ActionKind::Noop {
        return Ok(ApplyResult::NoChange);
    }
    let kind = action.id().kind;
    let backend = backends
        .get(kind)
        .ok_or_else(|| anyhow!("no backend registered for {kind}"))?;

    log::info!("{action}");
    match action.kind {
        ActionKind::Install => backend.apply(&action.declaration).map(|()| ApplyResult::Created),
        ActionKind::Modify => backend.apply(&action.declaration).map(|()| ApplyResult::Modified),
        ActionKind::Remove => backend.remove(&action.id().name).map(|()| ApplyResult::Removed),
        ActionKind::Noop => Ok(ApplyResult::NoChange),
    }
}

fn roll_back(action: &Action, backends: &Backends) -> RollbackOutcome {
    let Some(backend) = backends.get(action.id().kind) else {
        return RollbackOutcome::NotAttempted;
    };
    match backend.rollback(action) {
        Ok(()) => {
            log::info!("rolled back {}", action.id());
            RollbackOutcome::RolledBack
        }
        Err(e) => {
            log::error!("rollback of {} failed: {e:#}", action.id());
            RollbackOutcome::Failed {
                cause: format!("{e:#}"),
            }
        }
    }
}

//! Run state machine
//!
//! A run moves `Parsed → Validated → Modeled → Probed → Planned` and ends
//! in `Executed`, `Failed` or `DryRunReported`. Stages only move forward
//! and a failed run is never resumed; the caller starts a new one.

use crate::backend::{Backends, EnvTable};
use crate::context::{CancelToken, ConfirmCallback, NoProgress, ProgressCallback};
use crate::error::{Error, StageError};
use crate::executor::{ExecutionReport, execute};
use crate::model::{DesiredStateSet, build};
use crate::parser::parse;
use crate::planner::{Plan, plan};
use crate::probe::{ProbeOptions, ProbeReport, probe};
use crate::resource::ResourceKind;
use crate::schema::Schema;
use crate::types::ExecuteOptions;
use crate::validate::{ValidationWarning, validate};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Parsed,
    Validated,
    Modeled,
    Probed,
    Planned,
    Executed,
    Failed,
    DryRunReported,
}

impl RunStage {
    fn rank(self) -> u8 {
        match self {
            Self::Parsed => 0,
            Self::Validated => 1,
            Self::Modeled => 2,
            Self::Probed => 3,
            Self::Planned => 4,
            Self::Executed | Self::Failed | Self::DryRunReported => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 5
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parsed => "parsed",
            Self::Validated => "validated",
            Self::Modeled => "modeled",
            Self::Probed => "probed",
            Self::Planned => "planned",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::DryRunReported => "dry run reported",
        })
    }
}

/// Forward-only record of the stages a run went through
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    history: Vec<RunStage>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<RunStage> {
        self.history.last().copied()
    }

    pub fn history(&self) -> &[RunStage] {
        &self.history
    }

    pub fn advance(&mut self, to: RunStage) -> Result<(), StageError> {
        let from = self.current();
        if let Some(stage) = from
            && (stage.is_terminal() || stage.rank() >= to.rank())
        {
            return Err(StageError { from, to });
        }
        log::debug!(
            "run: {} -> {to}",
            from.map_or_else(|| "start".to_string(), |s| s.to_string())
        );
        self.history.push(to);
        Ok(())
    }

    /// Move to `Failed` and hand back the error that caused it
    fn fail(&mut self, error: impl Into<Error>) -> Error {
        let error = error.into();
        if let Err(e) = self.advance(RunStage::Failed) {
            log::error!("{e}");
        }
        error
    }
}

/// A declaration that parsed, validated and modeled
#[derive(Debug)]
pub struct Checked {
    pub desired: DesiredStateSet,
    pub warnings: Vec<ValidationWarning>,
    tracker: RunTracker,
}

/// A run that reached `Planned`; consumed by dry-run or apply
#[derive(Debug)]
pub struct PlannedRun {
    pub desired: DesiredStateSet,
    pub probe: ProbeReport,
    pub plan: Plan,
    pub warnings: Vec<ValidationWarning>,
    tracker: RunTracker,
}

impl PlannedRun {
    pub fn history(&self) -> &[RunStage] {
        self.tracker.history()
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stage: RunStage,
    pub report: ExecutionReport,
    pub history: Vec<RunStage>,
}

impl RunOutcome {
    /// The report, or the error the run ended with
    pub fn into_result(self) -> Result<ExecutionReport, Error> {
        if let Some(failure) = self.report.failure {
            return Err(Error::Execution(failure));
        }
        if self.report.cancelled {
            return Err(Error::Cancelled {
                applied: self.report.applied().count(),
            });
        }
        Ok(self.report)
    }
}

/// Drives declarations through the pipeline against a set of backends
pub struct Reconciler {
    schema: Schema,
    backends: Backends,
    probe: ProbeOptions,
    exclusive: BTreeSet<ResourceKind>,
}

impl Reconciler {
    pub fn new(schema: Schema, backends: Backends) -> Self {
        Self {
            schema,
            backends,
            probe: ProbeOptions::default(),
            exclusive: BTreeSet::new(),
        }
    }

    pub fn with_probe_options(mut self, options: ProbeOptions) -> Self {
        self.probe = options;
        self
    }

    /// Manage `kinds` exclusively in addition to what declarations ask for
    pub fn with_exclusive(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        self.exclusive.extend(kinds);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Parse, validate and model without touching the system
    pub fn check(&self, source: &str, env: &EnvTable) -> Result<Checked, Error> {
        let mut tracker = RunTracker::new();

        let tree = parse(source, env).map_err(|e| tracker.fail(e))?;
        tracker.advance(RunStage::Parsed)?;

        let validated = validate(tree, &self.schema).map_err(|e| tracker.fail(e))?;
        tracker.advance(RunStage::Validated)?;

        let mut desired = build(&validated).map_err(|e| tracker.fail(e))?;
        for kind in &self.exclusive {
            desired.mark_exclusive(*kind);
        }
        tracker.advance(RunStage::Modeled)?;
        log::info!("{} resources declared", desired.len());

        Ok(Checked {
            desired,
            warnings: validated.warnings,
            tracker,
        })
    }

    /// Check, probe the system and plan
    pub fn plan(&self, source: &str, env: &EnvTable) -> Result<PlannedRun, Error> {
        let Checked {
            desired,
            warnings,
            mut tracker,
        } = self.check(source, env)?;

        let report = probe(&desired, &self.backends, &self.probe);
        if report.is_total_failure() {
            return Err(tracker.fail(Error::Probe {
                errors: report.errors,
            }));
        }
        tracker.advance(RunStage::Probed)?;

        let plan = plan(&desired, &report.observed).map_err(|e| tracker.fail(e))?;
        tracker.advance(RunStage::Planned)?;

        Ok(PlannedRun {
            desired,
            probe: report,
            plan,
            warnings,
            tracker,
        })
    }

    /// Report what applying would do, without calling any backend
    pub fn dry_run(&self, planned: PlannedRun) -> Result<RunOutcome, Error> {
        let mut tracker = planned.tracker;
        let report = execute(
            &planned.plan,
            &self.backends,
            &ExecuteOptions { dry_run: true },
            &mut NoProgress,
            &CancelToken::new(),
        );
        tracker.advance(RunStage::DryRunReported)?;
        Ok(RunOutcome {
            stage: RunStage::DryRunReported,
            report,
            history: tracker.history,
        })
    }

    /// Confirm and execute a plan
    ///
    /// A declined confirmation ends the run as a dry run.
    pub fn apply<P, C>(
        &self,
        planned: PlannedRun,
        progress: &mut P,
        confirm: &mut C,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, Error>
    where
        P: ProgressCallback + ?Sized,
        C: ConfirmCallback + ?Sized,
    {
        let changes = planned.plan.changes().count();
        if changes > 0 {
            let prompt = format!("Apply {changes} change(s)?");
            let confirmed = match confirm.confirm(&prompt) {
                Ok(answer) => answer,
                Err(e) => {
                    log::warn!("confirmation failed, not applying: {e:#}");
                    false
                }
            };
            if !confirmed {
                log::info!("apply declined");
                return self.dry_run(planned);
            }
        }

        let mut tracker = planned.tracker;
        let report = execute(
            &planned.plan,
            &self.backends,
            &ExecuteOptions::default(),
            progress,
            cancel,
        );
        let stage = if report.is_success() {
            RunStage::Executed
        } else {
            RunStage::Failed
        };
        tracker.advance(stage)?;
        Ok(RunOutcome {
            stage,
            report,
            history: tracker.history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::context::{AutoConfirm, AutoDecline};
    use crate::planner::ActionKind;
    use crate::resource::ResourceValue;
    use std::sync::Arc;

    const SOURCE: &str = r#"
        environment.systemPackages = [ "git" ];
        users.users.chris.isNormalUser = true;
        services.ssh = {
          enable = true;
          user = "chris";
        };
    "#;

    struct Fixture {
        packages: Arc<MemoryBackend>,
        users: Arc<MemoryBackend>,
        services: Arc<MemoryBackend>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let packages = Arc::new(MemoryBackend::new(ResourceKind::Package));
        let users = Arc::new(MemoryBackend::new(ResourceKind::User));
        let services = Arc::new(MemoryBackend::new(ResourceKind::Service));
        let mut backends = Backends::new();
        backends
            .register_shared(packages.clone())
            .register_shared(users.clone())
            .register_shared(services.clone());
        Fixture {
            packages,
            users,
            services,
            reconciler: Reconciler::new(Schema::builtin(), backends),
        }
    }

    fn env() -> EnvTable {
        EnvTable::new()
    }

    #[test]
    fn test_stages_only_move_forward() {
        let mut tracker = RunTracker::new();
        tracker.advance(RunStage::Parsed).unwrap();
        tracker.advance(RunStage::Validated).unwrap();
        assert!(tracker.advance(RunStage::Validated).is_err());
        assert!(tracker.advance(RunStage::Parsed).is_err());
        tracker.advance(RunStage::Failed).unwrap();
        assert!(tracker.advance(RunStage::Executed).is_err());
        assert_eq!(tracker.current(), Some(RunStage::Failed));
    }

    #[test]
    fn test_check_reaches_modeled() {
        let f = fixture();
        let checked = f.reconciler.check(SOURCE, &env()).unwrap();
        assert_eq!(checked.desired.len(), 3);
        assert_eq!(
            checked.tracker.history(),
            [RunStage::Parsed, RunStage::Validated, RunStage::Modeled]
        );
    }

    #[test]
    fn test_syntax_error_exits_2() {
        let f = fixture();
        let err = f.reconciler.check("a = ;", &env()).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_unknown_key_exits_2() {
        let f = fixture();
        let err = f.reconciler.check("services.ssh.enabled = true;", &env()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_apply_converges_in_dependency_order() {
        let f = fixture();
        let planned = f.reconciler.plan(SOURCE, &env()).unwrap();
        let order: Vec<String> = planned.plan.actions().iter().map(ToString::to_string).collect();
        assert_eq!(
            order,
            ["install package:git", "install user:chris", "install service:ssh"]
        );

        let outcome = f
            .reconciler
            .apply(planned, &mut NoProgress, &mut AutoConfirm, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.stage, RunStage::Executed);
        assert_eq!(outcome.report.summary.created, 3);
        assert!(f.packages.value("git").is_some());
        assert!(f.users.value("chris").is_some());
        assert!(f.services.value("ssh").is_some());
        assert!(outcome.into_result().is_ok());

        // A second run has nothing to do
        let planned = f.reconciler.plan(SOURCE, &env()).unwrap();
        assert!(planned.plan.is_noop());
    }

    #[test]
    fn test_declined_apply_is_dry_run() {
        let f = fixture();
        let planned = f.reconciler.plan(SOURCE, &env()).unwrap();
        let outcome = f
            .reconciler
            .apply(planned, &mut NoProgress, &mut AutoDecline, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.stage, RunStage::DryRunReported);
        assert_eq!(outcome.report.summary.skipped, 3);
        assert!(f.packages.mutations().is_empty());
    }

    #[test]
    fn test_execution_failure_is_failed_stage() {
        let packages = MemoryBackend::new(ResourceKind::Package).failing_on("git");
        let mut backends = Backends::new();
        backends.register(packages);
        let reconciler = Reconciler::new(Schema::builtin(), backends);

        let planned = reconciler
            .plan(r#"environment.systemPackages = [ "git" ];"#, &env())
            .unwrap();
        let outcome = reconciler
            .apply(planned, &mut NoProgress, &mut AutoConfirm, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.stage, RunStage::Failed);
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_total_probe_failure_exits_3() {
        let mut backends = Backends::new();
        backends.register(MemoryBackend::new(ResourceKind::Package).failing_probe("no db"));
        let reconciler = Reconciler::new(Schema::builtin(), backends);
        let err = reconciler
            .plan(r#"environment.systemPackages = [ "git" ];"#, &env())
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_unreachable_service_manager_still_plans_packages() {
        let packages = Arc::new(MemoryBackend::new(ResourceKind::Package));
        let mut backends = Backends::new();
        backends
            .register_shared(packages.clone())
            .register(MemoryBackend::new(ResourceKind::User))
            .register(MemoryBackend::new(ResourceKind::Service).failing_probe("down"));
        let reconciler = Reconciler::new(Schema::builtin(), backends);

        let planned = reconciler.plan(SOURCE, &env()).unwrap();
        assert_eq!(planned.probe.errors.len(), 1);
        assert_eq!(planned.probe.errors[0].kind, ResourceKind::Service);
        assert!(planned.probe.errors[0].cause.contains("down"));

        let order: Vec<String> = planned.plan.actions().iter().map(ToString::to_string).collect();
        assert!(order.contains(&"install package:git".to_string()), "{order:?}");
        assert!(order.contains(&"install user:chris".to_string()), "{order:?}");

        let outcome = reconciler
            .apply(planned, &mut NoProgress, &mut AutoConfirm, &CancelToken::new())
            .unwrap();
        assert!(outcome.report.summary.created >= 2);
        assert_eq!(
            packages.value("git"),
            Some(ResourceValue::Package { version: None })
        );
    }

    #[test]
    fn test_extra_exclusive_kinds_remove_undeclared() {
        let packages = Arc::new(
            MemoryBackend::new(ResourceKind::Package)
                .with("htop", ResourceValue::Package { version: None }),
        );
        let mut backends = Backends::new();
        backends.register_shared(packages.clone());
        let reconciler = Reconciler::new(Schema::builtin(), backends)
            .with_exclusive([ResourceKind::Package]);

        let planned = reconciler
            .plan(r#"environment.systemPackages = [ "git" ];"#, &env())
            .unwrap();
        let kinds: Vec<ActionKind> = planned.plan.actions().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, [ActionKind::Install, ActionKind::Remove]);

        let outcome = reconciler
            .apply(planned, &mut NoProgress, &mut AutoConfirm, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.report.summary.removed, 1);
        assert!(packages.value("htop").is_none());
    }
}

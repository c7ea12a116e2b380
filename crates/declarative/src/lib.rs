//! # Declarative
//!
//! Declarative system-state reconciliation.
//!
//! A run parses a declaration file into an attribute tree, validates it
//! against an option schema, lowers it into typed resource declarations,
//! probes the live system, diffs the two into an ordered plan and executes
//! that plan one action at a time.
//!
//! ## Core Concepts
//!
//! - **AttributeNode**: the parsed, merged declaration tree
//! - **Schema**: the options a declaration may set, with types and defaults
//! - **ResourceDeclaration**: one identity-keyed piece of desired state
//! - **ObservedState**: a per-run snapshot of the system
//! - **Plan**: ordered install / modify / remove / noop actions
//! - **Reconciler**: drives a declaration through every stage
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     AutoConfirm, Backends, CancelToken, MemoryBackend, NoProgress, Reconciler,
//!     ResourceKind, Schema,
//! };
//!
//! let mut backends = Backends::new();
//! backends.register(MemoryBackend::new(ResourceKind::Package));
//!
//! let reconciler = Reconciler::new(Schema::builtin(), backends);
//! let planned = reconciler.plan(r#"environment.systemPackages = [ "git" ];"#, &env)?;
//! let outcome = reconciler.apply(planned, &mut NoProgress, &mut AutoConfirm, &CancelToken::new())?;
//! outcome.into_result()?;
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Backend`]: per-kind access to the live system
//! - [`PackageManager`] / [`ServiceManager`]: narrower managers adapted to [`Backend`]
//! - [`EnvSource`]: variables available to `${VAR}` interpolation
//! - [`ProgressCallback`]: receives progress updates
//! - [`ConfirmCallback`]: handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on a
//! terminal or on any particular operating system.

pub mod attr;
pub mod backend;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod model;
pub mod parser;
pub mod planner;
pub mod probe;
pub mod resource;
pub mod run;
pub mod schema;
pub mod types;
pub mod validate;

// Re-export main types at crate root
pub use attr::{AttributeNode, Mapping, Scalar};
pub use backend::{
    Backend, Backends, EnvSource, EnvTable, MemoryBackend, PackageManager, PackageStatus,
    Packages, ServiceManager, ServiceStatus, Services, StaticEnv,
};
pub use context::{
    AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use diff::{ChangeReason, DiffSummary, compute_actions, group_by_kind};
pub use error::{
    ConflictError, Error, ExecutionError, ModelError, PlanError, ProbeError, RollbackOutcome,
    SyntaxError, ValidationError, ValidationErrors,
};
pub use executor::{ActionRecord, ExecutionReport, execute};
pub use model::{DesiredStateSet, build};
pub use parser::parse;
pub use planner::{Action, ActionKind, Plan, plan};
pub use probe::{ObservedState, ProbeOptions, ProbeReport, probe};
pub use resource::{
    FieldChange, ResourceDeclaration, ResourceId, ResourceKind, ResourceValue, config_hash,
};
pub use run::{Checked, PlannedRun, Reconciler, RunOutcome, RunStage};
pub use schema::{Format, OptionDef, OptionType, Schema, normalize_mode};
pub use types::{ApplyResult, ExecuteOptions, ExecuteSummary};
pub use validate::{Validated, ValidationWarning, validate};

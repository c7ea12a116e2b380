//! Boundary traits for the live system
//!
//! The prober and executor talk to the system only through [`Backend`],
//! one per resource kind. Package and service managers implement the
//! narrower [`PackageManager`] / [`ServiceManager`] traits and are adapted
//! with [`Packages`] and [`Services`].

use crate::attr::AttributeNode;
use crate::planner::{Action, ActionKind};
use crate::resource::{ResourceDeclaration, ResourceId, ResourceKind, ResourceValue};
use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Interpolation table for `$NAME` references
pub type EnvTable = BTreeMap<String, String>;

/// Source of the interpolation table
pub trait EnvSource {
    fn read_all(&self) -> Result<EnvTable>;
}

/// Fixed interpolation table
#[derive(Debug, Clone, Default)]
pub struct StaticEnv(pub EnvTable);

impl EnvSource for StaticEnv {
    fn read_all(&self) -> Result<EnvTable> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// Narrow managers
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageStatus {
    pub installed: bool,
    pub version: Option<String>,
}

/// Package database
pub trait PackageManager: Send + Sync {
    fn query(&self, name: &str) -> Result<PackageStatus>;

    /// Install or upgrade; `None` accepts whatever version is current
    fn apply(&self, name: &str, version: Option<&str>) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;

    /// Names of every installed package
    fn installed(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    pub active: bool,
    /// Empty when the service has never been configured
    pub config_hash: String,
}

/// Service supervisor
pub trait ServiceManager: Send + Sync {
    fn query(&self, name: &str) -> Result<ServiceStatus>;

    /// Configure and start a service
    fn apply(&self, name: &str, config: &AttributeNode) -> Result<()>;

    fn stop(&self, name: &str) -> Result<()>;

    /// Names of every active service
    fn active(&self) -> Result<Vec<String>>;
}

// ============================================================================
// Generic backend
// ============================================================================

/// Per-kind access to the live system
pub trait Backend: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Observed value of `name`, `None` when absent
    fn query(&self, name: &str) -> Result<Option<ResourceValue>>;

    /// Names of every existing resource of this kind
    fn list(&self) -> Result<Vec<String>>;

    /// Converge one resource to its declaration
    fn apply(&self, declaration: &ResourceDeclaration) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;

    /// Put back a previously observed value
    fn restore(&self, name: &str, value: &ResourceValue) -> Result<()> {
        let id = ResourceId::new(self.kind(), name);
        self.apply(&ResourceDeclaration::observed(id, value.clone()))
    }

    /// Undo a failed action as far as possible
    fn rollback(&self, action: &Action) -> Result<()> {
        let name = &action.declaration.id.name;
        match (action.kind, &action.observed) {
            (ActionKind::Noop, _) => Ok(()),
            (_, Some(observed)) => self.restore(name, observed),
            (ActionKind::Install, None) => self.remove(name),
            (_, None) => Ok(()),
        }
    }
}

/// [`Backend`] over a [`PackageManager`]
pub struct Packages<P>(pub P);

impl<P: PackageManager> Backend for Packages<P> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Package
    }

    fn query(&self, name: &str) -> Result<Option<ResourceValue>> {
        let status = self.0.query(name)?;
        Ok(status.installed.then_some(ResourceValue::Package {
            version: status.version,
        }))
    }

    fn list(&self) -> Result<Vec<String>> {
        self.0.installed()
    }

    fn apply(&self, declaration: &ResourceDeclaration) -> Result<()> {
        let ResourceValue::Package { version } = &declaration.value else {
            bail!("{} is not a package", declaration.id);
        };
        self.0.apply(&declaration.id.name, version.as_deref())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.0.remove(name)
    }
}

/// [`Backend`] over a [`ServiceManager`]
pub struct Services<S>(pub S);

impl<S: ServiceManager> Backend for Services<S> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn query(&self, name: &str) -> Result<Option<ResourceValue>> {
        let status = self.0.query(name)?;
        if !status.active && status.config_hash.is_empty() {
            return Ok(None);
        }
        Ok(Some(ResourceValue::Service {
            active: status.active,
            config_hash: status.config_hash,
        }))
    }

    fn list(&self) -> Result<Vec<String>> {
        self.0.active()
    }

    fn apply(&self, declaration: &ResourceDeclaration) -> Result<()> {
        let settings = declaration
            .settings
            .clone()
            .unwrap_or_else(AttributeNode::empty_mapping);
        self.0.apply(&declaration.id.name, &settings)
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.0.stop(name)
    }

    /// Only a stopped state can be restored; previous settings are not
    /// recoverable from a hash
    fn restore(&self, name: &str, value: &ResourceValue) -> Result<()> {
        match value {
            ResourceValue::Service { active: false, .. } => self.0.stop(name),
            _ => bail!("previous configuration of service {name} is unknown"),
        }
    }
}

/// Registered backends, one per kind
#[derive(Clone, Default)]
pub struct Backends {
    by_kind: BTreeMap<ResourceKind, Arc<dyn Backend>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own kind, replacing any previous one
    pub fn register(&mut self, backend: impl Backend + 'static) -> &mut Self {
        self.register_shared(Arc::new(backend))
    }

    pub fn register_shared(&mut self, backend: Arc<dyn Backend>) -> &mut Self {
        self.by_kind.insert(backend.kind(), backend);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn Backend>> {
        self.by_kind.get(&kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.by_kind.keys().copied()
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.by_kind.keys()).finish()
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Backend holding its state in memory
///
/// Used by tests and for embedding; failures and slow probes can be
/// injected.
#[derive(Debug)]
pub struct MemoryBackend {
    kind: ResourceKind,
    state: Mutex<BTreeMap<String, ResourceValue>>,
    failing: Mutex<BTreeSet<String>>,
    probe_failure: Mutex<Option<String>>,
    probe_delay: Mutex<Option<Duration>>,
    mutations: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryBackend {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            state: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(BTreeSet::new()),
            probe_failure: Mutex::new(None),
            probe_delay: Mutex::new(None),
            mutations: Mutex::new(Vec::new()),
        }
    }

    /// Seed an existing resource
    pub fn with(self, name: &str, value: ResourceValue) -> Self {
        lock(&self.state).insert(name.to_string(), value);
        self
    }

    /// Make apply and remove of `name` fail
    pub fn failing_on(self, name: &str) -> Self {
        lock(&self.failing).insert(name.to_string());
        self
    }

    /// Make every probe fail with `cause`
    pub fn failing_probe(self, cause: &str) -> Self {
        *lock(&self.probe_failure) = Some(cause.to_string());
        self
    }

    /// Delay every probe
    pub fn slow_probe(self, delay: Duration) -> Self {
        *lock(&self.probe_delay) = Some(delay);
        self
    }

    pub fn value(&self, name: &str) -> Option<ResourceValue> {
        lock(&self.state).get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ResourceValue> {
        lock(&self.state).clone()
    }

    /// Mutating calls so far, as `apply git` / `remove git`
    pub fn mutations(&self) -> Vec<String> {
        lock(&self.mutations).clone()
    }

    fn probe_gate(&self) -> Result<()> {
        let delay = *lock(&self.probe_delay);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match lock(&self.probe_failure).as_ref() {
            Some(cause) => bail!("{cause}"),
            None => Ok(()),
        }
    }

    fn mutate(&self, verb: &str, name: &str) -> Result<()> {
        lock(&self.mutations).push(format!("{verb} {name}"));
        if lock(&self.failing).contains(name) {
            bail!("{verb} {name}: injected failure");
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn query(&self, name: &str) -> Result<Option<ResourceValue>> {
        self.probe_gate()?;
        Ok(self.value(name))
    }

    fn list(&self) -> Result<Vec<String>> {
        self.probe_gate()?;
        Ok(lock(&self.state).keys().cloned().collect())
    }

    fn apply(&self, declaration: &ResourceDeclaration) -> Result<()> {
        self.mutate("apply", &declaration.id.name)?;
        lock(&self.state).insert(declaration.id.name.clone(), declaration.value.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.mutate("remove", name)?;
        lock(&self.state).remove(name);
        Ok(())
    }

    fn restore(&self, name: &str, value: &ResourceValue) -> Result<()> {
        lock(&self.mutations).push(format!("restore {name}"));
        lock(&self.state).insert(name.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakePackages {
        installed: Mutex<BTreeMap<String, Option<String>>>,
    }

    impl PackageManager for FakePackages {
        fn query(&self, name: &str) -> Result<PackageStatus> {
            Ok(match lock(&self.installed).get(name) {
                Some(version) => PackageStatus {
                    installed: true,
                    version: version.clone(),
                },
                None => PackageStatus::default(),
            })
        }

        fn apply(&self, name: &str, version: Option<&str>) -> Result<()> {
            lock(&self.installed).insert(name.to_string(), version.map(str::to_string));
            Ok(())
        }

        fn remove(&self, name: &str) -> Result<()> {
            lock(&self.installed).remove(name);
            Ok(())
        }

        fn installed(&self) -> Result<Vec<String>> {
            Ok(lock(&self.installed).keys().cloned().collect())
        }
    }

    #[test]
    fn test_package_adapter_round_trip() {
        let backend = Packages(FakePackages::default());
        assert_eq!(backend.query("git").unwrap(), None);

        let declaration = ResourceDeclaration::new(
            "git",
            ResourceValue::Package {
                version: Some("2.45".into()),
            },
            "test",
        );
        backend.apply(&declaration).unwrap();
        assert_eq!(
            backend.query("git").unwrap(),
            Some(ResourceValue::Package {
                version: Some("2.45".into())
            })
        );
        assert_eq!(backend.list().unwrap(), vec!["git".to_string()]);

        backend.remove("git").unwrap();
        assert_eq!(backend.query("git").unwrap(), None);
    }

    #[test]
    fn test_package_restore_reapplies_observed_version() {
        let backend = Packages(FakePackages::default());
        backend
            .restore(
                "git",
                &ResourceValue::Package {
                    version: Some("2.40".into()),
                },
            )
            .unwrap();
        assert_eq!(
            backend.0.query("git").unwrap().version.as_deref(),
            Some("2.40")
        );
    }

    #[test]
    fn test_registry_replaces_same_kind() {
        let mut backends = Backends::new();
        backends.register(MemoryBackend::new(ResourceKind::Alias));
        backends.register(
            MemoryBackend::new(ResourceKind::Alias).with(
                "ll",
                ResourceValue::Alias {
                    command: "ls -l".into(),
                },
            ),
        );
        assert_eq!(backends.kinds().collect::<Vec<_>>(), vec![ResourceKind::Alias]);
        let alias = backends.get(ResourceKind::Alias).unwrap();
        assert!(alias.query("ll").unwrap().is_some());
        assert!(backends.get(ResourceKind::User).is_none());
    }

    #[test]
    fn test_memory_backend_injected_failures() {
        let backend = MemoryBackend::new(ResourceKind::EnvVar)
            .failing_on("EDITOR")
            .failing_probe("daemon down");
        let declaration =
            ResourceDeclaration::new("EDITOR", ResourceValue::EnvVar { value: "vi".into() }, "t");
        assert!(backend.apply(&declaration).is_err());
        assert!(backend.query("EDITOR").is_err());
        assert_eq!(backend.mutations(), vec!["apply EDITOR".to_string()]);
    }
}

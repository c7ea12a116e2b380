//! Current-state prober
//!
//! Queries the live system once per run, one worker thread per resource
//! kind. Workers are joined against a shared deadline; a kind whose probe
//! errors or times out is recorded as failed and treated as "assume
//! absent", without affecting other kinds.

use crate::backend::{Backend, Backends};
use crate::error::ProbeError;
use crate::model::DesiredStateSet;
use crate::resource::{ResourceId, ResourceKind, ResourceValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Options for probing
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Deadline for every probe, measured from the start of probing
    pub timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of what the system has right now
#[derive(Debug, Clone, Default)]
pub struct ObservedState {
    resources: BTreeMap<ResourceId, ResourceValue>,
    failed: BTreeMap<ResourceKind, String>,
}

impl ObservedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ResourceId, value: ResourceValue) {
        self.resources.insert(id, value);
    }

    pub fn mark_failed(&mut self, kind: ResourceKind, cause: impl Into<String>) {
        self.failed.insert(kind, cause.into());
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceValue> {
        self.resources.get(id)
    }

    /// Why probing `kind` failed, if it did
    pub fn failure(&self, kind: ResourceKind) -> Option<&str> {
        self.failed.get(&kind).map(String::as_str)
    }

    pub fn is_failed(&self, kind: ResourceKind) -> bool {
        self.failed.contains_key(&kind)
    }

    /// Observed resources of one kind, sorted by name
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = (&ResourceId, &ResourceValue)> {
        self.resources.iter().filter(move |(id, _)| id.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Result of probing every kind
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub observed: ObservedState,
    pub errors: Vec<ProbeError>,
    /// Kinds a probe was started for
    pub probed: BTreeSet<ResourceKind>,
}

impl ProbeReport {
    /// Every probed kind failed
    pub fn is_total_failure(&self) -> bool {
        !self.probed.is_empty() && self.errors.len() == self.probed.len()
    }
}

type KindResult = anyhow::Result<Vec<(String, ResourceValue)>>;

/// Probe every kind in `desired`
pub fn probe(desired: &DesiredStateSet, backends: &Backends, options: &ProbeOptions) -> ProbeReport {
    let mut report = ProbeReport::default();
    let (tx, rx) = mpsc::channel::<(ResourceKind, KindResult)>();
    let mut pending = BTreeSet::new();

    for kind in desired.kinds() {
        report.probed.insert(kind);
        let Some(backend) = backends.get(kind) else {
            fail(&mut report, kind, "no backend registered".to_string());
            continue;
        };
        let names: Vec<String> = desired.of_kind(kind).map(|d| d.id.name.clone()).collect();
        let exclusive = desired.is_exclusive(kind);
        let tx = tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("probe-{kind}"))
            .spawn(move || {
                let result = probe_kind(backend.as_ref(), names, exclusive);
                // The receiver is gone once the deadline passed
                let _ = tx.send((kind, result));
            });
        match spawned {
            Ok(_) => {
                log::debug!("probing {kind}");
                pending.insert(kind);
            }
            Err(e) => fail(&mut report, kind, format!("could not start probe: {e}")),
        }
    }
    drop(tx);

    let deadline = Instant::now() + options.timeout;
    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((kind, result)) => {
                pending.remove(&kind);
                match result {
                    Ok(values) => {
                        log::debug!("probed {kind}: {} present", values.len());
                        for (name, value) in values {
                            report.observed.insert(ResourceId::new(kind, name), value);
                        }
                    }
                    Err(e) => fail(&mut report, kind, format!("{e:#}")),
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                for kind in std::mem::take(&mut pending) {
                    fail(
                        &mut report,
                        kind,
                        format!("timed out after {:?}", options.timeout),
                    );
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                for kind in std::mem::take(&mut pending) {
                    fail(&mut report, kind, "probe worker exited".to_string());
                }
            }
        }
    }

    report.errors.sort_by_key(|e| e.kind);
    report
}

fn fail(report: &mut ProbeReport, kind: ResourceKind, cause: String) {
    log::warn!("probing {kind} failed, assuming absent: {cause}");
    report.observed.mark_failed(kind, cause.clone());
    report.errors.push(ProbeError { kind, cause });
}

/// Query every desired name and, for exclusive kinds, everything listed
fn probe_kind(backend: &dyn Backend, mut names: Vec<String>, exclusive: bool) -> KindResult {
    if exclusive {
        for name in backend.list()? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    let mut values = Vec::new();
    for name in names {
        if let Some(value) = backend.query(&name)? {
            values.push((name, value));
        }
    }
    Ok(values)
}

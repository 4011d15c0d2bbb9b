//! Reconciler engine - converges nodes to the desired directories
//!
//! Work is the cartesian product of nodes and directory specs. Nodes are
//! spread over a bounded rayon pool; directories on one node run in class
//! order after the base path has been ensured. Every node operation runs
//! under a timeout, and every failure is captured into the report rather
//! than propagated.

use crate::context::{CancelToken, ExecuteOptions, NoProgress, ProgressCallback};
use crate::error::{ConfigError, Error, FailureKind, NodeError};
use crate::node::{FileKind, NodeConnector, NodeFs};
use crate::probe::{self, ObservedState};
use crate::report::{Aggregator, PlanReport, PlannedAction, RunReport};
use crate::resolver::{DesiredState, DirectorySettings};
use crate::types::{Attribute, DirectorySpec, Drift, Mode, NodeTarget, OperationOutcome};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

/// Mode for a base path the engine has to create itself
pub const BASE_PATH_MODE: u32 = 0o755;

/// Drives reconciliation across a set of nodes
pub struct Reconciler<'a> {
    connector: Arc<dyn NodeConnector>,
    options: ExecuteOptions,
    progress: &'a dyn ProgressCallback,
    cancel: CancelToken,
}

impl<'a> Reconciler<'a> {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            connector,
            options: ExecuteOptions::default(),
            progress: &NoProgress,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Full entry point: gate on `enabled`, resolve, then apply
    ///
    /// When `enabled` is false nothing is resolved and no node is contacted.
    pub fn run(
        &self,
        enabled: bool,
        settings: &DirectorySettings,
        targets: &[NodeTarget],
    ) -> Result<RunReport, Error> {
        if !enabled {
            log::info!("reconciliation disabled, skipping {} node(s)", targets.len());
            return Ok(RunReport::empty());
        }
        let desired = DesiredState::resolve(settings)?;
        self.apply(&desired, targets)
    }

    /// Converge every node to `desired`
    pub fn apply(
        &self,
        desired: &DesiredState,
        targets: &[NodeTarget],
    ) -> Result<RunReport, Error> {
        self.preflight(targets)?;
        let aggregator = Aggregator::new(targets, &desired.specs);
        self.progress.on_run_start(targets.len() * desired.specs.len());

        self.pool()?.install(|| {
            targets
                .par_iter()
                .with_max_len(1)
                .enumerate()
                .for_each(|(idx, target)| self.apply_node(idx, target, desired, &aggregator));
        });

        self.progress.on_run_complete();
        let report = aggregator.finalize(self.cancel.is_cancelled());
        log::info!(
            "reconciliation finished: {} ({} changed, {} failed)",
            report.status(),
            report.summary().total_changes(),
            report.summary().failed
        );
        Ok(report)
    }

    /// Probe every node and report what `apply` would do, without mutating anything
    pub fn plan(
        &self,
        desired: &DesiredState,
        targets: &[NodeTarget],
    ) -> Result<PlanReport, Error> {
        self.preflight(targets)?;
        let aggregator: Aggregator<PlannedAction> = Aggregator::new(targets, &desired.specs);

        self.pool()?.install(|| {
            targets
                .par_iter()
                .with_max_len(1)
                .enumerate()
                .for_each(|(idx, target)| self.plan_node(idx, target, desired, &aggregator));
        });

        Ok(aggregator.finalize_plan())
    }

    fn preflight(&self, targets: &[NodeTarget]) -> Result<(), ConfigError> {
        self.options.validate()?;
        let mut seen = HashSet::with_capacity(targets.len());
        for target in targets {
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateNode(target.name.clone()));
            }
        }
        Ok(())
    }

    fn pool(&self) -> Result<rayon::ThreadPool, Error> {
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency)
            .thread_name(|i| format!("reconcile-{i}"))
            .build()?)
    }

    /// Connect to a node under the operation timeout
    fn connect(&self, target: &NodeTarget) -> Result<Arc<dyn NodeFs>, (FailureKind, String)> {
        let connector = Arc::clone(&self.connector);
        let node = target.clone();
        match run_with_timeout(self.options.timeout, move || connector.connect(&node)) {
            Ok(Ok(fs)) => Ok(fs),
            Ok(Err(e)) => Err((FailureKind::Probe, e.to_string())),
            Err(e) => Err((e.failure_kind(FailureKind::Probe), e.to_string())),
        }
    }

    fn apply_node(
        &self,
        node_idx: usize,
        target: &NodeTarget,
        desired: &DesiredState,
        aggregator: &Aggregator,
    ) {
        if self.cancel.is_cancelled() || desired.is_empty() {
            return;
        }

        let fs = match self.connect(target) {
            Ok(fs) => fs,
            Err((kind, cause)) => {
                log::warn!("{}: cannot connect: {}", target.name, cause);
                self.fail_node(node_idx, target, desired, kind, &cause, aggregator);
                return;
            }
        };

        let base_fs = Arc::clone(&fs);
        let base = desired.base_path.clone();
        let ensured =
            run_with_timeout(self.options.timeout, move || ensure_base_path(&*base_fs, &base));
        let base_error = match ensured {
            Ok(Ok(())) => None,
            Ok(Err(e)) if e.is_unreachable() => Some((FailureKind::Probe, e.to_string())),
            Ok(Err(e)) => Some((FailureKind::BasePath, e.to_string())),
            Err(e) => Some((e.failure_kind(FailureKind::BasePath), e.to_string())),
        };
        if let Some((kind, cause)) = base_error {
            log::warn!(
                "{}: base path {} unavailable: {}",
                target.name,
                desired.base_path.display(),
                cause
            );
            self.fail_node(node_idx, target, desired, kind, &cause, aggregator);
            return;
        }

        for (spec_idx, spec) in desired.specs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::info!("{}: cancelled, not dispatching remaining directories", target.name);
                return;
            }

            let task_fs = Arc::clone(&fs);
            let task_spec = spec.clone();
            let outcome = run_with_timeout(self.options.timeout, move || {
                reconcile_directory(&*task_fs, &task_spec)
            })
            .unwrap_or_else(|e| e.into_outcome());

            log_outcome(&target.name, spec, &outcome);
            self.progress.on_outcome(&target.name, spec, &outcome);
            aggregator.submit(node_idx, spec_idx, outcome);
        }
    }

    fn plan_node(
        &self,
        node_idx: usize,
        target: &NodeTarget,
        desired: &DesiredState,
        aggregator: &Aggregator<PlannedAction>,
    ) {
        if self.cancel.is_cancelled() || desired.is_empty() {
            return;
        }

        let fs = match self.connect(target) {
            Ok(fs) => fs,
            Err((_, reason)) => {
                for spec_idx in 0..desired.specs.len() {
                    aggregator.submit(
                        node_idx,
                        spec_idx,
                        PlannedAction::Blocked {
                            reason: reason.clone(),
                        },
                    );
                }
                return;
            }
        };

        for (spec_idx, spec) in desired.specs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return;
            }
            let task_fs = Arc::clone(&fs);
            let task_spec = spec.clone();
            let action = match run_with_timeout(self.options.timeout, move || {
                probe::probe(&*task_fs, &task_spec)
            }) {
                Ok(observed) => planned_action(observed),
                Err(e) => PlannedAction::Blocked {
                    reason: e.to_string(),
                },
            };
            aggregator.submit(node_idx, spec_idx, action);
        }
    }

    /// Record the same failure for every directory on a node
    fn fail_node(
        &self,
        node_idx: usize,
        target: &NodeTarget,
        desired: &DesiredState,
        kind: FailureKind,
        cause: &str,
        aggregator: &Aggregator,
    ) {
        for (spec_idx, spec) in desired.specs.iter().enumerate() {
            let outcome = OperationOutcome::failed(kind, cause);
            self.progress.on_outcome(&target.name, spec, &outcome);
            aggregator.submit(node_idx, spec_idx, outcome);
        }
    }
}

/// Convenience wrapper: run with default options and no progress reporting
pub fn run(
    enabled: bool,
    settings: &DirectorySettings,
    targets: &[NodeTarget],
    connector: Arc<dyn NodeConnector>,
) -> Result<RunReport, Error> {
    Reconciler::new(connector).run(enabled, settings, targets)
}

/// Bring one directory into conformance
///
/// Absent → create, drifted → repair only what drifted, conforming → no-op.
pub fn reconcile_directory(fs: &dyn NodeFs, spec: &DirectorySpec) -> OperationOutcome {
    let observed = probe::probe(fs, spec);
    if let Some(err) = observed.error {
        return OperationOutcome::failed(FailureKind::Probe, err);
    }

    if !observed.exists {
        return match create_directory(fs, spec) {
            Ok(()) => OperationOutcome::Created,
            Err(e) => OperationOutcome::failed(FailureKind::Create, e),
        };
    }

    if observed.drift.is_empty() {
        return OperationOutcome::Unchanged;
    }

    match repair(fs, spec, &observed.drift) {
        Ok(fixed) => OperationOutcome::Repaired { fixed },
        Err(e) => OperationOutcome::failed(FailureKind::Repair, e),
    }
}

/// Make sure the base path exists as a directory, creating it if needed
fn ensure_base_path(fs: &dyn NodeFs, base: &Path) -> Result<(), NodeError> {
    match fs.stat(base)? {
        Some(stat) if stat.kind.is_dir() => Ok(()),
        Some(stat) => Err(NodeError::NotADirectory {
            path: base.to_path_buf(),
            kind: match stat.kind {
                FileKind::Other(kind) => kind,
                FileKind::Directory => "directory".to_string(),
            },
        }),
        None => {
            log::info!("creating base path {}", base.display());
            fs.create_dir(base, Mode::from_st_mode(BASE_PATH_MODE), true)
        }
    }
}

/// Create the directory, then fix whatever mkdir could not set (owner, group, label)
fn create_directory(fs: &dyn NodeFs, spec: &DirectorySpec) -> Result<(), NodeError> {
    fs.create_dir(&spec.path, spec.mode, false)?;
    let observed = probe::observe(fs, spec)?;
    repair(fs, spec, &observed.drift)?;
    Ok(())
}

/// Apply one fix per drifted attribute
///
/// Owner and group are fixed before mode, since chown may clear setgid bits.
fn repair(
    fs: &dyn NodeFs,
    spec: &DirectorySpec,
    drift: &[Drift],
) -> Result<Vec<Attribute>, NodeError> {
    let mut ordered: Vec<&Drift> = drift.iter().collect();
    ordered.sort_by_key(|d| match d {
        Drift::NotADirectory { .. } => 0,
        Drift::Owner { .. } => 1,
        Drift::Group { .. } => 2,
        Drift::Mode { .. } => 3,
        Drift::SecurityLabel { .. } => 4,
    });

    let mut fixed = Vec::with_capacity(ordered.len());
    for d in ordered {
        match d {
            Drift::NotADirectory { kind } => {
                return Err(NodeError::NotADirectory {
                    path: spec.path.clone(),
                    kind: kind.clone(),
                });
            }
            Drift::Owner { desired, .. } => fs.chown(&spec.path, desired)?,
            Drift::Group { desired, .. } => fs.chgrp(&spec.path, desired)?,
            Drift::Mode { desired, .. } => fs.chmod(&spec.path, *desired)?,
            Drift::SecurityLabel { desired, .. } => fs.relabel(&spec.path, desired)?,
        }
        if let Some(attr) = d.attribute() {
            fixed.push(attr);
        }
    }
    Ok(fixed)
}

fn planned_action(observed: ObservedState) -> PlannedAction {
    if let Some(err) = observed.error {
        return PlannedAction::Blocked {
            reason: err.to_string(),
        };
    }
    if !observed.exists {
        return PlannedAction::Create;
    }
    if observed.is_blocked() {
        let reason = observed
            .drift
            .iter()
            .find(|d| d.attribute().is_none())
            .map(ToString::to_string)
            .unwrap_or_default();
        return PlannedAction::Blocked { reason };
    }
    if observed.drift.is_empty() {
        PlannedAction::None
    } else {
        PlannedAction::Repair {
            drift: observed.drift,
        }
    }
}

fn log_outcome(node: &str, spec: &DirectorySpec, outcome: &OperationOutcome) {
    let path = spec.path.display();
    match outcome {
        OperationOutcome::Unchanged => log::debug!("{node}: {path} unchanged"),
        OperationOutcome::Created => log::info!("{node}: created {path}"),
        OperationOutcome::Repaired { fixed } => log::info!(
            "{node}: repaired {path} ({})",
            fixed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ),
        OperationOutcome::Failed { kind, reason } => {
            log::warn!("{node}: {path} failed ({kind}): {reason}");
        }
        OperationOutcome::Skipped { reason } => log::debug!("{node}: {path} skipped: {reason}"),
    }
}

/// Why a timed operation produced no result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum TaskError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("operation thread panicked")]
    Panicked,
    #[error("could not start operation thread: {0}")]
    Spawn(String),
}

impl TaskError {
    /// Timeouts are always `Timeout`; anything else is charged to `stage`
    const fn failure_kind(&self, stage: FailureKind) -> FailureKind {
        match self {
            Self::TimedOut(_) => FailureKind::Timeout,
            Self::Panicked | Self::Spawn(_) => stage,
        }
    }

    fn into_outcome(self) -> OperationOutcome {
        OperationOutcome::failed(self.failure_kind(FailureKind::Probe), self)
    }
}

/// Run `task` on its own thread and stop waiting after `timeout`
///
/// A timed-out task is abandoned, not killed; the caller's worker is free
/// to move on immediately.
fn run_with_timeout<T, F>(timeout: Option<Duration>, task: F) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let Some(timeout) = timeout else {
        return Ok(task());
    };

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("reconcile-op".to_string())
        .spawn(move || {
            let _ = tx.send(task());
        })
        .map_err(|e| TaskError::Spawn(e.to_string()))?;

    rx.recv_timeout(timeout).map_err(|e| match e {
        mpsc::RecvTimeoutError::Timeout => TaskError::TimedOut(timeout),
        mpsc::RecvTimeoutError::Disconnected => TaskError::Panicked,
    })
}

/// Paths the engine may touch on a node for `desired`, base path first
pub fn managed_paths(desired: &DesiredState) -> Vec<PathBuf> {
    std::iter::once(desired.base_path.clone())
        .chain(desired.specs.iter().map(|s| s.path.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryConnector, MemoryFs};
    use crate::types::RunStatus;
    use std::time::Instant;

    const CONTEXT_OK: &str = "system_u:object_r:svirt_sandbox_file_t:s0";

    fn settings(classes: &[&str]) -> DirectorySettings {
        DirectorySettings {
            classes: classes.iter().map(|c| (*c).to_string()).collect(),
            ..Default::default()
        }
    }

    fn desired(classes: &[&str]) -> DesiredState {
        DesiredState::resolve(&settings(classes)).unwrap()
    }

    fn connector(nodes: &[(&str, Arc<MemoryFs>)]) -> Arc<MemoryConnector> {
        Arc::new(
            nodes
                .iter()
                .fold(MemoryConnector::new(), |c, (name, fs)| c.with_node(*name, Arc::clone(fs))),
        )
    }

    fn targets(names: &[&str]) -> Vec<NodeTarget> {
        names.iter().map(|n| NodeTarget::local(*n)).collect()
    }

    #[test]
    fn test_fresh_node_creates_all() {
        let fs = Arc::new(MemoryFs::new());
        let conn = connector(&[("node-a", Arc::clone(&fs))]);

        let report = Reconciler::new(conn.clone())
            .apply(&desired(&["fast-ssd", "slow-hdd"]), &targets(&["node-a"]))
            .unwrap();

        assert_eq!(report.status(), RunStatus::Changed);
        assert_eq!(report.summary().created, 2);
        let entries = &report.node("node-a").unwrap().entries;
        assert_eq!(entries[0].class.as_str(), "fast-ssd");
        assert_eq!(entries[1].class.as_str(), "slow-hdd");

        let base = fs.entry(Path::new("/mnt/local-storage")).unwrap();
        assert_eq!(base.mode.bits(), BASE_PATH_MODE);
        let dir = fs.entry(Path::new("/mnt/local-storage/fast-ssd")).unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.mode.bits(), 0o770);
        assert_eq!(dir.uid, 0);
    }

    #[test]
    fn test_second_run_is_unchanged() {
        let fs = Arc::new(MemoryFs::new().with_selinux());
        let conn = connector(&[("node-a", Arc::clone(&fs))]);
        let reconciler = Reconciler::new(conn.clone());
        let want = desired(&["fast-ssd", "slow-hdd"]);

        let first = reconciler.apply(&want, &targets(&["node-a"])).unwrap();
        assert_eq!(first.status(), RunStatus::Changed);
        assert_eq!(
            fs.security_context(Path::new("/mnt/local-storage/slow-hdd"))
                .unwrap()
                .as_deref(),
            Some(CONTEXT_OK)
        );

        let mutations = fs.mutation_count();
        let second = reconciler.apply(&want, &targets(&["node-a"])).unwrap();
        assert_eq!(second.status(), RunStatus::Unchanged);
        assert_eq!(second.summary().unchanged, 2);
        assert_eq!(fs.mutation_count(), mutations);
    }

    #[test]
    fn test_mode_repair() {
        let fs = Arc::new(MemoryFs::new());
        fs.insert_dir("/mnt/local-storage/fast-ssd", "root", "root", 0o755);
        let conn = connector(&[("node-a", Arc::clone(&fs))]);

        let report = Reconciler::new(conn.clone())
            .apply(&desired(&["fast-ssd"]), &targets(&["node-a"]))
            .unwrap();

        assert_eq!(
            report.nodes[0].entries[0].outcome,
            OperationOutcome::Repaired {
                fixed: vec![Attribute::Mode]
            }
        );
        let spec = &desired(&["fast-ssd"]).specs[0];
        let after = probe::probe(&*fs, spec);
        assert!(after.attributes_match());
        assert_eq!(fs.entry(&spec.path).unwrap().mode.bits(), 0o770);
    }

    #[test]
    fn test_repair_touches_only_drifted_attributes() {
        let fs = Arc::new(MemoryFs::new().with_selinux());
        fs.insert_dir("/mnt/local-storage/fast-ssd", "core", "root", 0o770);
        fs.set_context("/mnt/local-storage/fast-ssd", CONTEXT_OK);
        let conn = connector(&[("node-a", Arc::clone(&fs))]);

        let report = Reconciler::new(conn.clone())
            .apply(&desired(&["fast-ssd"]), &targets(&["node-a"]))
            .unwrap();

        assert_eq!(
            report.nodes[0].entries[0].outcome,
            OperationOutcome::Repaired {
                fixed: vec![Attribute::Owner]
            }
        );
        assert_eq!(fs.mutation_count(), 1);
    }

    #[test]
    fn test_outside_change_is_repaired_on_rerun() {
        let fs = Arc::new(MemoryFs::new());
        let conn = connector(&[("node-a", Arc::clone(&fs))]);
        let reconciler = Reconciler::new(conn.clone());
        let want = desired(&["fast-ssd", "slow-hdd"]);

        reconciler.apply(&want, &targets(&["node-a"])).unwrap();
        fs.set_mode("/mnt/local-storage/slow-hdd", 0o777);

        let report = reconciler.apply(&want, &targets(&["node-a"])).unwrap();
        let entries = &report.nodes[0].entries;
        assert_eq!(entries[0].outcome, OperationOutcome::Unchanged);
        assert_eq!(
            entries[1].outcome,
            OperationOutcome::Repaired {
                fixed: vec![Attribute::Mode]
            }
        );
        assert_eq!(
            fs.entry(Path::new("/mnt/local-storage/slow-hdd")).unwrap().mode.bits(),
            0o770
        );
    }

    #[test]
    fn test_unreachable_node_is_isolated() {
        let a = Arc::new(MemoryFs::new());
        let b = Arc::new(MemoryFs::new().unreachable());
        let c = Arc::new(MemoryFs::new());
        c.insert_dir("/mnt/local-storage/fast-ssd", "root", "root", 0o770);
        let conn = connector(&[
            ("a", Arc::clone(&a)),
            ("b", Arc::clone(&b)),
            ("c", Arc::clone(&c)),
        ]);

        let report = Reconciler::new(conn.clone())
            .apply(&desired(&["fast-ssd", "slow-hdd"]), &targets(&["a", "b", "c"]))
            .unwrap();

        assert_eq!(report.status(), RunStatus::Failed);
        let names: Vec<_> = report.nodes.iter().map(|n| n.node.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);

        assert!(
            report.nodes[0]
                .entries
                .iter()
                .all(|e| e.outcome == OperationOutcome::Created)
        );
        assert!(report.nodes[1].entries.iter().all(|e| matches!(
            e.outcome,
            OperationOutcome::Failed {
                kind: FailureKind::Probe,
                ..
            }
        )));
        assert_eq!(report.nodes[2].entries[0].outcome, OperationOutcome::Unchanged);
        assert_eq!(report.nodes[2].entries[1].outcome, OperationOutcome::Created);
        assert_eq!(report.failures().len(), 2);
    }

    #[test]
    fn test_base_path_failure_short_circuits_node() {
        let fs = Arc::new(MemoryFs::new());
        fs.refuse("/mnt/local-storage");
        let conn = connector(&[("node-a", Arc::clone(&fs))]);

        let report = Reconciler::new(conn.clone())
            .apply(&desired(&["fast-ssd", "slow-hdd"]), &targets(&["node-a"]))
            .unwrap();

        let reasons: Vec<_> = report.nodes[0]
            .entries
            .iter()
            .map(|e| match &e.outcome {
                OperationOutcome::Failed {
                    kind: FailureKind::BasePath,
                    reason,
                } => reason.clone(),
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(reasons[0], reasons[1]);
        assert!(fs.entry(Path::new("/mnt/local-storage/fast-ssd")).is_none());
    }

    #[test]
    fn test_base_path_is_a_file() {
        let fs = Arc::new(MemoryFs::new());
        fs.insert_dir("/mnt", "root", "root", 0o755);
        fs.insert_file("/mnt/local-storage");
        let conn = connector(&[("node-a", fs)]);

        let report = Reconciler::new(conn.clone())
            .apply(&desired(&["fast-ssd"]), &targets(&["node-a"]))
            .unwrap();
        assert!(matches!(
            report.nodes[0].entries[0].outcome,
            OperationOutcome::Failed {
                kind: FailureKind::BasePath,
                ..
            }
        ));
    }

    #[test]
    fn test_create_failure_is_per_directory() {
        let fs = Arc::new(MemoryFs::new());
        fs.insert_dir("/mnt/local-storage", "root", "root", 0o755);
        fs.refuse("/mnt/local-storage/fast-ssd");
        let conn = connector(&[("node-a", Arc::clone(&fs))]);

        let report = Reconciler::new(conn.clone())
            .apply(&desired(&["fast-ssd", "slow-hdd"]), &targets(&["node-a"]))
            .unwrap();

        assert!(matches!(
            report.nodes[0].entries[0].outcome,
            OperationOutcome::Failed {
                kind: FailureKind::Create,
                ..
            }
        ));
        assert_eq!(report.nodes[0].entries[1].outcome, OperationOutcome::Created);
    }

    #[test]
    fn test_file_in_the_way_fails_repair() {
        let fs = Arc::new(MemoryFs::new());
        fs.insert_dir("/mnt/local-storage", "root", "root", 0o755);
        fs.insert_file("/mnt/local-storage/fast-ssd");
        let conn = connector(&[("node-a", fs)]);

        let report = Reconciler::new(conn.clone())
            .apply(&desired(&["fast-ssd"]), &targets(&["node-a"]))
            .unwrap();
        assert!(matches!(
            report.nodes[0].entries[0].outcome,
            OperationOutcome::Failed {
                kind: FailureKind::Repair,
                ..
            }
        ));
    }

    #[test]
    fn test_disabled_makes_no_calls() {
        let fs = Arc::new(MemoryFs::new());
        let conn = connector(&[("node-a", Arc::clone(&fs))]);

        let report = Reconciler::new(conn.clone())
            .run(false, &settings(&["fast-ssd"]), &targets(&["node-a"]))
            .unwrap();

        assert!(report.nodes.is_empty());
        assert_eq!(report.status(), RunStatus::Unchanged);
        assert_eq!(conn.connect_count(), 0);
        assert_eq!(fs.call_count(), 0);
    }

    #[test]
    fn test_config_error_aborts_before_dispatch() {
        let fs = Arc::new(MemoryFs::new());
        let conn = connector(&[("node-a", Arc::clone(&fs))]);

        let result = run(true, &settings(&["a", "a"]), &targets(&["node-a"]), conn.clone());
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::DuplicateClassName(_)))
        ));
        assert_eq!(conn.connect_count(), 0);

        let result = Reconciler::new(conn.clone())
            .apply(&desired(&["a"]), &targets(&["node-a", "node-a"]));
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::DuplicateNode(_)))
        ));
        assert_eq!(fs.call_count(), 0);
    }

    #[test]
    fn test_timeout_is_recorded() {
        let fs = Arc::new(MemoryFs::new().with_delay(Duration::from_millis(200)));
        let conn = connector(&[("slow", fs)]);
        let options = ExecuteOptions {
            timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };

        let report = Reconciler::new(conn.clone())
            .with_options(options)
            .apply(&desired(&["fast-ssd", "slow-hdd"]), &targets(&["slow"]))
            .unwrap();

        assert!(report.nodes[0].entries.iter().all(|e| matches!(
            e.outcome,
            OperationOutcome::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        )));
        assert_eq!(report.status(), RunStatus::Failed);
    }

    struct SlowConnector(Duration);

    impl NodeConnector for SlowConnector {
        fn connect(&self, _target: &NodeTarget) -> Result<Arc<dyn NodeFs>, NodeError> {
            thread::sleep(self.0);
            let fs: Arc<dyn NodeFs> = Arc::new(MemoryFs::new());
            Ok(fs)
        }
    }

    #[test]
    fn test_hung_connect_times_out() {
        let conn = Arc::new(SlowConnector(Duration::from_millis(1500)));
        let options = ExecuteOptions {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let want = desired(&["fast-ssd", "slow-hdd"]);

        let started = Instant::now();
        let report = Reconciler::new(conn.clone())
            .with_options(options.clone())
            .apply(&want, &targets(&["hung"]))
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(report.nodes[0].entries.iter().all(|e| matches!(
            e.outcome,
            OperationOutcome::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        )));

        let started = Instant::now();
        let plan = Reconciler::new(conn)
            .with_options(options)
            .plan(&want, &targets(&["hung"]))
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(plan.blocked_count(), 2);
    }

    #[test]
    fn test_timeout_on_directory_task() {
        let fs = Arc::new(MemoryFs::new().with_delay(Duration::from_millis(100)));
        fs.insert_dir("/mnt/local-storage", "root", "root", 0o755);
        let conn = connector(&[("slow", fs)]);
        let options = ExecuteOptions {
            // base path stat is one call; a directory create needs several
            timeout: Some(Duration::from_millis(250)),
            ..Default::default()
        };

        let report = Reconciler::new(conn.clone())
            .with_options(options)
            .apply(&desired(&["fast-ssd"]), &targets(&["slow"]))
            .unwrap();

        assert!(matches!(
            report.nodes[0].entries[0].outcome,
            OperationOutcome::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn test_cancelled_run_skips_everything_undispatched() {
        let fs = Arc::new(MemoryFs::new());
        let conn = connector(&[("node-a", Arc::clone(&fs))]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = Reconciler::new(conn.clone())
            .with_cancel(cancel)
            .apply(&desired(&["fast-ssd", "slow-hdd"]), &targets(&["node-a"]))
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.summary().skipped, 2);
        assert!(!report.is_complete());
        assert_eq!(fs.call_count(), 0);
    }

    struct CancelAfterFirst(CancelToken);

    impl ProgressCallback for CancelAfterFirst {
        fn on_run_start(&self, _total: usize) {}
        fn on_outcome(&self, _node: &str, _spec: &DirectorySpec, _outcome: &OperationOutcome) {
            self.0.cancel();
        }
        fn on_run_complete(&self) {}
    }

    #[test]
    fn test_cancel_mid_run_keeps_completed_outcomes() {
        let fs = Arc::new(MemoryFs::new());
        let conn = connector(&[("node-a", Arc::clone(&fs))]);
        let cancel = CancelToken::new();
        let progress = CancelAfterFirst(cancel.clone());

        let report = Reconciler::new(conn.clone())
            .with_progress(&progress)
            .with_cancel(cancel)
            .apply(&desired(&["one", "two", "three"]), &targets(&["node-a"]))
            .unwrap();

        let entries = &report.nodes[0].entries;
        assert_eq!(entries[0].outcome, OperationOutcome::Created);
        assert!(matches!(entries[1].outcome, OperationOutcome::Skipped { .. }));
        assert!(matches!(entries[2].outcome, OperationOutcome::Skipped { .. }));
        assert!(fs.entry(Path::new("/mnt/local-storage/two")).is_none());
    }

    #[test]
    fn test_many_nodes_with_small_pool() {
        let names: Vec<String> = (0..12).map(|i| format!("node-{i}")).collect();
        let conn = Arc::new(names.iter().fold(MemoryConnector::new(), |c, n| {
            c.with_node(n.clone(), Arc::new(MemoryFs::new()))
        }));
        let targets: Vec<_> = names.iter().map(|n| NodeTarget::local(n.clone())).collect();
        let options = ExecuteOptions {
            concurrency: 3,
            ..Default::default()
        };

        let report = Reconciler::new(conn.clone())
            .with_options(options)
            .apply(&desired(&["fast-ssd", "slow-hdd"]), &targets)
            .unwrap();

        assert_eq!(report.summary().created, 24);
        let order: Vec<_> = report.nodes.iter().map(|n| n.node.clone()).collect();
        assert_eq!(order, names);
    }

    #[test]
    fn test_plan_does_not_mutate() {
        let fs = Arc::new(MemoryFs::new());
        fs.insert_dir("/mnt/local-storage/fast-ssd", "root", "root", 0o700);
        fs.insert_dir("/mnt/local-storage/ok", "root", "root", 0o770);
        let conn = connector(&[("node-a", Arc::clone(&fs))]);

        let plan = Reconciler::new(conn.clone())
            .plan(&desired(&["fast-ssd", "slow-hdd", "ok"]), &targets(&["node-a"]))
            .unwrap();

        let actions: Vec<_> = plan.nodes[0].entries.iter().map(|e| &e.action).collect();
        assert!(matches!(actions[0], PlannedAction::Repair { drift } if drift.len() == 1));
        assert_eq!(actions[1], &PlannedAction::Create);
        assert_eq!(actions[2], &PlannedAction::None);
        assert_eq!(plan.change_count(), 2);
        assert_eq!(fs.mutation_count(), 0);
    }

    #[test]
    fn test_plan_blocks_unreachable() {
        let conn = Arc::new(MemoryConnector::new());
        let plan = Reconciler::new(conn.clone())
            .plan(&desired(&["fast-ssd"]), &targets(&["ghost"]))
            .unwrap();
        assert_eq!(plan.blocked_count(), 1);
    }

    #[test]
    fn test_empty_class_list_contacts_nobody() {
        let conn = connector(&[("node-a", Arc::new(MemoryFs::new()))]);
        let report = Reconciler::new(conn.clone())
            .apply(&desired(&[]), &targets(&["node-a"]))
            .unwrap();
        assert_eq!(report.status(), RunStatus::Unchanged);
        assert!(report.nodes[0].entries.is_empty());
        assert_eq!(conn.connect_count(), 0);
    }

    #[test]
    fn test_run_with_timeout_inline_and_panic() {
        assert_eq!(run_with_timeout(None, || 7), Ok(7));
        assert_eq!(run_with_timeout(Some(Duration::from_secs(5)), || 8), Ok(8));
        let panicked: Result<(), TaskError> =
            run_with_timeout(Some(Duration::from_secs(5)), || panic!("boom"));
        assert_eq!(panicked, Err(TaskError::Panicked));
    }

    #[test]
    fn test_managed_paths() {
        let paths = managed_paths(&desired(&["a", "b"]));
        assert_eq!(
            paths,
            [
                PathBuf::from("/mnt/local-storage"),
                PathBuf::from("/mnt/local-storage/a"),
                PathBuf::from("/mnt/local-storage/b"),
            ]
        );
    }
}

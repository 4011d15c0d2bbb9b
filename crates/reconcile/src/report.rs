//! Result aggregation and run reports

use crate::types::{
    DirectorySpec, Drift, NodeTarget, OperationOutcome, RunStatus, StorageClassName,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;

/// Collects per-(node, directory) results from concurrent workers
///
/// Submissions may arrive in any order from any thread. Finalizing
/// rebuilds input order: nodes as given, directories in class order.
#[derive(Debug)]
pub struct Aggregator<T = OperationOutcome> {
    nodes: Vec<String>,
    specs: Vec<DirectorySpec>,
    received: Mutex<Vec<(usize, usize, T)>>,
    started_at: DateTime<Utc>,
}

impl<T> Aggregator<T> {
    pub fn new(targets: &[NodeTarget], specs: &[DirectorySpec]) -> Self {
        Self {
            nodes: targets.iter().map(|t| t.name.clone()).collect(),
            specs: specs.to_vec(),
            received: Mutex::new(Vec::with_capacity(targets.len() * specs.len())),
            started_at: Utc::now(),
        }
    }

    /// Record the result for node `node` and directory `spec` (input indices)
    pub fn submit(&self, node: usize, spec: usize, item: T) {
        if node >= self.nodes.len() || spec >= self.specs.len() {
            log::warn!("ignoring result for unknown pair ({node}, {spec})");
            return;
        }
        match self.received.lock() {
            Ok(mut locked) => locked.push((node, spec, item)),
            Err(poisoned) => poisoned.into_inner().push((node, spec, item)),
        }
    }

    /// Number of results received so far
    pub fn len(&self) -> usize {
        match self.received.lock() {
            Ok(locked) => locked.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Place each received result at its input position; the first submission wins
    fn into_grid(self) -> Grid<T> {
        let received = match self.received.into_inner() {
            Ok(collected) => collected,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut cells: Vec<Vec<Option<T>>> = self
            .nodes
            .iter()
            .map(|_| self.specs.iter().map(|_| None).collect())
            .collect();

        for (node, spec, item) in received {
            let cell = &mut cells[node][spec];
            if cell.is_some() {
                log::warn!(
                    "duplicate result for {} {}, keeping the first",
                    self.nodes[node],
                    self.specs[spec].path.display()
                );
                continue;
            }
            *cell = Some(item);
        }

        Grid {
            nodes: self.nodes,
            specs: self.specs,
            cells,
            started_at: self.started_at,
        }
    }
}

struct Grid<T> {
    nodes: Vec<String>,
    specs: Vec<DirectorySpec>,
    cells: Vec<Vec<Option<T>>>,
    started_at: DateTime<Utc>,
}

impl<T> Grid<T> {
    fn rows<R>(
        self,
        mut fill: impl FnMut(&DirectorySpec, Option<T>) -> R,
    ) -> (Vec<(String, Vec<R>)>, DateTime<Utc>) {
        let specs = self.specs;
        let rows = self
            .nodes
            .into_iter()
            .zip(self.cells)
            .map(|(node, row)| {
                let entries = specs
                    .iter()
                    .zip(row)
                    .map(|(spec, cell)| fill(spec, cell))
                    .collect();
                (node, entries)
            })
            .collect();
        (rows, self.started_at)
    }
}

impl Aggregator<OperationOutcome> {
    /// Emit the run report; pairs never submitted are marked skipped
    pub fn finalize(self, cancelled: bool) -> RunReport {
        let (rows, started_at) = self.into_grid().rows(|spec, outcome| EntryReport {
            class: spec.class.clone(),
            path: spec.path.clone(),
            outcome: outcome.unwrap_or_else(|| OperationOutcome::Skipped {
                reason: if cancelled {
                    "run cancelled".to_string()
                } else {
                    "not dispatched".to_string()
                },
            }),
        });

        RunReport {
            nodes: rows
                .into_iter()
                .map(|(node, entries)| NodeReport { node, entries })
                .collect(),
            cancelled,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Aggregator<PlannedAction> {
    /// Emit the plan; pairs never probed are marked skipped
    pub fn finalize_plan(self) -> PlanReport {
        let (rows, _) = self.into_grid().rows(|spec, action| PlanEntry {
            class: spec.class.clone(),
            path: spec.path.clone(),
            action: action.unwrap_or_else(|| PlannedAction::Skipped {
                reason: "run cancelled".to_string(),
            }),
        });

        PlanReport {
            nodes: rows
                .into_iter()
                .map(|(node, entries)| NodePlan { node, entries })
                .collect(),
        }
    }
}

/// Outcome of one directory on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub class: StorageClassName,
    pub path: PathBuf,
    pub outcome: OperationOutcome,
}

/// Outcomes for one node, directories in class order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub entries: Vec<EntryReport>,
}

/// Result of a reconciliation run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Nodes in inventory order
    pub nodes: Vec<NodeReport>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Report for a run that did nothing (reconciliation disabled)
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            nodes: Vec::new(),
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.nodes
            .iter()
            .flat_map(|n| n.entries.iter().map(|e| &e.outcome))
    }

    /// Failed if anything failed, else Changed if anything changed, else Unchanged
    pub fn status(&self) -> RunStatus {
        let mut changed = false;
        for outcome in self.outcomes() {
            if outcome.is_failure() {
                return RunStatus::Failed;
            }
            changed |= outcome.is_change();
        }
        if changed {
            RunStatus::Changed
        } else {
            RunStatus::Unchanged
        }
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for outcome in self.outcomes() {
            summary.add_outcome(outcome);
        }
        summary
    }

    /// Every failed pair, with its node name
    pub fn failures(&self) -> Vec<(&str, &EntryReport)> {
        self.nodes
            .iter()
            .flat_map(|n| {
                n.entries
                    .iter()
                    .filter(|e| e.outcome.is_failure())
                    .map(move |e| (n.node.as_str(), e))
            })
            .collect()
    }

    /// True when every pair was dispatched
    pub fn is_complete(&self) -> bool {
        !self
            .outcomes()
            .any(|o| matches!(o, OperationOutcome::Skipped { .. }))
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node == name)
    }
}

/// Counts of outcomes in a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub unchanged: usize,
    pub created: usize,
    pub repaired: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn add_outcome(&mut self, outcome: &OperationOutcome) {
        match outcome {
            OperationOutcome::Unchanged => self.unchanged += 1,
            OperationOutcome::Created => self.created += 1,
            OperationOutcome::Repaired { .. } => self.repaired += 1,
            OperationOutcome::Failed { .. } => self.failed += 1,
            OperationOutcome::Skipped { .. } => self.skipped += 1,
        }
    }

    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.repaired
    }

    pub fn total(&self) -> usize {
        self.unchanged + self.created + self.repaired + self.failed + self.skipped
    }
}

/// What `apply` would do for one directory on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Already conforms
    None,
    /// Directory (and possibly base path) would be created
    Create,
    /// Listed attributes would be fixed
    Repair { drift: Vec<Drift> },
    /// Cannot proceed: probe failed or the path is not a directory
    Blocked { reason: String },
    /// Never probed (run cancelled)
    Skipped { reason: String },
}

impl PlannedAction {
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Create | Self::Repair { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub class: StorageClassName,
    pub path: PathBuf,
    pub action: PlannedAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodePlan {
    pub node: String,
    pub entries: Vec<PlanEntry>,
}

/// Probe-only preview of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub nodes: Vec<NodePlan>,
}

impl PlanReport {
    pub fn actions(&self) -> impl Iterator<Item = &PlannedAction> {
        self.nodes
            .iter()
            .flat_map(|n| n.entries.iter().map(|e| &e.action))
    }

    pub fn change_count(&self) -> usize {
        self.actions().filter(|a| a.is_change()).count()
    }

    pub fn has_changes(&self) -> bool {
        self.change_count() > 0
    }

    pub fn blocked_count(&self) -> usize {
        self.actions()
            .filter(|a| matches!(a, PlannedAction::Blocked { .. }))
            .count()
    }
}

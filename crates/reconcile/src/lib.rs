//! # Reconcile
//!
//! Converges the per-storage-class directories of a local persistent-volume
//! provider on a fleet of nodes.
//!
//! For every node and every configured storage class, one directory
//! `base_path/class` must exist with a fixed owner, group, mode and SELinux
//! type. The crate probes what exists, performs only the create / chown /
//! chmod / relabel operations that are actually needed, isolates failures
//! per node and per directory, and reports every outcome.
//!
//! ## Core Concepts
//!
//! - **DirectorySpec**: desired state of one directory, produced by [`resolve`]
//! - **ObservedState**: what a [`probe`] found on a node
//! - **Reconciler**: drives nodes concurrently with timeouts and cancellation
//! - **RunReport**: every (node, directory) outcome, in inventory order
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use reconcile::{
//!     DirectorySettings, MemoryConnector, MemoryFs, NodeTarget, Reconciler, RunStatus,
//! };
//!
//! let settings = DirectorySettings {
//!     classes: vec!["fast-ssd".into(), "slow-hdd".into()],
//!     ..Default::default()
//! };
//! let connector = Arc::new(MemoryConnector::new().with_node("node-a", Arc::new(MemoryFs::new())));
//! let targets = [NodeTarget::local("node-a")];
//!
//! let report = Reconciler::new(connector.clone()).run(true, &settings, &targets)?;
//! assert_eq!(report.status(), RunStatus::Changed);
//! assert_eq!(report.summary().created, 2);
//!
//! // A second run has nothing left to do
//! let report = Reconciler::new(connector.clone()).run(true, &settings, &targets)?;
//! assert_eq!(report.status(), RunStatus::Unchanged);
//! # Ok::<(), reconcile::Error>(())
//! ```
//!
//! ## Provider Traits
//!
//! - [`NodeFs`]: the filesystem operations of one node
//! - [`NodeConnector`]: turns a [`NodeTarget`] into a [`NodeFs`]
//! - [`ProgressCallback`]: receives outcomes as they complete
//!
//! The crate has no terminal, transport or signal dependencies; callers plug
//! those in through these traits and [`CancelToken`].

pub mod context;
pub mod engine;
pub mod error;
pub mod memory;
pub mod node;
pub mod probe;
pub mod report;
pub mod resolver;
pub mod types;

// Re-export main types at crate root
pub use context::{
    CancelToken, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT, ExecuteOptions, NoProgress,
    ProgressCallback,
};
pub use engine::{BASE_PATH_MODE, Reconciler, managed_paths, reconcile_directory, run};
pub use error::{ConfigError, Error, FailureKind, NodeError};
pub use memory::{MemoryConnector, MemoryEntry, MemoryFs};
pub use node::{FileKind, NodeConnector, NodeFs, PathStat};
pub use probe::{ObservedState, label_matches, probe};
pub use report::{
    Aggregator, EntryReport, NodePlan, NodeReport, PlanEntry, PlanReport, PlannedAction,
    RunReport, Summary,
};
pub use resolver::{DesiredState, DirectorySettings, resolve};
pub use types::{
    Attribute, DirectorySpec, Drift, Mode, NodeTarget, OperationOutcome, RunStatus,
    StorageClassName, Transport,
};

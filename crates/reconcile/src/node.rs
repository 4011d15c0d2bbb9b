//! Node capability traits
//!
//! The engine never touches a filesystem directly. It talks to a [`NodeFs`],
//! obtained per target from a [`NodeConnector`], which lets the same engine
//! drive local commands, `ssh`, or an in-memory node in tests.

use crate::error::NodeError;
use crate::types::{Mode, NodeTarget};
use std::path::Path;
use std::sync::Arc;

/// What a node reports for an existing path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStat {
    pub kind: FileKind,
    pub uid: u32,
    pub gid: u32,
    /// User name, or the numeric id if the node cannot resolve it
    pub owner: String,
    /// Group name, or the numeric id if the node cannot resolve it
    pub group: String,
    pub mode: Mode,
}

/// File type of an existing path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    /// Anything else, with the node's own description ("regular file", "symbolic link", ...)
    Other(String),
}

impl FileKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// Filesystem capabilities of a single node
///
/// Every method is a single, small operation; the engine composes them.
/// Implementations must be safe to call from several worker threads.
pub trait NodeFs: Send + Sync {
    /// Stat a path; `Ok(None)` means it does not exist
    fn stat(&self, path: &Path) -> Result<Option<PathStat>, NodeError>;

    /// SELinux context of a path; `Ok(None)` if the node does not report contexts
    fn security_context(&self, path: &Path) -> Result<Option<String>, NodeError>;

    /// Create a directory with exactly `mode`, optionally with missing parents
    fn create_dir(&self, path: &Path, mode: Mode, parents: bool) -> Result<(), NodeError>;

    /// Change the owning user (name or numeric id)
    fn chown(&self, path: &Path, owner: &str) -> Result<(), NodeError>;

    /// Change the owning group (name or numeric id)
    fn chgrp(&self, path: &Path, group: &str) -> Result<(), NodeError>;

    fn chmod(&self, path: &Path, mode: Mode) -> Result<(), NodeError>;

    /// Apply a SELinux type, or a full context if `label` contains ':'
    fn relabel(&self, path: &Path, label: &str) -> Result<(), NodeError>;
}

/// Resolves a node target into its filesystem capabilities
///
/// `connect` runs under the engine's operation timeout on its own thread;
/// a call that never returns is abandoned and the node recorded as timed out.
pub trait NodeConnector: Send + Sync {
    fn connect(&self, target: &NodeTarget) -> Result<Arc<dyn NodeFs>, NodeError>;
}

impl<F> NodeConnector for F
where
    F: Fn(&NodeTarget) -> Result<Arc<dyn NodeFs>, NodeError> + Send + Sync,
{
    fn connect(&self, target: &NodeTarget) -> Result<Arc<dyn NodeFs>, NodeError> {
        self(target)
    }
}

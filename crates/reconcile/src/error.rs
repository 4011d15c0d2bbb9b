//! Error types for directory reconciliation.
//!
//! Only [`ConfigError`] (and worker pool setup) ever aborts a run. Everything
//! that goes wrong on a node is captured as a [`NodeError`] and recorded in
//! the report under a [`FailureKind`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration, detected before any node is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Base path is relative
    #[error("base path must be absolute: {0}")]
    RelativeBasePath(PathBuf),

    /// Base path walks upwards
    #[error("base path must not contain '..' components: {0}")]
    BasePathTraversal(PathBuf),

    /// Storage class name is empty
    #[error("storage class name must not be empty")]
    EmptyClassName,

    /// Storage class name cannot be used as a single path component
    #[error("invalid storage class name '{name}': {reason}")]
    InvalidClassName { name: String, reason: &'static str },

    /// Same storage class listed twice
    #[error("duplicate storage class name: {0}")]
    DuplicateClassName(String),

    /// Owner or group is not a usable user/group name or id
    #[error("invalid {field} '{value}'")]
    InvalidPrincipal { field: &'static str, value: String },

    /// Permission bits outside 0o7777
    #[error("mode {0:#o} exceeds 0o7777")]
    ModeOutOfRange(u32),

    /// Mode string is not octal
    #[error("invalid mode '{0}': expected octal digits such as 0770")]
    InvalidMode(String),

    /// Security label contains whitespace
    #[error("invalid security label '{0}'")]
    InvalidSecurityLabel(String),

    /// Two nodes share a name
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    /// Worker pool needs at least one thread
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Errors that abort a run before dispatch.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Failure reported by a node capability (stat, mkdir, chown, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Node could not be reached at all
    #[error("node unreachable: {0}")]
    Unreachable(String),

    /// Operation was refused by the node
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// A parent directory is missing
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// Something other than a directory occupies the path
    #[error("{path} exists but is a {kind}, not a directory")]
    NotADirectory { path: PathBuf, kind: String },

    /// A node command exited non-zero
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A node command produced output we could not interpret
    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    /// The node lacks the capability (e.g. SELinux is disabled)
    #[error("not supported on this node: {0}")]
    Unsupported(String),

    /// Local I/O error while talking to the node
    #[error("I/O error: {0}")]
    Io(String),
}

impl NodeError {
    /// Returns true if the node itself is unavailable, as opposed to a single path failing
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Stage at which a (node, directory) pair failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Could not determine current state
    Probe,
    /// Directory was absent and could not be created
    Create,
    /// Directory exists but its attributes could not be fixed
    Repair,
    /// Operation did not finish in time
    Timeout,
    /// Base path could not be ensured; applies to every directory on the node
    BasePath,
}

impl FailureKind {
    /// Short label used in reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::Create => "create",
            Self::Repair => "repair",
            Self::Timeout => "timeout",
            Self::BasePath => "base path",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_classification() {
        assert!(NodeError::Unreachable("ssh: connect refused".into()).is_unreachable());
        assert!(!NodeError::NotFound(PathBuf::from("/mnt")).is_unreachable());
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::ModeOutOfRange(0o17777).to_string(),
            "mode 0o17777 exceeds 0o7777"
        );
        assert_eq!(
            ConfigError::DuplicateClassName("fast-ssd".into()).to_string(),
            "duplicate storage class name: fast-ssd"
        );
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::BasePath).unwrap();
        assert_eq!(json, "\"base_path\"");
    }
}

//! Core types for directory reconciliation

use crate::error::{ConfigError, FailureKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Name of a storage class, mapped to one subdirectory of the base path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageClassName(String);

impl StorageClassName {
    /// Validate a class name so it is usable as exactly one path component
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyClassName);
        }
        if name == "." || name == ".." {
            return Err(ConfigError::InvalidClassName {
                name,
                reason: "reserved path component",
            });
        }
        if name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidClassName {
                name,
                reason: "contains a path separator",
            });
        }
        if name.contains('\0') {
            return Err(ConfigError::InvalidClassName {
                name,
                reason: "contains a NUL byte",
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StorageClassName {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StorageClassName> for String {
    fn from(name: StorageClassName) -> Self {
        name.0
    }
}

impl fmt::Display for StorageClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission bits of a directory (at most 0o7777)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ModeRepr", into = "String")]
pub struct Mode(u32);

impl Mode {
    pub const MAX: u32 = 0o7777;

    pub fn new(bits: u32) -> Result<Self, ConfigError> {
        if bits > Self::MAX {
            return Err(ConfigError::ModeOutOfRange(bits));
        }
        Ok(Self(bits))
    }

    /// Build from raw `st_mode`, discarding file type bits
    pub fn from_st_mode(st_mode: u32) -> Self {
        Self(st_mode & Self::MAX)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    /// Parse an octal mode: "0770", "770" or "0o770"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0o")
            .or_else(|| trimmed.strip_prefix("0O"))
            .unwrap_or(trimmed);
        if digits.is_empty() || !digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(ConfigError::InvalidMode(s.to_string()));
        }
        let bits =
            u32::from_str_radix(digits, 8).map_err(|_| ConfigError::InvalidMode(s.to_string()))?;
        Self::new(bits)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.to_string()
    }
}

/// Accepted spellings of a mode in configuration files
#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Bits(u32),
    Octal(String),
}

impl TryFrom<ModeRepr> for Mode {
    type Error = ConfigError;

    fn try_from(repr: ModeRepr) -> Result<Self, Self::Error> {
        match repr {
            ModeRepr::Bits(bits) => Self::new(bits),
            ModeRepr::Octal(s) => s.parse(),
        }
    }
}

/// Desired state of one storage class directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySpec {
    pub class: StorageClassName,
    /// Always `base_path/class`
    pub path: PathBuf,
    pub owner: String,
    pub group: String,
    pub mode: Mode,
    /// SELinux type (or full context) to apply, if any
    pub security_label: Option<String>,
}

/// How to reach a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transport {
    /// Commands run on this machine
    Local,
    /// Commands run through `ssh`
    Ssh {
        host: String,
        user: Option<String>,
        port: Option<u16>,
        identity_file: Option<PathBuf>,
        options: Vec<String>,
    },
}

/// A node whose directories should be reconciled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeTarget {
    pub name: String,
    pub transport: Transport,
}

impl NodeTarget {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: Transport::Local,
        }
    }

    pub fn ssh(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: Transport::Ssh {
                host: host.into(),
                user: None,
                port: None,
                identity_file: None,
                options: Vec::new(),
            },
        }
    }
}

/// A directory attribute that reconciliation manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Owner,
    Group,
    Mode,
    SecurityLabel,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Owner => "owner",
            Self::Group => "group",
            Self::Mode => "mode",
            Self::SecurityLabel => "security label",
        })
    }
}

/// One way an existing path differs from its spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "attribute", rename_all = "snake_case")]
pub enum Drift {
    Owner { actual: String, desired: String },
    Group { actual: String, desired: String },
    Mode { actual: Mode, desired: Mode },
    SecurityLabel { actual: Option<String>, desired: String },
    /// Not repairable: something else sits where the directory should be
    NotADirectory { kind: String },
}

impl Drift {
    /// The attribute a repair would touch, or None if the drift is not repairable
    pub fn attribute(&self) -> Option<Attribute> {
        match self {
            Self::Owner { .. } => Some(Attribute::Owner),
            Self::Group { .. } => Some(Attribute::Group),
            Self::Mode { .. } => Some(Attribute::Mode),
            Self::SecurityLabel { .. } => Some(Attribute::SecurityLabel),
            Self::NotADirectory { .. } => None,
        }
    }
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner { actual, desired } => write!(f, "owner {actual} → {desired}"),
            Self::Group { actual, desired } => write!(f, "group {actual} → {desired}"),
            Self::Mode { actual, desired } => write!(f, "mode {actual} → {desired}"),
            Self::SecurityLabel { actual, desired } => write!(
                f,
                "label {} → {desired}",
                actual.as_deref().unwrap_or("(none)")
            ),
            Self::NotADirectory { kind } => write!(f, "{kind} in the way"),
        }
    }
}

/// Result of applying one directory spec on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Directory already conformed
    Unchanged,
    /// Directory was absent and has been created
    Created,
    /// Directory existed; the listed attributes were fixed
    Repaired { fixed: Vec<Attribute> },
    /// Something went wrong; other pairs are unaffected
    Failed { kind: FailureKind, reason: String },
    /// Never dispatched (run cancelled)
    Skipped { reason: String },
}

impl OperationOutcome {
    pub fn failed(kind: FailureKind, reason: impl fmt::Display) -> Self {
        Self::Failed {
            kind,
            reason: reason.to_string(),
        }
    }

    /// Check if the outcome represents a change on the node
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Repaired { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Unchanged,
    Changed,
    Failed,
}

impl RunStatus {
    /// Check if the run had no failures
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Failed => "failed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_name_validation() {
        assert!(StorageClassName::new("fast-ssd").is_ok());
        assert_eq!(StorageClassName::new(""), Err(ConfigError::EmptyClassName));
        assert!(StorageClassName::new("a/b").is_err());
        assert!(StorageClassName::new("a\\b").is_err());
        assert!(StorageClassName::new("..").is_err());
        assert!(StorageClassName::new(".").is_err());
        assert!(StorageClassName::new("nul\0byte").is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("0770".parse::<Mode>().unwrap().bits(), 0o770);
        assert_eq!("770".parse::<Mode>().unwrap().bits(), 0o770);
        assert_eq!("0o2775".parse::<Mode>().unwrap().bits(), 0o2775);
        assert!("0778".parse::<Mode>().is_err());
        assert!("".parse::<Mode>().is_err());
        assert!("rwx".parse::<Mode>().is_err());
        assert_eq!(
            "17777".parse::<Mode>(),
            Err(ConfigError::ModeOutOfRange(0o17777))
        );
    }

    #[test]
    fn test_mode_display_and_st_mode() {
        assert_eq!(Mode::new(0o770).unwrap().to_string(), "0770");
        assert_eq!(Mode::new(0o2775).unwrap().to_string(), "2775");
        assert_eq!(Mode::from_st_mode(0o40755).bits(), 0o755);
    }

    #[test]
    fn test_mode_deserializes_from_string_or_bits() {
        let from_str: Mode = serde_json::from_str("\"0750\"").unwrap();
        let from_bits: Mode = serde_json::from_str("488").unwrap();
        assert_eq!(from_str, from_bits);
        assert!(serde_json::from_str::<Mode>("\"9\"").is_err());
    }

    #[test]
    fn test_drift_attribute() {
        let drift = Drift::Mode {
            actual: Mode::new(0o755).unwrap(),
            desired: Mode::new(0o770).unwrap(),
        };
        assert_eq!(drift.attribute(), Some(Attribute::Mode));
        assert_eq!(drift.to_string(), "mode 0755 → 0770");
        assert_eq!(
            Drift::NotADirectory {
                kind: "regular file".into()
            }
            .attribute(),
            None
        );
    }

    #[test]
    fn test_outcome_classification() {
        assert!(OperationOutcome::Created.is_change());
        assert!(
            OperationOutcome::Repaired {
                fixed: vec![Attribute::Mode]
            }
            .is_change()
        );
        assert!(!OperationOutcome::Unchanged.is_change());
        assert!(OperationOutcome::failed(FailureKind::Probe, "boom").is_failure());
        assert!(RunStatus::Changed.is_success());
        assert!(!RunStatus::Failed.is_success());
    }
}

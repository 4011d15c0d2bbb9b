//! Directory spec resolver - turns settings into validated directory specs

use crate::error::ConfigError;
use crate::types::{DirectorySpec, Mode, StorageClassName};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_BASE_PATH: &str = "/mnt/local-storage";
pub const DEFAULT_OWNER: &str = "root";
pub const DEFAULT_GROUP: &str = "root";
pub const DEFAULT_MODE: u32 = 0o770;
pub const DEFAULT_SECURITY_LABEL: &str = "svirt_sandbox_file_t";

/// User/group names as accepted by useradd, or a numeric id
static PRINCIPAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9]+|[A-Za-z_][A-Za-z0-9_.-]*\$?)$").expect("valid principal regex")
});

/// Directory settings as written by the user, defaults filled in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    pub base_path: PathBuf,
    pub classes: Vec<String>,
    pub owner: String,
    pub group: String,
    pub mode: Mode,
    /// An empty string disables relabeling
    pub security_label: Option<String>,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(DEFAULT_BASE_PATH),
            classes: Vec::new(),
            owner: DEFAULT_OWNER.to_string(),
            group: DEFAULT_GROUP.to_string(),
            mode: Mode::from_st_mode(DEFAULT_MODE),
            security_label: Some(DEFAULT_SECURITY_LABEL.to_string()),
        }
    }
}

/// Fully validated desired state for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub base_path: PathBuf,
    pub specs: Vec<DirectorySpec>,
}

impl DesiredState {
    pub fn resolve(settings: &DirectorySettings) -> Result<Self, ConfigError> {
        Ok(Self {
            base_path: settings.base_path.clone(),
            specs: resolve(settings)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Produce one spec per class, in class order
///
/// No side effects; every error here is fatal for the run.
pub fn resolve(settings: &DirectorySettings) -> Result<Vec<DirectorySpec>, ConfigError> {
    validate_base_path(&settings.base_path)?;
    validate_principal("owner", &settings.owner)?;
    validate_principal("group", &settings.group)?;
    let security_label = normalize_label(settings.security_label.as_deref())?;

    let mut seen = HashSet::with_capacity(settings.classes.len());
    let mut specs = Vec::with_capacity(settings.classes.len());

    for raw in &settings.classes {
        let class = StorageClassName::new(raw.as_str())?;
        if !seen.insert(class.clone()) {
            return Err(ConfigError::DuplicateClassName(raw.clone()));
        }
        specs.push(DirectorySpec {
            path: settings.base_path.join(class.as_str()),
            class,
            owner: settings.owner.clone(),
            group: settings.group.clone(),
            mode: settings.mode,
            security_label: security_label.clone(),
        });
    }

    Ok(specs)
}

fn validate_base_path(base: &Path) -> Result<(), ConfigError> {
    if !base.is_absolute() {
        return Err(ConfigError::RelativeBasePath(base.to_path_buf()));
    }
    if base.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ConfigError::BasePathTraversal(base.to_path_buf()));
    }
    Ok(())
}

fn validate_principal(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if PRINCIPAL_RE.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidPrincipal {
            field,
            value: value.to_string(),
        })
    }
}

fn normalize_label(label: Option<&str>) -> Result<Option<String>, ConfigError> {
    match label.map(str::trim) {
        None | Some("") => Ok(None),
        Some(l) if l.contains(char::is_whitespace) => {
            Err(ConfigError::InvalidSecurityLabel(l.to_string()))
        }
        Some(l) => Ok(Some(l.to_string())),
    }
}

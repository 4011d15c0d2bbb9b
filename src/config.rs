//! pvdirs configuration file
//!
//! ```toml
//! enabled = true
//! base_path = "/mnt/local-storage"
//! classes = ["fast-ssd", "slow-hdd"]
//! mode = "0770"
//!
//! [run]
//! concurrency = 10
//! timeout_secs = 60
//!
//! [[nodes]]
//! name = "node-1"
//! transport = "ssh"
//! host = "10.0.0.11"
//! ```

use anyhow::{Context, Result, bail};
use reconcile::{DirectorySettings, ExecuteOptions, NodeTarget, Transport};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::paths;

/// Node used when the inventory is empty
pub const DEFAULT_NODE: &str = "localhost";

// ============================================================================
// Config Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Master switch; accepts booleans and Ansible-style strings ("yes", "on", ...)
    #[serde(default = "default_enabled", deserialize_with = "deserialize_flag")]
    pub enabled: bool,

    /// Base path, classes, owner, group, mode and security label
    #[serde(flatten)]
    pub directories: DirectorySettings,

    #[serde(default)]
    pub run: RunSection,

    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Maximum number of nodes worked on at once
    pub concurrency: usize,
    /// Per-operation timeout; 0 disables it
    pub timeout_secs: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            concurrency: reconcile::DEFAULT_CONCURRENCY,
            timeout_secs: reconcile::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Local,
    Ssh,
}

/// One entry of the node inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// SSH host; defaults to the node name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    /// Extra `-o` options passed to ssh
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_options: Vec<String>,
}

impl NodeEntry {
    pub fn local(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Local,
            host: None,
            user: None,
            port: None,
            identity_file: None,
            ssh_options: Vec::new(),
        }
    }

    pub fn to_target(&self) -> NodeTarget {
        let transport = match self.transport {
            TransportKind::Local => Transport::Local,
            TransportKind::Ssh => Transport::Ssh {
                host: self.host.clone().unwrap_or_else(|| self.name.clone()),
                user: self.user.clone(),
                port: self.port,
                identity_file: self.identity_file.as_deref().map(paths::expand),
                options: self.ssh_options.clone(),
            },
        };
        NodeTarget {
            name: self.name.clone(),
            transport,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!(
                "Config file not found: {} (create it or pass --config)",
                path.display()
            );
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::debug!(
            "Loaded config from {} ({} classes, {} nodes)",
            path.display(),
            config.directories.classes.len(),
            config.nodes.len()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML format")
    }

    /// Inventory with the implicit local node filled in
    pub fn inventory(&self) -> Vec<NodeEntry> {
        if self.nodes.is_empty() {
            vec![NodeEntry::local(DEFAULT_NODE)]
        } else {
            self.nodes.clone()
        }
    }

    /// Targets in inventory order, optionally restricted to `only`
    pub fn targets(&self, only: &[String]) -> Result<Vec<NodeTarget>> {
        let inventory = self.inventory();

        let known: HashSet<&str> = inventory.iter().map(|n| n.name.as_str()).collect();
        for name in only {
            if !known.contains(name.as_str()) {
                bail!("Unknown node '{}' (not in the inventory)", name);
            }
        }

        Ok(inventory
            .iter()
            .filter(|n| only.is_empty() || only.contains(&n.name))
            .map(NodeEntry::to_target)
            .collect())
    }

    pub fn options(&self) -> ExecuteOptions {
        ExecuteOptions {
            concurrency: self.run.concurrency,
            timeout: timeout_from_secs(self.run.timeout_secs),
        }
    }
}

/// 0 means no timeout
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Ansible's notion of a true value
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value,
        "True" | "1" | "true" | "TRUE" | "Yes" | "yes" | "Y" | "y" | "YES" | "on" | "ON" | "On"
    )
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i == 1,
        Flag::Text(s) => is_truthy(&s),
    })
}

// ============================================================================
// Tests
// ============================================================================

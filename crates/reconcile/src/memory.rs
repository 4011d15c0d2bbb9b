//! In-memory node for tests and simulations
//!
//! Behaves like a small POSIX filesystem: `create_dir` without `parents`
//! needs an existing parent, and every operation can be made to fail
//! (unreachable node, refused mutations) or to stall (delay).

use crate::error::NodeError;
use crate::node::{FileKind, NodeConnector, NodeFs, PathStat};
use crate::types::{Mode, NodeTarget};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_CONTEXT: &str = "system_u:object_r:mnt_t:s0";
const FIRST_REGULAR_ID: u32 = 1000;

/// A path stored in a [`MemoryFs`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub is_dir: bool,
    pub uid: u32,
    pub gid: u32,
    pub mode: Mode,
    pub context: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<PathBuf, MemoryEntry>,
    ids: BTreeMap<String, u32>,
}

impl State {
    fn id_for(&mut self, principal: &str) -> u32 {
        if let Ok(id) = principal.parse() {
            return id;
        }
        if principal == "root" {
            return 0;
        }
        let next = FIRST_REGULAR_ID + u32::try_from(self.ids.len()).unwrap_or(u32::MAX);
        *self.ids.entry(principal.to_string()).or_insert(next)
    }

    fn name_for(&self, id: u32) -> String {
        if id == 0 {
            return "root".to_string();
        }
        self.ids
            .iter()
            .find(|(_, v)| **v == id)
            .map_or_else(|| id.to_string(), |(k, _)| k.clone())
    }
}

/// In-memory [`NodeFs`]
#[derive(Debug, Default)]
pub struct MemoryFs {
    state: Mutex<State>,
    selinux: bool,
    delay: Option<Duration>,
    unreachable: AtomicBool,
    refused: Mutex<HashSet<PathBuf>>,
    calls: AtomicUsize,
    mutations: AtomicUsize,
}

impl MemoryFs {
    /// Empty node: only `/` exists
    pub fn new() -> Self {
        let fs = Self::default();
        fs.lock().entries.insert(
            PathBuf::from("/"),
            MemoryEntry {
                is_dir: true,
                uid: 0,
                gid: 0,
                mode: Mode::from_st_mode(0o755),
                context: None,
            },
        );
        fs
    }

    /// Report SELinux contexts (new paths get a generic `mnt_t` context)
    pub fn with_selinux(mut self) -> Self {
        self.selinux = true;
        self
    }

    /// Sleep before every operation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every operation as if the node were down
    pub fn unreachable(self) -> Self {
        self.unreachable.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Refuse every mutation of `path` with a permission error
    pub fn refuse(&self, path: impl AsRef<Path>) {
        lock(&self.refused).insert(path.as_ref().to_path_buf());
    }

    /// Insert a directory (and its parents) bypassing all checks
    pub fn insert_dir(&self, path: impl AsRef<Path>, owner: &str, group: &str, mode: u32) {
        let context = self.selinux.then(|| DEFAULT_CONTEXT.to_string());
        let mut state = self.lock();
        let uid = state.id_for(owner);
        let gid = state.id_for(group);
        for ancestor in path.as_ref().ancestors().skip(1) {
            state
                .entries
                .entry(ancestor.to_path_buf())
                .or_insert_with(|| MemoryEntry {
                    is_dir: true,
                    uid: 0,
                    gid: 0,
                    mode: Mode::from_st_mode(0o755),
                    context: context.clone(),
                });
        }
        state.entries.insert(
            path.as_ref().to_path_buf(),
            MemoryEntry {
                is_dir: true,
                uid,
                gid,
                mode: Mode::from_st_mode(mode),
                context,
            },
        );
    }

    /// Insert a regular file
    pub fn insert_file(&self, path: impl AsRef<Path>) {
        let context = self.selinux.then(|| DEFAULT_CONTEXT.to_string());
        self.lock().entries.insert(
            path.as_ref().to_path_buf(),
            MemoryEntry {
                is_dir: false,
                uid: 0,
                gid: 0,
                mode: Mode::from_st_mode(0o644),
                context,
            },
        );
    }

    pub fn set_context(&self, path: impl AsRef<Path>, context: &str) {
        if let Some(entry) = self.lock().entries.get_mut(path.as_ref()) {
            entry.context = Some(context.to_string());
        }
    }

    /// Set mode directly, simulating outside interference
    pub fn set_mode(&self, path: impl AsRef<Path>, mode: u32) {
        if let Some(entry) = self.lock().entries.get_mut(path.as_ref()) {
            entry.mode = Mode::from_st_mode(mode);
        }
    }

    pub fn entry(&self, path: &Path) -> Option<MemoryEntry> {
        self.lock().entries.get(path).cloned()
    }

    /// Number of operations attempted, reads included
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of mutations that succeeded
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn enter(&self) -> Result<(), NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(NodeError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    fn enter_mutation(&self, path: &Path) -> Result<(), NodeError> {
        self.enter()?;
        if lock(&self.refused).contains(path) {
            return Err(NodeError::PermissionDenied(path.to_path_buf()));
        }
        Ok(())
    }

    fn update(
        &self,
        path: &Path,
        f: impl FnOnce(&mut State, &mut MemoryEntry),
    ) -> Result<(), NodeError> {
        self.enter_mutation(path)?;
        let mut state = self.lock();
        let mut entry = state
            .entries
            .get(path)
            .cloned()
            .ok_or_else(|| NodeError::NotFound(path.to_path_buf()))?;
        f(&mut state, &mut entry);
        state.entries.insert(path.to_path_buf(), entry);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl NodeFs for MemoryFs {
    fn stat(&self, path: &Path) -> Result<Option<PathStat>, NodeError> {
        self.enter()?;
        let state = self.lock();
        Ok(state.entries.get(path).map(|entry| PathStat {
            kind: if entry.is_dir {
                FileKind::Directory
            } else {
                FileKind::Other("regular file".to_string())
            },
            uid: entry.uid,
            gid: entry.gid,
            owner: state.name_for(entry.uid),
            group: state.name_for(entry.gid),
            mode: entry.mode,
        }))
    }

    fn security_context(&self, path: &Path) -> Result<Option<String>, NodeError> {
        self.enter()?;
        if !self.selinux {
            return Ok(None);
        }
        let state = self.lock();
        let entry = state
            .entries
            .get(path)
            .ok_or_else(|| NodeError::NotFound(path.to_path_buf()))?;
        Ok(entry.context.clone())
    }

    fn create_dir(&self, path: &Path, mode: Mode, parents: bool) -> Result<(), NodeError> {
        self.enter_mutation(path)?;
        let context = self.selinux.then(|| DEFAULT_CONTEXT.to_string());
        let mut state = self.lock();

        if let Some(existing) = state.entries.get(path) {
            if parents && existing.is_dir {
                return Ok(());
            }
            return Err(NodeError::CommandFailed {
                command: format!("mkdir {}", path.display()),
                stderr: "File exists".to_string(),
            });
        }

        let missing: Vec<PathBuf> = path
            .ancestors()
            .skip(1)
            .take_while(|a| !state.entries.contains_key(*a))
            .map(Path::to_path_buf)
            .collect();
        if !missing.is_empty() && !parents {
            return Err(NodeError::NotFound(missing[0].clone()));
        }
        for ancestor in missing {
            state.entries.insert(
                ancestor,
                MemoryEntry {
                    is_dir: true,
                    uid: 0,
                    gid: 0,
                    mode: Mode::from_st_mode(0o755),
                    context: context.clone(),
                },
            );
        }

        state.entries.insert(
            path.to_path_buf(),
            MemoryEntry {
                is_dir: true,
                uid: 0,
                gid: 0,
                mode,
                context,
            },
        );
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn chown(&self, path: &Path, owner: &str) -> Result<(), NodeError> {
        self.update(path, |state, entry| entry.uid = state.id_for(owner))
    }

    fn chgrp(&self, path: &Path, group: &str) -> Result<(), NodeError> {
        self.update(path, |state, entry| entry.gid = state.id_for(group))
    }

    fn chmod(&self, path: &Path, mode: Mode) -> Result<(), NodeError> {
        self.update(path, |_, entry| entry.mode = mode)
    }

    fn relabel(&self, path: &Path, label: &str) -> Result<(), NodeError> {
        if !self.selinux {
            self.enter()?;
            return Err(NodeError::Unsupported(format!(
                "relabel {}",
                path.display()
            )));
        }
        self.update(path, |_, entry| {
            let context = if label.contains(':') {
                label.to_string()
            } else {
                let current = entry.context.as_deref().unwrap_or(DEFAULT_CONTEXT);
                let mut parts: Vec<&str> = current.split(':').collect();
                if parts.len() > 2 {
                    parts[2] = label;
                }
                parts.join(":")
            };
            entry.context = Some(context);
        })
    }
}

/// Connector over a fixed set of in-memory nodes, keyed by node name
#[derive(Debug, Default)]
pub struct MemoryConnector {
    nodes: HashMap<String, Arc<MemoryFs>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, name: impl Into<String>, fs: Arc<MemoryFs>) -> Self {
        self.nodes.insert(name.into(), fs);
        self
    }

    pub fn node(&self, name: &str) -> Option<&Arc<MemoryFs>> {
        self.nodes.get(name)
    }

    /// Number of times `connect` was called
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl NodeConnector for MemoryConnector {
    fn connect(&self, target: &NodeTarget) -> Result<Arc<dyn NodeFs>, NodeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.nodes
            .get(&target.name)
            .map(|fs| Arc::clone(fs) as Arc<dyn NodeFs>)
            .ok_or_else(|| NodeError::Unreachable(format!("unknown node {}", target.name)))
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

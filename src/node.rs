//! Command-backed node: coreutils over a local shell or ssh

use reconcile::{FileKind, Mode, NodeConnector, NodeError, NodeFs, NodeTarget, PathStat};
use std::path::Path;
use std::sync::Arc;

use crate::runner::{CommandOutput, Runner};

/// `uid|gid|user|group|octal mode|file type`
const STAT_FORMAT: &str = "%u|%g|%U|%G|%a|%F";

/// What `stat %U/%G` prints for ids without a name
const UNKNOWN_NAME: &str = "UNKNOWN";

pub struct CommandNode {
    runner: Runner,
}

impl CommandNode {
    pub fn new(runner: Runner) -> Self {
        Self { runner }
    }

    fn run(&self, path: &Path, program: &str, args: &[&str]) -> Result<CommandOutput, NodeError> {
        let out = self.runner.run(program, args)?;
        if out.success {
            Ok(out)
        } else {
            Err(classify_failure(program, path, &out.stderr))
        }
    }

    fn mutate(&self, path: &Path, program: &str, args: &[&str]) -> Result<(), NodeError> {
        self.run(path, program, args).map(|_| ())
    }
}

impl NodeFs for CommandNode {
    fn stat(&self, path: &Path) -> Result<Option<PathStat>, NodeError> {
        let path_arg = path.to_string_lossy();
        match self.run(path, "stat", &["-c", STAT_FORMAT, "--", &*path_arg]) {
            Ok(out) => parse_stat(&out.stdout).map(Some),
            Err(NodeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn security_context(&self, path: &Path) -> Result<Option<String>, NodeError> {
        let path_arg = path.to_string_lossy();
        match self.run(path, "stat", &["-c", "%C", "--", &*path_arg]) {
            Ok(out) => Ok(parse_context(&out.stdout)),
            Err(NodeError::Unsupported(reason)) => {
                log::debug!("security contexts unsupported: {}", reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn create_dir(&self, path: &Path, mode: Mode, parents: bool) -> Result<(), NodeError> {
        let path_arg = path.to_string_lossy();
        let mode_arg = mode.to_string();
        let mut args = vec!["-m", mode_arg.as_str()];
        if parents {
            args.push("-p");
        }
        args.extend(["--", &*path_arg]);
        self.mutate(path, "mkdir", &args)
    }

    fn chown(&self, path: &Path, owner: &str) -> Result<(), NodeError> {
        let path_arg = path.to_string_lossy();
        self.mutate(path, "chown", &["--", owner, &*path_arg])
    }

    fn chgrp(&self, path: &Path, group: &str) -> Result<(), NodeError> {
        let path_arg = path.to_string_lossy();
        self.mutate(path, "chgrp", &["--", group, &*path_arg])
    }

    fn chmod(&self, path: &Path, mode: Mode) -> Result<(), NodeError> {
        let path_arg = path.to_string_lossy();
        let mode_arg = mode.to_string();
        self.mutate(path, "chmod", &[mode_arg.as_str(), "--", &*path_arg])
    }

    fn relabel(&self, path: &Path, label: &str) -> Result<(), NodeError> {
        let path_arg = path.to_string_lossy();
        if label.contains(':') {
            self.mutate(path, "chcon", &["--", label, &*path_arg])
        } else {
            self.mutate(path, "chcon", &["-t", label, "--", &*path_arg])
        }
    }
}

/// Parse one line of `stat -c STAT_FORMAT`
fn parse_stat(output: &str) -> Result<PathStat, NodeError> {
    let unexpected = || NodeError::UnexpectedOutput {
        command: "stat".to_string(),
        output: output.to_string(),
    };

    let fields: Vec<&str> = output.trim().splitn(6, '|').collect();
    let [uid, gid, owner, group, mode, kind] = fields[..] else {
        return Err(unexpected());
    };

    let uid: u32 = uid.parse().map_err(|_| unexpected())?;
    let gid: u32 = gid.parse().map_err(|_| unexpected())?;
    let mode: Mode = mode.parse().map_err(|_| unexpected())?;

    let name_or_id = |name: &str, id: u32| {
        if name == UNKNOWN_NAME {
            id.to_string()
        } else {
            name.to_string()
        }
    };

    Ok(PathStat {
        kind: if kind == "directory" {
            FileKind::Directory
        } else {
            FileKind::Other(kind.to_string())
        },
        uid,
        gid,
        owner: name_or_id(owner, uid),
        group: name_or_id(group, gid),
        mode,
    })
}

/// `stat %C` prints "?" when the filesystem has no context
fn parse_context(output: &str) -> Option<String> {
    let context = output.trim();
    (!context.is_empty() && context != "?").then(|| context.to_string())
}

/// stderr fragments meaning the node has no SELinux contexts to offer
///
/// GNU `stat %C` on a host without SELinux fails with ENODATA.
const NO_CONTEXT_MARKERS: [&str; 4] = [
    "not supported",
    "selinux is disabled",
    "no data available",
    "failed to get security context",
];

/// Map a failed command's stderr to a node error
fn classify_failure(program: &str, path: &Path, stderr: &str) -> NodeError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("no such file or directory") {
        NodeError::NotFound(path.to_path_buf())
    } else if lower.contains("permission denied") || lower.contains("operation not permitted") {
        NodeError::PermissionDenied(path.to_path_buf())
    } else if NO_CONTEXT_MARKERS.iter().any(|m| lower.contains(m)) {
        NodeError::Unsupported(stderr.trim().to_string())
    } else {
        NodeError::CommandFailed {
            command: program.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

/// Connects to nodes by running coreutils locally or through ssh
///
/// Connecting is lazy: nothing runs until the first filesystem call, which
/// the engine already bounds with its timeout. An ssh node that cannot be
/// reached surfaces as `Unreachable` from the base path step.
pub struct CommandConnector;

impl NodeConnector for CommandConnector {
    fn connect(&self, target: &NodeTarget) -> Result<Arc<dyn NodeFs>, NodeError> {
        log::debug!("using {:?} transport for {}", target.transport, target.name);
        Ok(Arc::new(CommandNode::new(Runner::for_transport(&target.transport))))
    }
}

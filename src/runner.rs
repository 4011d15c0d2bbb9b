use reconcile::{NodeError, Transport};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// ssh exits with this status when the connection itself failed
const SSH_CONNECTION_FAILED: i32 = 255;

/// Captured result of a node command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs commands on a node, either here or through ssh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runner {
    Local,
    Ssh {
        host: String,
        user: Option<String>,
        port: Option<u16>,
        identity_file: Option<PathBuf>,
        options: Vec<String>,
    },
}

impl Runner {
    pub fn for_transport(transport: &Transport) -> Self {
        match transport {
            Transport::Local => Self::Local,
            Transport::Ssh {
                host,
                user,
                port,
                identity_file,
                options,
            } => Self::Ssh {
                host: host.clone(),
                user: user.clone(),
                port: *port,
                identity_file: identity_file.clone(),
                options: options.clone(),
            },
        }
    }

    /// Run a command and capture output, with the C locale so messages are parseable
    pub fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NodeError> {
        let mut cmd = self.command(program, args);
        log::trace!("running {:?}", cmd);

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| NodeError::Io(format!("Failed to execute {}: {}", program, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if matches!(self, Self::Ssh { .. }) && output.status.code() == Some(SSH_CONNECTION_FAILED) {
            return Err(NodeError::Unreachable(stderr));
        }

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr,
        })
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        match self {
            Self::Local => {
                let mut cmd = Command::new(program);
                cmd.args(args).env("LC_ALL", "C");
                cmd
            }
            Self::Ssh { host, .. } => {
                let mut cmd = Command::new("ssh");
                cmd.args(self.ssh_args());
                cmd.arg(host);
                cmd.arg(remote_command(program, args));
                cmd
            }
        }
    }

    /// ssh options, without the destination
    fn ssh_args(&self) -> Vec<String> {
        let Self::Ssh {
            user,
            port,
            identity_file,
            options,
            ..
        } = self
        else {
            return Vec::new();
        };

        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
        ];
        if let Some(user) = user {
            args.extend(["-l".to_string(), user.clone()]);
        }
        if let Some(port) = port {
            args.extend(["-p".to_string(), port.to_string()]);
        }
        if let Some(identity) = identity_file {
            args.extend(["-i".to_string(), identity.display().to_string()]);
        }
        for option in options {
            args.extend(["-o".to_string(), option.clone()]);
        }
        args
    }
}

/// Command line for the remote shell
fn remote_command(program: &str, args: &[&str]) -> String {
    let mut words = vec!["env".to_string(), "LC_ALL=C".to_string(), shell_quote(program)];
    words.extend(args.iter().map(|a| shell_quote(a)));
    words.join(" ")
}

/// Quote a word for a POSIX shell, leaving plain words untouched
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "pvdirs")]
#[command(version)]
#[command(
    about = "Reconcile local persistent-volume directories across a fleet of nodes",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/pvdirs/config.toml)
    #[arg(short, long, global = true, env = "PVDIRS_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create and repair storage class directories on every node
    Apply(ApplyArgs),

    /// Show what apply would change, without changing anything
    Diff(DiffArgs),

    /// Validate the configuration and print the resolved directories
    Check,

    /// Print the effective configuration
    Show,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Only reconcile these nodes (repeatable)
    #[arg(short, long = "node", value_name = "NAME")]
    pub nodes: Vec<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Number of nodes worked on in parallel (overrides config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Per-operation timeout in seconds, 0 for none (overrides config)
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct DiffArgs {
    /// Only probe these nodes (repeatable)
    #[arg(short, long = "node", value_name = "NAME")]
    pub nodes: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Number of nodes probed in parallel (overrides config)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::parse_from([
            "pvdirs", "-vv", "apply", "--node", "a", "-n", "b", "--yes", "--format", "json",
            "--jobs", "3", "--timeout", "0",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.nodes, ["a", "b"]);
        assert!(args.yes);
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.jobs, Some(3));
        assert_eq!(args.timeout, Some(0));
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["pvdirs", "check", "--config", "/etc/pvdirs.toml"]);
        assert_eq!(cli.config.as_deref(), Some("/etc/pvdirs.toml"));
        assert!(matches!(cli.command, Command::Check));
    }
}

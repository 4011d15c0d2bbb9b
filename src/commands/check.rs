//! `pvdirs check` and `pvdirs show` - offline configuration commands

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use reconcile::{DesiredState, Transport, managed_paths};
use std::process::ExitCode;

use crate::Context;
use crate::config::Config;
use crate::paths;
use crate::ui;

/// Validate the config and print what would be managed, without contacting any node
pub fn check(ctx: &Context) -> Result<ExitCode> {
    let path = paths::config_file(ctx.config.as_deref())?;
    let config = Config::load(&path)?;
    let desired =
        DesiredState::resolve(&config.directories).context("Invalid directory settings")?;
    let targets = config.targets(&[])?;
    config.options().validate()?;

    ui::header("pvdirs check");
    ui::kv("Config", &path.display().to_string());
    ui::kv(
        "Enabled",
        &if config.enabled {
            "yes".green().to_string()
        } else {
            "no".yellow().to_string()
        },
    );

    ui::section("Directories");
    if desired.is_empty() {
        ui::dim("no storage classes configured");
    }
    for spec in &desired.specs {
        println!(
            "  {} {} {}",
            "→".cyan(),
            spec.path.display(),
            format!(
                "{}:{} {} {}",
                spec.owner,
                spec.group,
                spec.mode,
                spec.security_label.as_deref().unwrap_or("(no relabel)")
            )
            .dimmed()
        );
    }
    if ctx.verbose > 0 {
        ui::dim(&format!(
            "{} paths managed per node",
            managed_paths(&desired).len()
        ));
    }

    ui::section("Nodes");
    for target in &targets {
        let how = match &target.transport {
            Transport::Local => "local".to_string(),
            Transport::Ssh {
                host, user, port, ..
            } => {
                let mut dest = String::from("ssh ");
                if let Some(user) = user {
                    dest.push_str(user);
                    dest.push('@');
                }
                dest.push_str(host);
                if let Some(port) = port {
                    dest.push_str(&format!(":{port}"));
                }
                dest
            }
        };
        println!("  {} {} {}", "•".dimmed(), target.name.bold(), how.dimmed());
    }

    println!();
    ui::success("Configuration is valid");
    Ok(ExitCode::SUCCESS)
}

/// Print the effective configuration, defaults and implicit node included
pub fn show(ctx: &Context) -> Result<ExitCode> {
    let path = paths::config_file(ctx.config.as_deref())?;
    let mut config = Config::load(&path)?;
    config.nodes = config.inventory();

    let rendered = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    if !ctx.quiet {
        ui::dim(&format!("# {}", path.display()));
    }
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

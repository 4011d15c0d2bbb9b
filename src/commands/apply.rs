//! `pvdirs apply` - converge every node to the configured directories

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use reconcile::{CancelToken, DesiredState, Reconciler, RunReport};
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

use crate::Context;
use crate::cli::{ApplyArgs, OutputFormat};
use crate::node::CommandConnector;
use crate::progress::BarProgress;
use crate::render::{self, JsonRunReport};
use crate::signals;
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<ExitCode> {
    let config = super::load_config(ctx)?;
    let targets = config.targets(&args.nodes)?;
    let options = super::execute_options(&config, args.jobs, args.timeout);
    let text = args.format == OutputFormat::Text;

    if config.enabled {
        let desired =
            DesiredState::resolve(&config.directories).context("Invalid directory settings")?;

        if text && !ctx.quiet {
            ui::header("pvdirs apply");
            ui::kv("Base path", &desired.base_path.display().to_string());
            ui::kv(
                "Classes",
                &desired
                    .specs
                    .iter()
                    .map(|s| s.class.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            ui::kv("Nodes", &ui::plural(targets.len(), "node"));
            println!();
        }

        if !args.yes && !confirm(targets.len())? {
            ui::info("Aborted");
            return Ok(ExitCode::SUCCESS);
        }
    } else if text {
        ui::info("Reconciliation is disabled (enabled = false), nothing to do");
    }

    let cancel = CancelToken::new();
    signals::cancel_on_signal(&cancel)?;
    let progress = BarProgress::new(text && !ctx.quiet);

    let report = Reconciler::new(Arc::new(CommandConnector))
        .with_options(options)
        .with_progress(&progress)
        .with_cancel(cancel)
        .run(config.enabled, &config.directories, &targets)?;

    match args.format {
        OutputFormat::Json => println!("{}", render::json(&JsonRunReport::new(&report))?),
        OutputFormat::Text if config.enabled => {
            render::print_run(&report, ctx.verbose > 0);
            print_failures(&report);
        }
        OutputFormat::Text => {}
    }

    Ok(ExitCode::from(exit_status(&report)))
}

/// 0 on success, 1 if anything failed or a cancellation left work undone
pub fn exit_status(report: &RunReport) -> u8 {
    if !report.status().is_success() || (report.cancelled && !report.is_complete()) {
        1
    } else {
        0
    }
}

fn confirm(nodes: usize) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("Refusing to apply without a terminal to confirm; pass --yes");
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(format!("Reconcile directories on {}?", ui::plural(nodes, "node")))
        .default(true)
        .interact()?;
    Ok(confirmed)
}

fn print_failures(report: &RunReport) {
    let failures = report.failures();
    if failures.is_empty() {
        return;
    }
    ui::section("Failures");
    for (node, entry) in failures {
        println!(
            "  {} {} {} {}",
            "✗".red(),
            node.bold(),
            entry.path.display(),
            render::outcome_text(&entry.outcome).dimmed()
        );
    }
}

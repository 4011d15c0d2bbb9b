//! `pvdirs diff` - probe nodes and preview what apply would change

use anyhow::{Context as AnyhowContext, Result};
use reconcile::{CancelToken, DesiredState, PlanReport, Reconciler};
use std::process::ExitCode;
use std::sync::Arc;

use crate::Context;
use crate::cli::{DiffArgs, OutputFormat};
use crate::node::CommandConnector;
use crate::render;
use crate::signals;
use crate::ui;

pub fn run(ctx: &Context, args: &DiffArgs) -> Result<ExitCode> {
    let config = super::load_config(ctx)?;
    let targets = config.targets(&args.nodes)?;
    let options = super::execute_options(&config, args.jobs, None);

    if !config.enabled {
        if args.format == OutputFormat::Json {
            println!("{}", render::json(&PlanReport::default())?);
        } else {
            ui::info("Reconciliation is disabled (enabled = false), nothing to do");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let desired =
        DesiredState::resolve(&config.directories).context("Invalid directory settings")?;

    let cancel = CancelToken::new();
    signals::cancel_on_signal(&cancel)?;

    let plan = Reconciler::new(Arc::new(CommandConnector))
        .with_options(options)
        .with_cancel(cancel)
        .plan(&desired, &targets)?;

    match args.format {
        OutputFormat::Json => println!("{}", render::json(&plan)?),
        OutputFormat::Text => {
            if !ctx.quiet {
                ui::header("pvdirs diff");
            }
            render::print_plan(&plan, ctx.verbose > 0);
        }
    }

    Ok(ExitCode::from(exit_status(&plan)))
}

/// 1 when some directory cannot be reconciled, so scripts can gate on it
pub fn exit_status(plan: &PlanReport) -> u8 {
    u8::from(plan.blocked_count() > 0)
}

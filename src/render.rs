//! Text and JSON rendering of run and plan reports

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use reconcile::{OperationOutcome, PlanReport, PlannedAction, RunReport, RunStatus, Summary};
use serde::Serialize;

use crate::ui;

/// Serialize any report as pretty JSON
pub fn json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize report")
}

/// Report plus its derived status and counts, as emitted by `apply --format json`
#[derive(Serialize)]
pub struct JsonRunReport<'a> {
    pub status: RunStatus,
    pub summary: Summary,
    #[serde(flatten)]
    pub report: &'a RunReport,
}

impl<'a> JsonRunReport<'a> {
    pub fn new(report: &'a RunReport) -> Self {
        Self {
            status: report.status(),
            summary: report.summary(),
            report,
        }
    }
}

pub fn outcome_symbol(outcome: &OperationOutcome) -> ColoredString {
    match outcome {
        OperationOutcome::Unchanged => "○".dimmed(),
        OperationOutcome::Created => "✓".green(),
        OperationOutcome::Repaired { .. } => "✓".yellow(),
        OperationOutcome::Failed { .. } => "✗".red(),
        OperationOutcome::Skipped { .. } => "⊘".dimmed(),
    }
}

pub fn outcome_text(outcome: &OperationOutcome) -> String {
    match outcome {
        OperationOutcome::Unchanged => "unchanged".to_string(),
        OperationOutcome::Created => "created".to_string(),
        OperationOutcome::Repaired { fixed } => format!(
            "repaired {}",
            fixed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        OperationOutcome::Failed { kind, reason } => format!("{kind} failed: {reason}"),
        OperationOutcome::Skipped { reason } => format!("skipped ({reason})"),
    }
}

/// Per-node outcome listing followed by the summary
pub fn print_run(report: &RunReport, verbose: bool) {
    for node in &report.nodes {
        let settled = node
            .entries
            .iter()
            .all(|e| e.outcome == OperationOutcome::Unchanged);

        // Settled nodes collapse to one line unless -v
        if !verbose && settled {
            println!("  {} {} {}", "○".dimmed(), node.node.bold(), "all unchanged".dimmed());
            continue;
        }

        ui::section(&node.node);
        for entry in &node.entries {
            if !verbose && entry.outcome == OperationOutcome::Unchanged {
                continue;
            }
            println!(
                "  {} {} {}",
                outcome_symbol(&entry.outcome),
                entry.path.display(),
                outcome_text(&entry.outcome).dimmed()
            );
        }
    }
    print_summary(report);
}

pub fn print_summary(report: &RunReport) {
    let summary = report.summary();
    let elapsed = report.finished_at - report.started_at;

    println!();
    match report.status() {
        RunStatus::Unchanged => println!(
            "  {} All directories already conform",
            "✓".green().bold()
        ),
        RunStatus::Changed => println!("  {} Directories reconciled", "✓".green().bold()),
        RunStatus::Failed => println!(
            "  {} Reconciliation finished with errors",
            "⚠".yellow().bold()
        ),
    }

    if summary.created > 0 {
        println!("    • {} created", summary.created);
    }
    if summary.repaired > 0 {
        println!("    • {} repaired", summary.repaired);
    }
    if summary.unchanged > 0 {
        println!("    • {} unchanged", summary.unchanged);
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
    }
    if report.cancelled {
        println!("    • {}", "run was cancelled".yellow());
    }
    ui::dim(&format!(
        "Started {} ({:.1}s)",
        report
            .started_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S"),
        elapsed.num_milliseconds() as f64 / 1000.0
    ));
}

pub fn action_symbol(action: &PlannedAction) -> ColoredString {
    match action {
        PlannedAction::None => "○".dimmed(),
        PlannedAction::Create => "+".green(),
        PlannedAction::Repair { .. } => "~".yellow(),
        PlannedAction::Blocked { .. } => "✗".red(),
        PlannedAction::Skipped { .. } => "⊘".dimmed(),
    }
}

pub fn action_text(action: &PlannedAction) -> String {
    match action {
        PlannedAction::None => "up to date".to_string(),
        PlannedAction::Create => "create".to_string(),
        PlannedAction::Repair { drift } => drift
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        PlannedAction::Blocked { reason } => format!("blocked: {reason}"),
        PlannedAction::Skipped { reason } => format!("skipped ({reason})"),
    }
}

pub fn print_plan(plan: &PlanReport, verbose: bool) {
    for node in &plan.nodes {
        ui::section(&node.node);
        let mut shown = 0;
        for entry in &node.entries {
            if !verbose && entry.action == PlannedAction::None {
                continue;
            }
            shown += 1;
            println!(
                "  {} {} {}",
                action_symbol(&entry.action),
                entry.path.display(),
                action_text(&entry.action).dimmed()
            );
        }
        if shown == 0 {
            ui::dim("up to date");
        }
    }

    println!();
    let changes = plan.change_count();
    if changes == 0 {
        println!("  {} Nothing to change", "✓".green().bold());
    } else {
        println!(
            "  {} {} would be made",
            "→".cyan().bold(),
            ui::plural(changes, "change")
        );
    }
    let blocked = plan.blocked_count();
    if blocked > 0 {
        println!(
            "  {} {} blocked, apply cannot fix them",
            "⚠".yellow().bold(),
            blocked
        );
    }
}

//! Apply and destroy runs with terminal UI

use anyhow::{Context as _, Result};
use colored::Colorize;
use provisionkit::{
    ExecuteOptions, ExecuteSummary, ExecutionReport, Executor, ResourceAddress,
    destroy_order, ready_sets,
};
use std::collections::BTreeSet;

use super::differ::{display_destroy, display_plan};
use super::planner::{Plan, Workspace};
use crate::Context;
use crate::progress::CliProgress;

/// Command-line knobs layered over the stack settings
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub yes: bool,
    pub jobs: Option<usize>,
    pub halt_on_failure: bool,
}

impl RunOptions {
    fn execute_options(&self, ws: &Workspace) -> ExecuteOptions {
        let mut opts = ws.stack.settings().execute_options();
        opts.dry_run = self.dry_run;
        opts.halt_on_failure = self.halt_on_failure;
        if let Some(jobs) = self.jobs {
            opts.jobs = jobs.max(1);
        }
        opts
    }
}

/// Show the plan, confirm, apply and persist state
pub fn apply(
    ctx: &Context,
    ws: &mut Workspace,
    plan: &Plan,
    opts: &RunOptions,
) -> Result<ExecuteSummary> {
    if !display_plan(ws, plan, ctx.verbose > 0) {
        return Ok(ExecuteSummary::default());
    }

    if !opts.yes && !opts.dry_run && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(ExecuteSummary::default());
    }

    let batches = ready_sets(&plan.graph).len();
    let progress = CliProgress::new(batches, ctx.quiet);

    println!();
    println!(
        "  {} Applying with {}...",
        "→".cyan(),
        ws.provider.name().bold()
    );
    let report = Executor::new(ws.provider.as_ref(), opts.execute_options(ws))
        .with_progress(&progress)
        .apply(&ws.store, &plan.graph, &plan.reconciliation, &mut ws.state);

    finish(ws, report, opts.dry_run, "applied")
}

/// Show the teardown order, confirm, destroy and persist state
pub fn destroy(
    ctx: &Context,
    ws: &mut Workspace,
    targets: &BTreeSet<ResourceAddress>,
    opts: &RunOptions,
) -> Result<ExecuteSummary> {
    if ws.state.is_empty() {
        println!();
        println!("  {} Nothing to destroy, state is empty", "✓".green());
        return Ok(ExecuteSummary::default());
    }

    let sets: Vec<Vec<ResourceAddress>> = destroy_order(&ws.state)?
        .into_iter()
        .map(|set| {
            set.into_iter()
                .filter(|a| targets.is_empty() || targets.contains(a))
                .collect::<Vec<_>>()
        })
        .filter(|set| !set.is_empty())
        .collect();
    display_destroy(&sets, &ws.state);

    if !opts.yes && !opts.dry_run && !confirm_destroy()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(ExecuteSummary::default());
    }

    let progress = CliProgress::new(sets.len(), ctx.quiet);

    let selection = (!targets.is_empty()).then_some(targets);
    let report = Executor::new(ws.provider.as_ref(), opts.execute_options(ws))
        .with_progress(&progress)
        .destroy(&mut ws.state, selection);

    finish(ws, report, opts.dry_run, "destroyed")
}

/// Persist whatever state the run produced, then report
fn finish(
    ws: &mut Workspace,
    report: provisionkit::Result<ExecutionReport>,
    dry_run: bool,
    verb: &str,
) -> Result<ExecuteSummary> {
    if dry_run {
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
        return Ok(report?.summary());
    }

    // State is saved even for failed runs so created resources stay tracked
    ws.save_state()
        .with_context(|| format!("Failed to save state to {}", ws.state_store.path().display()))?;
    let report = report?;

    let summary = report.summary();
    print_summary(&summary, &report, verb);
    if report.cancelled {
        println!("    • {}", "run was interrupted".yellow());
    }
    Ok(summary)
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

fn confirm_destroy() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Really destroy these resources?")
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Print final summary
fn print_summary(summary: &ExecuteSummary, report: &ExecutionReport, verb: &str) {
    println!();
    if summary.is_success() {
        println!("  {} Stack {} successfully!", "✓".green().bold(), verb);
    } else {
        println!("  {} Stack {} with errors", "⚠".yellow().bold(), verb);
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
        for address in report.failed() {
            println!("      {} {}", "✗".red(), address);
        }
    }
}

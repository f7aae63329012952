//! Plan display

use colored::Colorize;
use provisionkit::{
    Action, ChangeSummary, Config, ResourceAddress, StateSnapshot, destroy_order, ready_sets,
};
use similar::{ChangeTag, TextDiff};

use super::planner::{Plan, Workspace};
use crate::ui;

const RULE: &str = "─────────────────────────────────────────────────────";
const TITLE_RULE: &str = "──────────────────────────";

fn pretty(config: &Config) -> String {
    let mut text = serde_json::to_string_pretty(config).unwrap_or_default();
    text.push('\n');
    text
}

/// Changed lines between two configurations
pub fn config_diff(old: &Config, new: &Config) -> Vec<(ChangeTag, String)> {
    let (old, new) = (pretty(old), pretty(new));
    TextDiff::from_lines(&old, &new)
        .iter_all_changes()
        .filter(|c| c.tag() != ChangeTag::Equal)
        .map(|c| (c.tag(), c.value().trim_end().to_string()))
        .collect()
}

fn print_config_diff(old: &Config, new: &Config) {
    for (tag, line) in config_diff(old, new) {
        match tag {
            ChangeTag::Delete => println!("│       {}", format!("- {line}").red()),
            ChangeTag::Insert => println!("│       {}", format!("+ {line}").green()),
            ChangeTag::Equal => {}
        }
    }
}

fn detail(action: &Action) -> String {
    match action {
        Action::Update { changed } => format!("({})", changed.join(", ")),
        Action::Replace { reason } => format!("({reason})"),
        Action::Delete => "(no longer declared)".to_string(),
        Action::Create | Action::NoOp => String::new(),
    }
}

/// Addresses with changes, in the order they will be processed
pub fn ordered_changes<'p>(
    plan: &'p Plan,
    state: &StateSnapshot,
) -> Vec<(&'p ResourceAddress, &'p Action)> {
    let mut deletes: Vec<(&ResourceAddress, &Action)> = plan
        .reconciliation
        .iter()
        .filter(|(addr, action)| matches!(action, Action::Delete) && !plan.graph.contains(addr))
        .collect();
    if let Ok(order) = destroy_order(state) {
        let order = order.concat();
        deletes.sort_by_key(|(addr, _)| order.iter().position(|a| a == *addr));
    }

    // Removed resources go once their declared dependents have been updated
    let mut ordered = Vec::new();
    for address in ready_sets(&plan.graph).concat() {
        if let Some((addr, action)) = plan
            .reconciliation
            .iter()
            .find(|(a, _)| **a == address)
            .filter(|(_, action)| action.is_change())
        {
            ordered.push((addr, action));
        }
    }
    ordered.extend(deletes);
    ordered
}

pub fn summary_line(summary: &ChangeSummary) -> String {
    format!(
        "Plan: {} to add, {} to change, {} to replace, {} to destroy.",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().magenta(),
        summary.delete.to_string().red()
    )
}

/// Print the plan; returns whether anything would change
pub fn display_plan(ws: &Workspace, plan: &Plan, verbose: bool) -> bool {
    let summary = plan.reconciliation.summary();
    if !summary.has_changes() {
        println!();
        println!(
            "  {} No changes. {} resources match the stack.",
            "✓".green(),
            summary.no_op
        );
        return false;
    }

    println!();
    println!("┌─ {} {}", "Execution Plan".bold(), TITLE_RULE);
    println!("│");
    for (address, action) in ordered_changes(plan, &ws.state) {
        println!(
            "│ {:>3} {} {}",
            ui::action_symbol(action),
            address.to_string().bold(),
            detail(action).dimmed()
        );

        let declared = ws.store.get(address).map(|d| &d.config);
        let recorded = ws.state.get(address).map(|r| &r.config);
        match (action, recorded, declared) {
            (Action::Update { .. } | Action::Replace { .. }, Some(old), Some(new)) => {
                print_config_diff(old, new);
            }
            (Action::Create, _, Some(new)) if verbose => {
                print_config_diff(&Config::new(), new);
            }
            _ => {}
        }
    }
    println!("│");
    println!("├{RULE}");
    println!("│ {}", summary_line(&summary));
    println!("└{RULE}");
    true
}

/// Print what a destroy run would delete, set by set
pub fn display_destroy(sets: &[Vec<ResourceAddress>], state: &StateSnapshot) {
    println!();
    println!("┌─ {} {}", "Destroy Plan".red().bold(), TITLE_RULE);
    println!("│");
    for (i, set) in sets.iter().enumerate() {
        println!("│ {}", format!("set {}", i + 1).dimmed());
        for address in set {
            let id = state.get(address).map(|r| r.id.as_str()).unwrap_or_default();
            println!(
                "│ {:>3} {} {}",
                "-".red().bold(),
                address.to_string().bold(),
                ui::truncate_id(id, 50).dimmed()
            );
        }
    }
    println!("│");
    println!("├{RULE}");
    println!(
        "│ Plan: {} to destroy.",
        sets.iter().map(Vec::len).sum::<usize>().to_string().red()
    );
    println!("└{RULE}");
}

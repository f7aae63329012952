use anyhow::Result;
use colored::Colorize;
use provisionkit::PlanGraph;

use crate::Context;
use crate::config::{ProviderKind, Stack};
use crate::runner;
use crate::state::StateStore;
use crate::ui;

struct Issue {
    category: &'static str,
    summary: String,
    detail: Option<String>,
    fix: Option<String>,
    fix_cmd: Option<String>,
}

pub fn run(ctx: &Context) -> Result<()> {
    ui::header("Stack Health Check");

    let mut issues: Vec<Issue> = Vec::new();

    // Check 1: Stack file
    let stack = check_stack(ctx, &mut issues);

    // Check 2: State file
    if let Some(stack) = &stack {
        check_state(ctx, stack, &mut issues);
    }

    // Check 3: Azure CLI, only needed when the stack targets Azure
    let kind = ctx
        .provider
        .or_else(|| stack.as_ref().map(|s| s.settings().provider))
        .unwrap_or_default();
    if kind == ProviderKind::Azure {
        check_azure(&mut issues);
    }

    println!();
    if issues.is_empty() {
        ui::success("All checks passed!");
    } else {
        print_issue_summary(&issues);
    }

    Ok(())
}

fn print_issue_summary(issues: &[Issue]) {
    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));

    for (i, issue) in issues.iter().enumerate() {
        let num = i + 1;
        println!(
            "  {}  {} {}",
            format!("{num}.").bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if let Some(detail) = &issue.detail {
            for line in detail.lines() {
                println!("      {}", line.dimmed());
            }
        }
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
        if let Some(cmd) = &issue.fix_cmd {
            println!("      {} {}", "$".dimmed(), cmd.bold());
        }
        println!();
    }

    let fix_cmds: Vec<&str> = issues.iter().filter_map(|i| i.fix_cmd.as_deref()).collect();

    if !fix_cmds.is_empty() {
        ui::section("Quick Fixes");
        println!(
            "  {}",
            "Run these commands to resolve the issues above:".dimmed()
        );
        println!();
        for cmd in &fix_cmds {
            println!("    {}", cmd.bold());
        }
    }
}

fn check_stack(ctx: &Context, issues: &mut Vec<Issue>) -> Option<Stack> {
    ui::section("Stack File");

    if !ctx.file.exists() {
        println!("  {} {} {}", "✗".red(), ctx.file.display(), "(missing)".red());
        issues.push(Issue {
            category: "Stack File",
            summary: format!("{} does not exist", ctx.file.display()),
            detail: None,
            fix: Some("Create a starter stack".into()),
            fix_cmd: Some(format!("stackplan init --file {}", ctx.file.display())),
        });
        return None;
    }

    let stack = match Stack::load(&ctx.file) {
        Ok(stack) => stack,
        Err(e) => {
            println!("  {} {} {}", "✗".red(), ctx.file.display(), "(invalid)".red());
            issues.push(Issue {
                category: "Stack File",
                summary: "Stack file could not be loaded".into(),
                detail: Some(format!("{e:#}")),
                fix: Some("Fix the reported field and re-run".into()),
                fix_cmd: Some("stackplan validate".into()),
            });
            return None;
        }
    };

    let graph = stack
        .file
        .store()
        .and_then(|store| PlanGraph::build(&store).map_err(Into::into));
    match graph {
        Ok(graph) => println!(
            "  {} {} - {}",
            "✓".green(),
            ctx.file.display(),
            format!("{} resources", graph.len()).dimmed()
        ),
        Err(e) => {
            println!("  {} {} {}", "✗".red(), ctx.file.display(), "(bad graph)".red());
            issues.push(Issue {
                category: "Stack File",
                summary: "Resources do not form a valid dependency graph".into(),
                detail: Some(format!("{e:#}")),
                fix: Some("Fix the references named above".into()),
                fix_cmd: None,
            });
        }
    }
    Some(stack)
}

fn check_state(ctx: &Context, stack: &Stack, issues: &mut Vec<Issue>) {
    ui::section("State");

    let store = StateStore::new(stack.state_path(ctx.state.as_deref()));
    match store.load() {
        Ok(state) => {
            println!(
                "  {} {} - {}",
                "✓".green(),
                store.path().display(),
                format!("{} resources, serial {}", state.len(), state.serial).dimmed()
            );
            let failed: Vec<String> = state
                .resources
                .iter()
                .filter(|(_, r)| r.status == provisionkit::ProvisioningState::Failed)
                .map(|(a, _)| a.to_string())
                .collect();
            if !failed.is_empty() {
                issues.push(Issue {
                    category: "State",
                    summary: format!("{} resource(s) left failed by a previous run", failed.len()),
                    detail: Some(failed.join("\n")),
                    fix: Some("They will be replaced on the next apply".into()),
                    fix_cmd: Some("stackplan plan".into()),
                });
            }
        }
        Err(e) => {
            println!("  {} {} {}", "✗".red(), store.path().display(), "(unreadable)".red());
            let backup = store.backup_path();
            issues.push(Issue {
                category: "State",
                summary: "State file could not be read".into(),
                detail: Some(format!("{e:#}")),
                fix: backup
                    .exists()
                    .then(|| "Restore the previous version".to_string()),
                fix_cmd: backup.exists().then(|| {
                    format!("cp {} {}", backup.display(), store.path().display())
                }),
            });
        }
    }
}

fn check_azure(issues: &mut Vec<Issue>) {
    ui::section("Azure CLI");

    if !runner::command_exists("az") {
        println!("  {} az - {} {}", "✗".red(), "Azure CLI", "(missing)".red());
        issues.push(Issue {
            category: "Azure CLI",
            summary: "az is not installed".into(),
            detail: Some("Required by the azure provider".into()),
            fix: Some("Install the Azure CLI".into()),
            fix_cmd: Some("curl -sL https://aka.ms/InstallAzureCLIDeb | sudo bash".into()),
        });
        return;
    }
    println!("  {} az - {}", "✓".green(), "Azure CLI".dimmed());

    match runner::run_capture("az", &["account", "show", "--query", "name", "-o", "tsv"]) {
        Ok(account) => println!("  {} logged in - {}", "✓".green(), account.dimmed()),
        Err(e) => {
            println!("  {} not logged in", "✗".red());
            issues.push(Issue {
                category: "Azure CLI",
                summary: "No active Azure login".into(),
                detail: Some(format!("{e:#}")),
                fix: Some("Log in and select a subscription".into()),
                fix_cmd: Some("az login".into()),
            });
        }
    }
}

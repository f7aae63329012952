use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::ProviderKind;

#[derive(Parser)]
#[command(name = "stackplan")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan, apply and destroy declarative infrastructure stacks", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file describing the resources
    #[arg(
        short,
        long,
        global = true,
        env = "STACKPLAN_FILE",
        default_value = "stack.toml"
    )]
    pub file: PathBuf,

    /// State file (defaults to the stack's `state_path` setting)
    #[arg(long, global = true, env = "STACKPLAN_STATE")]
    pub state: Option<PathBuf>,

    /// Override the provider from the stack settings
    #[arg(long, global = true, env = "STACKPLAN_PROVIDER", value_enum)]
    pub provider: Option<ProviderKind>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an example stack file
    Init {
        /// Overwrite an existing stack file
        #[arg(long)]
        force: bool,
    },

    /// Parse the stack and check its dependency graph
    Validate,

    /// Show what apply would change, without side effects
    Plan(PlanArgs),

    /// Create, update and replace resources to match the stack
    Apply(ApplyArgs),

    /// Delete resources recorded in state, dependents first
    Destroy(DestroyArgs),

    /// Show recorded state
    Show {
        /// Show a single resource, e.g. azurerm_subnet.ase
        address: Option<String>,
    },

    /// Print the dependency graph
    Graph {
        /// Print ready sets instead of Graphviz DOT
        #[arg(long)]
        sets: bool,
    },

    /// Check prerequisites (az CLI, login, stack file, state)
    Doctor,

    /// Package and deploy Logic App workflow definitions
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Exit with status 2 when changes are pending
    #[arg(long)]
    pub detailed_exitcode: bool,

    /// Only plan these resources and their dependencies
    #[arg(short, long)]
    pub target: Vec<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Number of parallel workers per ready set
    #[arg(short, long, env = "STACKPLAN_JOBS")]
    pub jobs: Option<usize>,

    /// Only apply these resources and their dependencies
    #[arg(short, long)]
    pub target: Vec<String>,

    /// Stop dispatching new resources after the first failure
    #[arg(long)]
    pub halt_on_failure: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show what would be deleted without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Number of parallel workers per teardown set
    #[arg(short, long, env = "STACKPLAN_JOBS")]
    pub jobs: Option<usize>,

    /// Only delete these resources
    #[arg(short, long)]
    pub target: Vec<String>,
}

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Zip a workflow directory for deployment
    Package {
        /// Directory containing host.json and workflow folders
        #[arg(short, long, default_value = "workflows")]
        dir: PathBuf,

        /// Output archive
        #[arg(short, long, default_value = "workflow.zip")]
        output: PathBuf,
    },

    /// Package and upload workflows to a Logic App (Standard)
    Deploy {
        /// Directory containing host.json and workflow folders
        #[arg(short, long, default_value = "workflows")]
        dir: PathBuf,

        /// Logic App name, or the address of a logic app in state
        #[arg(short, long)]
        app: String,

        /// Resource group (defaults to the stack's azure settings)
        #[arg(short, long)]
        resource_group: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
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
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "stackplan",
            "-vv",
            "apply",
            "--yes",
            "--jobs",
            "8",
            "-t",
            "azurerm_subnet.ase",
            "--halt-on-failure",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.yes);
        assert_eq!(args.jobs, Some(8));
        assert_eq!(args.target, vec!["azurerm_subnet.ase".to_string()]);
        assert!(args.halt_on_failure);
    }

    #[test]
    fn test_global_file_after_subcommand() {
        let cli = Cli::try_parse_from(["stackplan", "plan", "--file", "infra/ase.toml"]).unwrap();
        assert_eq!(cli.file, PathBuf::from("infra/ase.toml"));
        assert!(matches!(cli.command, Command::Plan(_)));
    }

    #[test]
    fn test_provider_override() {
        let cli = Cli::try_parse_from(["stackplan", "--provider", "local", "validate"]).unwrap();
        assert_eq!(cli.provider, Some(ProviderKind::Local));
    }
}

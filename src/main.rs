mod cli;
mod commands;
mod config;
mod engine;
mod progress;
mod providers;
mod runner;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

use config::ProviderKind;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub file: PathBuf,
    pub state: Option<PathBuf>,
    pub provider: Option<ProviderKind>,
}

#[cfg(test)]
impl Context {
    pub fn for_file(file: PathBuf) -> Self {
        Self {
            verbose: 0,
            quiet: true,
            file,
            state: None,
            provider: None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
        state: cli.state,
        provider: cli.provider,
    };

    match cli.command {
        Command::Init { force } => commands::init::run(&ctx, force),
        Command::Validate => commands::validate::run(&ctx),
        Command::Plan(args) => {
            let pending = commands::plan::run(&ctx, &args)?;
            if pending && args.detailed_exitcode {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Apply(args) => commands::apply::run(&ctx, &args),
        Command::Destroy(args) => commands::destroy::run(&ctx, &args),
        Command::Show { address } => commands::show::run(&ctx, address.as_deref()),
        Command::Graph { sets } => commands::graph::run(&ctx, sets),
        Command::Doctor => commands::doctor::run(&ctx),
        Command::Workflow(cmd) => commands::workflow::run(&ctx, cmd),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "stackplan", &mut io::stdout());
            Ok(())
        }
    }
}

//! Logic App (Standard) workflow packaging and zip deployment

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use provisionkit::ResourceAddress;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::Context;
use crate::cli::WorkflowCommand;
use crate::config::Stack;
use crate::runner;
use crate::state::StateStore;
use crate::ui;

/// Never shipped: local secrets and editor/VCS metadata
const EXCLUDED: &[&str] = &["local.settings.json", ".git", ".vscode", ".funcignore"];

pub fn run(ctx: &Context, cmd: WorkflowCommand) -> Result<()> {
    match cmd {
        WorkflowCommand::Package { dir, output } => {
            let count = package(&dir, &output)?;
            ui::success(&format!("Packaged {count} files into {}", output.display()));
            Ok(())
        }
        WorkflowCommand::Deploy {
            dir,
            app,
            resource_group,
            yes,
        } => deploy(ctx, &dir, &app, resource_group.as_deref(), yes),
    }
}

fn excluded(path: &Path) -> bool {
    path.components()
        .any(|c| EXCLUDED.contains(&c.as_os_str().to_string_lossy().as_ref()))
}

/// Zip `dir` into `output`; returns the number of files written
pub fn package(dir: &Path, output: &Path) -> Result<usize> {
    if !dir.join("host.json").exists() {
        bail!(
            "{} has no host.json; expected a Logic App (Standard) project",
            dir.display()
        );
    }

    let file = File::create(output)
        .with_context(|| format!("Failed to create archive: {}", output.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    let output_abs = fs::canonicalize(output).ok();

    let mut count = 0;
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        if relative.as_os_str().is_empty() || excluded(relative) {
            continue;
        }
        if output_abs.is_some() && fs::canonicalize(path).ok() == output_abs {
            continue;
        }

        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name.as_str(), options)?;
            let mut src = File::open(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            io::copy(&mut src, &mut zip)?;
            count += 1;
            log::debug!("added {name}");
        }
    }
    zip.finish().context("Failed to finish archive")?;
    Ok(count)
}

/// Azure name of the app: a state address resolves through its recorded config
fn resolve_app(ctx: &Context, stack: Option<&Stack>, app: &str) -> Result<String> {
    let Ok(address) = ResourceAddress::parse(app) else {
        return Ok(app.to_string());
    };
    let Some(stack) = stack else {
        bail!("{app} looks like an address but no stack file was found");
    };
    let state = StateStore::new(stack.state_path(ctx.state.as_deref())).load()?;
    let record = state
        .get(&address)
        .with_context(|| format!("{address} is not in state"))?;
    Ok(record
        .config
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(address.name())
        .to_string())
}

fn deploy(
    ctx: &Context,
    dir: &Path,
    app: &str,
    resource_group: Option<&str>,
    yes: bool,
) -> Result<()> {
    let stack = Stack::load(&ctx.file).ok();
    let app = resolve_app(ctx, stack.as_ref(), app)?;
    let group = resource_group
        .map(str::to_string)
        .or_else(|| stack.as_ref().and_then(|s| s.settings().azure.resource_group.clone()))
        .context("No resource group: pass --resource-group or set settings.azure.resource_group")?;

    if !runner::command_exists("az") {
        bail!("az is not installed (see `stackplan doctor`)");
    }

    let archive: PathBuf =
        std::env::temp_dir().join(format!("stackplan-workflow-{}.zip", std::process::id()));
    let count = package(dir, &archive)?;

    ui::header("Workflow Deployment");
    ui::kv("app", &app);
    ui::kv("resource group", &group);
    ui::kv("files", &count.to_string());

    if !yes && !confirm_deploy()? {
        println!();
        println!("  {} Aborted", "✗".red());
        let _ = fs::remove_file(&archive);
        return Ok(());
    }

    let src = archive.to_string_lossy().into_owned();
    let status = runner::run(
        "az",
        &[
            "logicapp",
            "deployment",
            "source",
            "config-zip",
            "--name",
            &app,
            "--resource-group",
            &group,
            "--src",
            &src,
        ],
    );
    let _ = fs::remove_file(&archive);

    if !status?.success() {
        bail!("az logicapp deployment failed for {app}");
    }
    ui::success(&format!("Deployed {count} files to {app}"));
    Ok(())
}

fn confirm_deploy() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

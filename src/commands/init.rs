use anyhow::{Context as _, Result, bail};
use std::fs;

use crate::Context;
use crate::ui;

/// Starter stack for a Logic App on an App Service Environment
pub const TEMPLATE: &str = include_str!("../../templates/logic-app-ase.toml");

pub fn run(ctx: &Context, force: bool) -> Result<()> {
    let path = &ctx.file;
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    fs::write(path, TEMPLATE)
        .with_context(|| format!("Failed to write stack file: {}", path.display()))?;

    ui::success(&format!("Created {}", path.display()));
    if !ctx.quiet {
        ui::dim("Edit the [settings] table, then run `stackplan plan`");
    }
    Ok(())
}

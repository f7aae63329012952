use anyhow::{Result, bail};

use crate::Context;
use crate::cli::DestroyArgs;
use crate::engine::executor;
use crate::engine::{RunOptions, Workspace, parse_targets};

pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let targets = parse_targets(&args.target)?;
    let mut ws = Workspace::open(ctx)?;

    let opts = RunOptions {
        dry_run: args.dry_run,
        yes: args.yes,
        jobs: args.jobs,
        halt_on_failure: false,
    };
    let summary = executor::destroy(ctx, &mut ws, &targets, &opts)?;
    if !summary.is_success() {
        bail!("{} resource(s) failed to delete", summary.failed);
    }
    Ok(())
}

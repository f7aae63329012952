use anyhow::{Result, bail};

use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::executor;
use crate::engine::{RunOptions, Workspace, parse_targets};

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let targets = parse_targets(&args.target)?;
    let mut ws = Workspace::open(ctx)?;
    let plan = ws.plan(&targets)?;

    let opts = RunOptions {
        dry_run: args.dry_run,
        yes: args.yes,
        jobs: args.jobs,
        halt_on_failure: args.halt_on_failure,
    };
    let summary = executor::apply(ctx, &mut ws, &plan, &opts)?;
    if !summary.is_success() {
        bail!("{} resource(s) failed to apply", summary.failed);
    }
    Ok(())
}

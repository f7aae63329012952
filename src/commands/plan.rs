use anyhow::Result;

use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::differ::display_plan;
use crate::engine::{Workspace, parse_targets};

/// Show pending changes; returns whether anything would change
pub fn run(ctx: &Context, args: &PlanArgs) -> Result<bool> {
    let targets = parse_targets(&args.target)?;
    let ws = Workspace::open(ctx)?;
    let plan = ws.plan(&targets)?;
    Ok(display_plan(&ws, &plan, ctx.verbose > 0))
}

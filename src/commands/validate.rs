use anyhow::{Context as _, Result};
use provisionkit::{PlanGraph, ready_sets};

use crate::Context;
use crate::config::{ProviderKind, Stack};
use crate::providers;
use crate::state::StateStore;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let stack = Stack::load(&ctx.file)?;
    let store = stack.file.store()?;
    let graph = PlanGraph::build(&store).context("Invalid dependency graph")?;
    let sets = ready_sets(&graph);

    let state_store = StateStore::new(stack.state_path(ctx.state.as_deref()));
    let state = state_store.load()?;

    let kind = ctx.provider.unwrap_or(stack.settings().provider);
    let unsupported: Vec<String> = store
        .addresses()
        .filter(|a| kind == ProviderKind::Azure && !providers::azure::supports(a.resource_type()))
        .map(ToString::to_string)
        .collect();

    if !ctx.quiet {
        ui::header("Stack");
        ui::kv("file", &ctx.file.display().to_string());
        ui::kv("resources", &graph.len().to_string());
        ui::kv("dependencies", &graph.edge_count().to_string());
        ui::kv("ready sets", &sets.len().to_string());
        ui::kv(
            "state",
            &format!("{} ({} recorded)", state_store.path().display(), state.len()),
        );
    }

    for address in &unsupported {
        ui::warn(&format!("{address}: type not supported by the azure provider"));
    }
    ui::success("Stack is valid");
    Ok(())
}

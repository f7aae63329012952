use anyhow::{Context as _, Result};
use provisionkit::{PlanGraph, ready_sets};
use std::fmt::Write as _;

use crate::Context;
use crate::config::Stack;

/// Graphviz DOT: one node per resource, edges point at dependencies
pub fn to_dot(graph: &PlanGraph) -> String {
    let mut out = String::from("digraph stack {\n  rankdir = \"BT\";\n  node [shape = box];\n");
    for node in graph.nodes() {
        let _ = writeln!(out, "  \"{node}\";");
    }
    for edge in graph.edges() {
        let _ = writeln!(out, "  \"{}\" -> \"{}\";", edge.dependent, edge.dependency);
    }
    out.push_str("}\n");
    out
}

pub fn run(ctx: &Context, sets: bool) -> Result<()> {
    let stack = Stack::load(&ctx.file)?;
    let store = stack.file.store()?;
    let graph = PlanGraph::build(&store).context("Invalid dependency graph")?;

    if sets {
        for (i, set) in ready_sets(&graph).iter().enumerate() {
            let names: Vec<String> = set.iter().map(ToString::to_string).collect();
            println!("{}: {}", i + 1, names.join(" "));
        }
    } else {
        print!("{}", to_dot(&graph));
    }
    Ok(())
}

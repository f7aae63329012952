//! Loading a stack and building its plan

use anyhow::{Context as _, Result};
use provisionkit::{
    DescriptorStore, PlanGraph, Provider, Reconciliation, ResourceAddress, StateSnapshot,
    reconcile,
};
use std::collections::BTreeSet;

use crate::Context;
use crate::config::Stack;
use crate::providers;
use crate::state::StateStore;

/// Everything one command needs: declarations, state and a provider
pub struct Workspace {
    pub stack: Stack,
    pub store: DescriptorStore,
    pub state_store: StateStore,
    pub state: StateSnapshot,
    pub provider: Box<dyn Provider>,
}

/// Graph plus per-resource actions
pub struct Plan {
    pub graph: PlanGraph,
    pub reconciliation: Reconciliation,
}

impl Workspace {
    pub fn open(ctx: &Context) -> Result<Self> {
        let stack = Stack::load(&ctx.file)?;
        let store = stack.file.store()?;
        let state_path = stack.state_path(ctx.state.as_deref());
        let state_store = StateStore::new(state_path);
        let state = state_store.load()?;

        let kind = ctx.provider.unwrap_or(stack.settings().provider);
        let provider = providers::build(kind, stack.settings(), state_store.path())?;

        Ok(Self {
            stack,
            store,
            state_store,
            state,
            provider,
        })
    }

    /// Build the dependency graph and reconcile it against state
    pub fn plan(&self, targets: &BTreeSet<ResourceAddress>) -> Result<Plan> {
        let graph = PlanGraph::build(&self.store).context("Invalid dependency graph")?;
        let mut reconciliation = reconcile(&self.store, &graph, &self.state, self.provider.as_ref());
        if !targets.is_empty() {
            if let Some(unknown) = targets
                .iter()
                .find(|t| !graph.contains(t) && !self.state.contains(t))
            {
                anyhow::bail!("Target {unknown} is neither declared nor in state");
            }
            reconciliation = reconciliation.restrict_to(&graph, targets);
        }
        Ok(Plan {
            graph,
            reconciliation,
        })
    }

    pub fn save_state(&mut self) -> Result<()> {
        self.state_store.save(&mut self.state)
    }
}

/// Parse `--target` values into addresses
pub fn parse_targets(targets: &[String]) -> Result<BTreeSet<ResourceAddress>> {
    targets
        .iter()
        .map(|t| ResourceAddress::parse(t).with_context(|| format!("Invalid target '{t}'")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        let targets = parse_targets(&["azurerm_subnet.ase".into(), "azurerm_subnet.ase".into()])
            .unwrap();
        assert_eq!(targets.len(), 1);
        assert!(parse_targets(&["no-dot".into()]).is_err());
    }
}

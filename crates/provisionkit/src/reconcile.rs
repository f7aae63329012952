//! State reconciler - decides what each resource needs
//!
//! Compares declared configuration against the last-applied configuration
//! recorded in state.

use crate::descriptor::{Config, DescriptorStore};
use crate::graph::PlanGraph;
use crate::provider::Provider;
use crate::state::StateSnapshot;
use crate::types::{ProvisioningState, ResourceAddress};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a resource must be deleted and recreated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReplaceReason {
    /// Immutable properties changed
    ImmutableChanged(Vec<String>),
    /// Last apply left the resource failed
    Tainted,
    /// A dependency is being replaced
    DependencyReplaced(ResourceAddress),
}

impl fmt::Display for ReplaceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImmutableChanged(keys) => write!(f, "forces replacement: {}", keys.join(", ")),
            Self::Tainted => f.write_str("previous apply failed"),
            Self::DependencyReplaced(dep) => write!(f, "{dep} is being replaced"),
        }
    }
}

/// Action decided for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Action {
    NoOp,
    Create,
    Update { changed: Vec<String> },
    Replace { reason: ReplaceReason },
    /// In state but no longer declared
    Delete,
}

impl Action {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::NoOp => " ",
            Self::Create => "+",
            Self::Update { .. } => "~",
            Self::Replace { .. } => "-/+",
            Self::Delete => "-",
        }
    }
}

/// Counts by action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_op: usize,
}

impl ChangeSummary {
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}

/// Actions for every declared and every recorded resource
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    actions: BTreeMap<ResourceAddress, Action>,
}

impl Reconciliation {
    pub fn action(&self, address: &ResourceAddress) -> Option<&Action> {
        self.actions.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceAddress, &Action)> {
        self.actions.iter()
    }

    fn matching(&self, pick: impl Fn(&Action) -> bool) -> BTreeSet<ResourceAddress> {
        self.actions
            .iter()
            .filter(|(_, a)| pick(a))
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Declared resources whose remote object is deleted and recreated
    pub fn replaced(&self) -> BTreeSet<ResourceAddress> {
        self.matching(|a| matches!(a, Action::Replace { .. }))
    }

    /// Recorded resources that are no longer declared
    pub fn removed(&self) -> BTreeSet<ResourceAddress> {
        self.matching(|a| *a == Action::Delete)
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for action in self.actions.values() {
            match action {
                Action::NoOp => summary.no_op += 1,
                Action::Create => summary.create += 1,
                Action::Update { .. } => summary.update += 1,
                Action::Replace { .. } => summary.replace += 1,
                Action::Delete => summary.delete += 1,
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.summary().has_changes()
    }

    /// Keep only the targets, their dependencies and orphan deletions named
    /// explicitly; everything else becomes NoOp
    pub fn restrict_to(mut self, graph: &PlanGraph, targets: &BTreeSet<ResourceAddress>) -> Self {
        let mut keep: BTreeSet<ResourceAddress> = BTreeSet::new();
        let mut stack: Vec<ResourceAddress> = targets.iter().cloned().collect();
        while let Some(addr) = stack.pop() {
            if keep.insert(addr.clone()) {
                stack.extend(graph.dependencies_of(&addr).into_iter().cloned());
            }
        }

        self.actions.retain(|addr, action| {
            graph.contains(addr) || (keep.contains(addr) && matches!(action, Action::Delete))
        });
        for (addr, action) in &mut self.actions {
            if !keep.contains(addr) {
                *action = Action::NoOp;
            }
        }
        self
    }
}

/// Diff declared descriptors against recorded state
pub fn reconcile(
    store: &DescriptorStore,
    graph: &PlanGraph,
    state: &StateSnapshot,
    provider: &dyn Provider,
) -> Reconciliation {
    let mut actions = BTreeMap::new();

    for (address, descriptor) in store.iter() {
        let action = match state.get(address) {
            None => Action::Create,
            Some(record) if record.status == ProvisioningState::Failed => Action::Replace {
                reason: ReplaceReason::Tainted,
            },
            Some(record) => {
                let changed = changed_keys(&record.config, &descriptor.config);
                let recorded: BTreeSet<&ResourceAddress> = record.depends_on.iter().collect();
                let references = descriptor.references();
                let declared: BTreeSet<&ResourceAddress> = references.iter().collect();
                if changed.is_empty() && recorded == declared {
                    Action::NoOp
                } else if changed.is_empty() {
                    Action::Update {
                        changed: vec!["depends_on".to_string()],
                    }
                } else {
                    let mut immutable = provider.immutable_properties(&descriptor.resource_type);
                    immutable.extend(descriptor.replace_on.iter().cloned());
                    let forcing: Vec<String> = changed
                        .iter()
                        .filter(|k| immutable.contains(k))
                        .cloned()
                        .collect();
                    if forcing.is_empty() {
                        Action::Update { changed }
                    } else {
                        Action::Replace {
                            reason: ReplaceReason::ImmutableChanged(forcing),
                        }
                    }
                }
            }
        };
        actions.insert(address.clone(), action);
    }

    for address in state.resources.keys() {
        if !store.contains(address) {
            actions.insert(address.clone(), Action::Delete);
        }
    }

    propagate_replacements(graph, &mut actions);

    let reconciliation = Reconciliation { actions };
    let summary = reconciliation.summary();
    log::info!(
        "Reconciled {} resources: {} to create, {} to update, {} to replace, {} to delete",
        store.len(),
        summary.create,
        summary.update,
        summary.replace,
        summary.delete
    );
    reconciliation
}

/// A replaced resource gets a new identity, so everything built on top of
/// it is replaced too.
fn propagate_replacements(graph: &PlanGraph, actions: &mut BTreeMap<ResourceAddress, Action>) {
    let roots: Vec<ResourceAddress> = actions
        .iter()
        .filter(|(_, a)| matches!(a, Action::Replace { .. }))
        .map(|(addr, _)| addr.clone())
        .collect();

    for root in roots {
        for dependent in graph.transitive_dependents(&root) {
            if let Some(action) = actions.get_mut(&dependent)
                && matches!(action, Action::NoOp | Action::Update { .. })
            {
                *action = Action::Replace {
                    reason: ReplaceReason::DependencyReplaced(root.clone()),
                };
            }
        }
    }
}

/// Keys whose values differ between two configurations
pub fn changed_keys(old: &Config, new: &Config) -> Vec<String> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect()
}

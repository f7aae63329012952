//! Dependency graph builder
//!
//! Resolves descriptor references into a DAG. An edge `(a, b)` means
//! `a` depends on `b`, so `b` must be Ready before `a` starts.

use crate::descriptor::DescriptorStore;
use crate::error::{Error, Result};
use crate::types::ResourceAddress;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Ordered pair of dependent and dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub dependent: ResourceAddress,
    pub dependency: ResourceAddress,
}

/// The resolved DAG for one planning pass
#[derive(Debug, Clone, Default)]
pub struct PlanGraph {
    nodes: Vec<ResourceAddress>,
    index: HashMap<ResourceAddress, usize>,
    /// `deps[i]`: nodes that `i` depends on
    deps: Vec<Vec<usize>>,
    /// `dependents[i]`: nodes that depend on `i`
    dependents: Vec<Vec<usize>>,
}

impl PlanGraph {
    /// Build the graph for every descriptor in the store
    pub fn build(store: &DescriptorStore) -> Result<Self> {
        let nodes = store.addresses().cloned();
        let edges = store.iter().flat_map(|(address, descriptor)| {
            descriptor
                .references()
                .into_iter()
                .map(move |dependency| (address.clone(), dependency))
        });
        let graph = Self::from_edges(nodes, edges)?;
        log::debug!(
            "Built plan graph: {} resources, {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Build a graph from explicit nodes and `(dependent, dependency)` pairs
    ///
    /// Fails on edges to unknown nodes and on cycles. Duplicate edges
    /// collapse into one.
    pub fn from_edges(
        nodes: impl IntoIterator<Item = ResourceAddress>,
        edges: impl IntoIterator<Item = (ResourceAddress, ResourceAddress)>,
    ) -> Result<Self> {
        let mut nodes: Vec<ResourceAddress> = nodes.into_iter().collect();
        nodes.sort();
        nodes.dedup();

        let index: HashMap<ResourceAddress, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.clone(), i))
            .collect();

        let n = nodes.len();
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (from, to) in edges {
            let (Some(&u), Some(&v)) = (index.get(&from), index.get(&to)) else {
                return Err(Error::UnresolvedReference { from, to });
            };
            if u == v {
                return Err(Error::CyclicDependency {
                    cycle: vec![from.clone(), from],
                });
            }
            deps[u].push(v);
            dependents[v].push(u);
        }

        for list in deps.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let graph = Self {
            nodes,
            index,
            deps,
            dependents,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::CyclicDependency { cycle });
        }

        Ok(graph)
    }

    /// Three-color DFS along dependency edges; returns the first back-edge cycle
    fn find_cycle(&self) -> Option<Vec<ResourceAddress>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            Unvisited,
            InProgress,
            Done,
        }

        fn dfs(
            u: usize,
            deps: &[Vec<usize>],
            color: &mut [Color],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            color[u] = Color::InProgress;
            stack.push(u);

            for &v in &deps[u] {
                match color[v] {
                    Color::Unvisited => {
                        if let Some(cycle) = dfs(v, deps, color, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::InProgress => {
                        let start = stack.iter().position(|&node| node == v)?;
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(v);
                        return Some(cycle);
                    }
                    Color::Done => {}
                }
            }

            stack.pop();
            color[u] = Color::Done;
            None
        }

        let mut color = vec![Color::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();

        for u in 0..self.nodes.len() {
            if color[u] != Color::Unvisited {
                continue;
            }
            if let Some(cycle) = dfs(u, &self.deps, &mut color, &mut stack) {
                return Some(cycle.into_iter().map(|i| self.nodes[i].clone()).collect());
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.index.contains_key(address)
    }

    /// All nodes in address order
    pub fn nodes(&self) -> &[ResourceAddress] {
        &self.nodes
    }

    pub fn edge_count(&self) -> usize {
        self.deps.iter().map(Vec::len).sum()
    }

    /// Every edge, sorted
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.deps
            .iter()
            .enumerate()
            .flat_map(|(u, vs)| {
                vs.iter().map(move |&v| DependencyEdge {
                    dependent: self.nodes[u].clone(),
                    dependency: self.nodes[v].clone(),
                })
            })
            .collect()
    }

    /// Direct dependencies of a node
    pub fn dependencies_of(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.index
            .get(address)
            .map(|&i| self.deps[i].iter().map(|&j| &self.nodes[j]).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of a node
    pub fn dependents_of(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.index
            .get(address)
            .map(|&i| self.dependents[i].iter().map(|&j| &self.nodes[j]).collect())
            .unwrap_or_default()
    }

    /// Every node that depends on `address`, directly or not
    pub fn transitive_dependents(&self, address: &ResourceAddress) -> BTreeSet<ResourceAddress> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.index.get(address) else {
            return seen;
        };

        let mut queue = VecDeque::from([start]);
        while let Some(u) = queue.pop_front() {
            for &v in &self.dependents[u] {
                if seen.insert(self.nodes[v].clone()) {
                    queue.push_back(v);
                }
            }
        }
        seen
    }

    pub(crate) fn index_of(&self, address: &ResourceAddress) -> Option<usize> {
        self.index.get(address).copied()
    }

    pub(crate) fn node(&self, i: usize) -> &ResourceAddress {
        &self.nodes[i]
    }

    pub(crate) fn deps_idx(&self, i: usize) -> &[usize] {
        &self.deps[i]
    }

    pub(crate) fn dependents_idx(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ResourceDescriptor;

    fn addr(s: &str) -> ResourceAddress {
        ResourceAddress::parse(s).unwrap()
    }

    fn store(descriptors: Vec<ResourceDescriptor>) -> DescriptorStore {
        DescriptorStore::from_descriptors(descriptors).unwrap()
    }

    #[test]
    fn test_build_one_edge_per_reference() {
        let s = store(vec![
            ResourceDescriptor::new("t", "a"),
            ResourceDescriptor::new("t", "b")
                .with("x", "${t.a.id}")
                .with("y", "${t.a.name}")
                .depends_on(addr("t.a")),
            ResourceDescriptor::new("t", "c").with("x", "${t.b}"),
        ]);
        let graph = PlanGraph::build(&s).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.edges(),
            vec![
                DependencyEdge {
                    dependent: addr("t.b"),
                    dependency: addr("t.a"),
                },
                DependencyEdge {
                    dependent: addr("t.c"),
                    dependency: addr("t.b"),
                },
            ]
        );
        assert_eq!(graph.dependents_of(&addr("t.a")), vec![&addr("t.b")]);
        assert_eq!(
            graph.transitive_dependents(&addr("t.a")),
            BTreeSet::from([addr("t.b"), addr("t.c")])
        );
    }

    #[test]
    fn test_unresolved_reference() {
        let s = store(vec![ResourceDescriptor::new("t", "a").with("x", "${t.ghost.id}")]);
        let err = PlanGraph::build(&s).unwrap_err();
        match err {
            Error::UnresolvedReference { from, to } => {
                assert_eq!(from, addr("t.a"));
                assert_eq!(to, addr("t.ghost"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_names_participants() {
        let s = store(vec![
            ResourceDescriptor::new("t", "a").with("x", "${t.c}"),
            ResourceDescriptor::new("t", "b").with("x", "${t.a}"),
            ResourceDescriptor::new("t", "c").with("x", "${t.b}"),
            ResourceDescriptor::new("t", "d"),
        ]);
        let err = PlanGraph::build(&s).unwrap_err();
        let Error::CyclicDependency { cycle } = err else {
            panic!("expected cycle");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(!cycle.contains(&addr("t.d")));
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let s = store(vec![ResourceDescriptor::new("t", "a").with("x", "${t.a.name}")]);
        let err = PlanGraph::build(&s).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { ref cycle } if cycle.len() == 2));
    }

    #[test]
    fn test_empty_graph() {
        let graph = PlanGraph::build(&DescriptorStore::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.edges().is_empty());
    }
}

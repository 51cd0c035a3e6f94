//! Dependency graph over resources.
//!
//! An edge `A -> B` means A must be applied after B, either because one of
//! A's properties references an output of B or because A declares an explicit
//! dependency on B.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::construct::Resource;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// node -> nodes it depends on
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// node -> nodes depending on it
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph for a composition's flattened resources.
    ///
    /// Fails with [`CoreError::UnknownReference`] when a reference or an
    /// explicit dependency points at a path that is not part of `resources`.
    pub fn build(resources: &[Resource]) -> CoreResult<Self> {
        let known: BTreeSet<&str> = resources.iter().map(|r| r.logical_path.as_str()).collect();

        for resource in resources {
            for reference in resource.properties.references() {
                if !known.contains(reference.target.as_str()) {
                    return Err(CoreError::UnknownReference {
                        from: resource.logical_path.clone(),
                        target: reference.target.clone(),
                        attribute: reference.attribute.clone(),
                    });
                }
            }
            for target in &resource.depends_on {
                if !known.contains(target.as_str()) {
                    return Err(CoreError::UnknownReference {
                        from: resource.logical_path.clone(),
                        target: target.clone(),
                        attribute: String::new(),
                    });
                }
            }
        }

        let graph = Self::from_edges(
            resources
                .iter()
                .map(|r| (r.logical_path.clone(), r.dependencies())),
        );
        debug!(
            "Built dependency graph: {} nodes, {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Build a graph from raw `(node, dependencies)` pairs.
    ///
    /// Dependencies on nodes outside the given set are dropped.
    pub fn from_edges(edges: impl IntoIterator<Item = (String, BTreeSet<String>)>) -> Self {
        let edges: Vec<(String, BTreeSet<String>)> = edges.into_iter().collect();
        let nodes: BTreeSet<String> = edges.iter().map(|(n, _)| n.clone()).collect();

        let mut graph = Self::default();
        for node in &nodes {
            graph.dependencies.insert(node.clone(), BTreeSet::new());
            graph.dependents.insert(node.clone(), BTreeSet::new());
        }
        for (node, deps) in edges {
            for dep in deps.into_iter().filter(|d| nodes.contains(d)) {
                if let Some(set) = graph.dependents.get_mut(&dep) {
                    set.insert(node.clone());
                }
                if let Some(set) = graph.dependencies.get_mut(&node) {
                    set.insert(dep);
                }
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.dependencies.contains_key(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    pub fn dependencies_of(&self, node: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(node)
    }

    pub fn dependents_of(&self, node: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(node)
    }

    /// Every node that depends on `node`, directly or transitively.
    pub fn transitive_dependents(&self, node: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![node.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(dependents) = self.dependents.get(&current) {
                for d in dependents {
                    if seen.insert(d.clone()) {
                        stack.push(d.clone());
                    }
                }
            }
        }
        seen
    }

    /// Kahn's algorithm. Among nodes that are ready at the same time, the
    /// lexicographically smallest path goes first.
    pub fn topological_order(&self) -> CoreResult<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(n, deps)| (n.as_str(), deps.len()))
            .collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(node) = ready.pop_first() {
            remaining.remove(node);
            order.push(node.to_string());
            for dependent in &self.dependents[node] {
                if let Some(count) = remaining.get_mut(dependent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if remaining.is_empty() {
            Ok(order)
        } else {
            let stuck: BTreeSet<&str> = remaining.keys().copied().collect();
            Err(CoreError::CyclicDependency {
                cycle: self.find_cycle(&stuck),
            })
        }
    }

    /// Reverse topological order: dependents before their dependencies.
    pub fn reverse_topological_order(&self) -> CoreResult<Vec<String>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Walk dependency edges inside the stuck set until a node repeats.
    ///
    /// Every stuck node still has an unprocessed dependency inside the set,
    /// so the walk cannot dead-end.
    fn find_cycle(&self, stuck: &BTreeSet<&str>) -> Vec<String> {
        let Some(start) = stuck.first() else {
            return Vec::new();
        };
        let mut path: Vec<&str> = Vec::new();
        let mut current = *start;
        loop {
            if let Some(pos) = path.iter().position(|n| *n == current) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(current.to_string());
                return cycle;
            }
            path.push(current);
            let next = self.dependencies[current]
                .iter()
                .map(String::as_str)
                .find(|d| stuck.contains(d));
            match next {
                Some(n) => current = n,
                None => return path.iter().map(|s| s.to_string()).collect(),
            }
        }
    }
}

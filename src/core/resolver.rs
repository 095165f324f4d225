//! Dependency resolution.
//!
//! The graph is an arena: a vector of nodes plus a name-to-index map, with
//! edges stored as index pairs. Installation order comes from Kahn's
//! topological sort over first-seen node order, which makes tie-breaking
//! deterministic for a given catalog. The returned order always ends with the
//! requested package.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::core::catalog::Catalog;
use crate::core::definition::DefinitionError;
use crate::store::db::Database;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("circular dependency involving package '{0}'")]
    Cycle(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

struct Node {
    name: String,
    /// Indices of the packages this node depends on.
    deps: Vec<usize>,
}

#[derive(Default)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the closure of `root` by loading catalog entries breadth-first.
    pub fn from_catalog(catalog: &Catalog, root: &str) -> Result<Self, ResolveError> {
        let mut graph = Self::new();
        let mut loaded = std::collections::HashSet::new();
        let mut queue = VecDeque::from([root.to_string()]);

        while let Some(name) = queue.pop_front() {
            if !loaded.insert(name.clone()) {
                continue;
            }
            let def = catalog.load(&name)?;
            for dep in &def.dependencies {
                if !loaded.contains(dep) {
                    queue.push_back(dep.clone());
                }
            }
            graph.insert(&name, &def.dependencies);
        }
        Ok(graph)
    }

    /// Add a node with its dependency names. Unknown names become nodes with
    /// no dependencies of their own until inserted again with a list.
    pub fn insert(&mut self, name: &str, deps: &[String]) {
        let dep_indices: Vec<usize> = deps.iter().map(|d| self.intern(d)).collect();
        let idx = self.intern(name);
        self.nodes[idx].deps = dep_indices;
    }

    fn intern(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            deps: Vec::new(),
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm, emitting dependencies before dependents.
    pub fn topo_order(&self) -> Result<Vec<String>, ResolveError> {
        // pending[i] counts i's dependencies not yet emitted; dependents[j]
        // lists who is waiting on j.
        let mut pending: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            for &dep in &node.deps {
                dependents[dep].push(idx);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = queue.pop_front() {
            order.push(self.nodes[current].name.clone());
            for &dependent in &dependents[current] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = (0..self.nodes.len())
                .find(|&i| pending[i] > 0)
                .map(|i| self.nodes[i].name.clone())
                .unwrap_or_default();
            return Err(ResolveError::Cycle(stuck));
        }
        Ok(order)
    }
}

/// Resolve the install order for `name`: all dependencies first, `name` last.
pub fn resolve(catalog: &Catalog, name: &str) -> Result<Vec<String>, ResolveError> {
    let graph = DependencyGraph::from_catalog(catalog, name)?;
    let order = graph.topo_order()?;
    tracing::debug!(package = name, order = ?order, "resolved install order");
    Ok(order)
}

/// Installed packages whose declared dependencies include `name`.
///
/// Entries whose catalog record is gone are skipped; they cannot declare
/// anything anymore.
pub fn find_dependents(db: &Database, catalog: &Catalog, name: &str) -> Vec<String> {
    db.all()
        .iter()
        .filter(|entry| entry.name != name)
        .filter(|entry| match catalog.load(&entry.name) {
            Ok(def) => def.dependencies.iter().any(|d| d == name),
            Err(_) => false,
        })
        .map(|entry| entry.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn linear_chain_resolves_depth_first() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", &deps(&["b"]));
        graph.insert("b", &deps(&["c"]));
        graph.insert("c", &[]);

        let order = graph.topo_order().unwrap();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn diamond_orders_dependencies_first() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", &deps(&["b", "c"]));
        graph.insert("b", &deps(&["d"]));
        graph.insert("c", &deps(&["d"]));
        graph.insert("d", &[]);

        let order = graph.topo_order().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "d") < position(&order, "b"));
        assert!(position(&order, "d") < position(&order, "c"));
        assert!(position(&order, "b") < position(&order, "a"));
        assert!(position(&order, "c") < position(&order, "a"));
        assert_eq!(order.last().map(String::as_str), Some("a"));
    }

    #[test]
    fn each_name_appears_once() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", &deps(&["b", "c"]));
        graph.insert("b", &deps(&["c"]));
        graph.insert("c", &[]);

        let order = graph.topo_order().unwrap();
        assert_eq!(order.len(), 3);
        let mut unique = order.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn two_cycle_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.insert("x", &deps(&["y"]));
        graph.insert("y", &deps(&["x"]));

        assert!(matches!(graph.topo_order(), Err(ResolveError::Cycle(_))));
    }

    #[test]
    fn self_cycle_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.insert("selfish", &deps(&["selfish"]));
        assert!(matches!(graph.topo_order(), Err(ResolveError::Cycle(_))));
    }

    #[test]
    fn longer_cycle_is_rejected() {
        let mut graph = DependencyGraph::new();
        graph.insert("a", &deps(&["b"]));
        graph.insert("b", &deps(&["c"]));
        graph.insert("c", &deps(&["a"]));
        assert!(matches!(graph.topo_order(), Err(ResolveError::Cycle(_))));
    }

    #[test]
    fn order_is_deterministic() {
        let build = || {
            let mut graph = DependencyGraph::new();
            graph.insert("root", &deps(&["m", "n", "o"]));
            graph.insert("m", &[]);
            graph.insert("n", &[]);
            graph.insert("o", &[]);
            graph
        };
        let first = build().topo_order().unwrap();
        for _ in 0..5 {
            assert_eq!(build().topo_order().unwrap(), first);
        }
    }

    #[test]
    fn single_node_graph() {
        let mut graph = DependencyGraph::new();
        graph.insert("lonely", &[]);
        assert_eq!(graph.topo_order().unwrap(), vec!["lonely"]);
    }
}

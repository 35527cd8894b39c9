//! Image dependency graph.
//!
//! Nodes are image names; an edge `a -> b` means `a` is built on top of `b`. The graph
//! provides cycle detection with the offending path and the linear build order of a
//! chain.

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::VelocityError;

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Node has not been visited.
    White,
    /// Node is on the active DFS path.
    Gray,
    /// Node has been fully visited.
    Black,
}

/// Directed graph of image dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node if it doesn't already exist, returning its index.
    pub fn ensure_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.node_map.get(name) {
            index
        } else {
            let index = self.graph.add_node(name.to_string());
            self.node_map.insert(name.to_string(), index);
            index
        }
    }

    /// Record that `from` is built on top of `to`.
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        let from_idx = self.ensure_node(from);
        let to_idx = self.ensure_node(to);

        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Detect cycles using DFS with colors.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::CyclicDependency`] with the path that closes the cycle,
    /// e.g. `a -> b -> a`.
    pub fn detect_cycles(&self) -> Result<(), VelocityError> {
        let mut colors: HashMap<NodeIndex, Color> =
            self.graph.node_indices().map(|n| (n, Color::White)).collect();
        let mut path: Vec<NodeIndex> = Vec::new();

        for node in self.graph.node_indices() {
            if matches!(colors.get(&node), Some(Color::White))
                && let Some(cycle) = self.dfs_visit(node, &mut colors, &mut path)
            {
                let chain = cycle.iter().map(|&i| self.graph[i].as_str()).collect::<Vec<_>>().join(" -> ");
                return Err(VelocityError::CyclicDependency {
                    chain,
                });
            }
        }

        Ok(())
    }

    fn dfs_visit(
        &self,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for neighbor in self.declared_neighbors(node) {
            match colors.get(&neighbor) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|&n| n == neighbor).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(neighbor);
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = self.dfs_visit(neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    /// Neighbors in the order their edges were added.
    fn declared_neighbors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        // petgraph yields the most recently added edge first
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors(node).collect();
        neighbors.reverse();
        neighbors
    }

    /// Linear build order for `root`: dependencies first, in declaration order, `root` last.
    ///
    /// Every node reachable from `root` appears exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`VelocityError::CyclicDependency`] if the graph has a cycle.
    pub fn build_order(&self, root: &str) -> Result<Vec<String>, VelocityError> {
        self.detect_cycles()?;

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        if let Some(&index) = self.node_map.get(root) {
            self.post_order(index, &mut visited, &mut order);
        }
        Ok(order)
    }

    fn post_order(&self, node: NodeIndex, visited: &mut HashSet<NodeIndex>, order: &mut Vec<String>) {
        if !visited.insert(node) {
            return;
        }
        for neighbor in self.declared_neighbors(node) {
            self.post_order(neighbor, visited, order);
        }
        order.push(self.graph[node].clone());
    }

    /// Every image `name` depends on, directly or indirectly.
    #[must_use]
    pub fn transitive_deps(&self, name: &str) -> HashSet<String> {
        let mut deps = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(&index) = self.node_map.get(name) {
            queue.push_back(index);
            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors(current) {
                    if deps.insert(self.graph[neighbor].clone()) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        deps
    }

    /// Direct dependencies of `name` in declaration order.
    #[must_use]
    pub fn direct_deps(&self, name: &str) -> Vec<String> {
        self.node_map
            .get(name)
            .map(|&index| self.declared_neighbors(index).into_iter().map(|n| self.graph[n].clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Human-readable dependency tree below `root`.
    ///
    /// `label` renders each node; shared dependencies are printed once and referenced
    /// afterwards.
    pub fn to_tree_string(&self, root: &str, label: impl Fn(&str) -> String) -> String {
        let mut result = format!("{}\n", label(root));
        let mut visited = HashSet::new();
        visited.insert(root.to_string());

        let deps = self.direct_deps(root);
        for (i, dep) in deps.iter().enumerate() {
            self.build_tree_string(dep, &label, &mut result, "", i == deps.len() - 1, &mut visited);
        }
        result
    }

    fn build_tree_string(
        &self,
        node: &str,
        label: &impl Fn(&str) -> String,
        result: &mut String,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<String>,
    ) {
        let connector = if is_last {
            "└── "
        } else {
            "├── "
        };
        let child_prefix = if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };

        if !visited.insert(node.to_string()) {
            result.push_str(&format!("{prefix}{connector}{} (see above)\n", label(node)));
            return;
        }
        result.push_str(&format!("{prefix}{connector}{}\n", label(node)));

        let deps = self.direct_deps(node);
        for (i, dep) in deps.iter().enumerate() {
            self.build_tree_string(dep, label, result, &child_prefix, i == deps.len() - 1, visited);
        }
    }
}

//! Step dependency graph as an arena: nodes addressed by index, edges as
//! index lists.
//!
//! An edge `a -> b` means `a` needs `b`. Fan-in markers that point at a step
//! of the same instance are edges too, since the fan-in step cannot run
//! before its parent step settles.

use std::collections::BTreeMap;

use beads_core::dependency::StepDependency;

use crate::error::{MolError, Result};

#[derive(Debug, Default, Clone)]
pub struct StepGraph {
    ids: Vec<String>,
    index: BTreeMap<String, usize>,
    edges: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

impl StepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from stored edges.
    pub fn from_dependencies<'a>(deps: impl IntoIterator<Item = &'a StepDependency>) -> Self {
        let mut graph = Self::new();
        for dep in deps {
            graph.add_edge(&dep.step_id, &dep.depends_on_id);
        }
        graph
    }

    /// Returns the node index for `id`, adding it if needed.
    pub fn add_node(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), idx);
        self.edges.push(Vec::new());
        idx
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids `id` directly needs.
    pub fn needs(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.edges[i].iter().map(|&j| self.ids[j].as_str()).collect())
            .unwrap_or_default()
    }

    /// Rejects the graph if it contains a cycle.
    ///
    /// Roots are visited in id order, so the reported cycle is deterministic.
    /// It starts and ends with the same id.
    pub fn validate_acyclic(&self) -> Result<()> {
        match self.find_cycle() {
            Some(cycle) => Err(MolError::CycleError { cycle }),
            None => Ok(()),
        }
    }

    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.ids.len()];
        let mut path = Vec::new();
        for &root in self.index.values() {
            if marks[root] == Mark::Unvisited {
                if let Some(cycle) = self.visit(root, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<String>> {
        marks[node] = Mark::OnPath;
        path.push(node);

        for &next in &self.edges[node] {
            match marks[next] {
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(next, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::OnPath => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&n| self.ids[n].clone()).collect();
                    cycle.push(self.ids[next].clone());
                    return Some(cycle);
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        None
    }

    /// Ids in an order where every step comes after everything it needs.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        self.validate_acyclic()?;
        let mut marks = vec![false; self.ids.len()];
        let mut order = Vec::with_capacity(self.ids.len());
        for &root in self.index.values() {
            self.post_order(root, &mut marks, &mut order);
        }
        Ok(order)
    }

    fn post_order(&self, node: usize, seen: &mut [bool], order: &mut Vec<String>) {
        if seen[node] {
            return;
        }
        seen[node] = true;
        for &next in &self.edges[node] {
            self.post_order(next, seen, order);
        }
        order.push(self.ids[node].clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chain_is_acyclic_and_ordered() {
        let mut g = StepGraph::new();
        g.add_edge("m.3", "m.2");
        g.add_edge("m.2", "m.1");
        g.add_node("m.4");

        g.validate_acyclic().unwrap();
        assert_eq!(g.topological_order().unwrap(), vec!["m.1", "m.2", "m.3", "m.4"]);
        assert_eq!(g.needs("m.3"), vec!["m.2"]);
        assert!(g.needs("ghost").is_empty());
    }

    #[test]
    fn reports_cycle_path() {
        let mut g = StepGraph::new();
        g.add_edge("m.1", "m.2");
        g.add_edge("m.2", "m.3");
        g.add_edge("m.3", "m.1");

        let err = g.validate_acyclic().unwrap_err();
        match err {
            MolError::CycleError { cycle } => {
                assert_eq!(cycle, vec!["m.1", "m.2", "m.3", "m.1"]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut g = StepGraph::new();
        g.add_edge("m.4", "m.2");
        g.add_edge("m.4", "m.3");
        g.add_edge("m.2", "m.1");
        g.add_edge("m.3", "m.1");
        assert!(g.find_cycle().is_none());
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let deps = [
            StepDependency::new("m", "m.2", "m.1"),
            StepDependency::new("m", "m.2", "m.1"),
        ];
        let g = StepGraph::from_dependencies(&deps);
        assert_eq!(g.needs("m.2"), vec!["m.1"]);
    }
}

//! Dependency graph over declarations
//!
//! Nodes are declarations in declaration order; an edge `a -> b` means `a`
//! must be applied before `b`.

use crate::error::PlanError;
use crate::resource::ResourceId;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Directed graph of "applied before" edges
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceId, ()>,
}

impl DependencyGraph {
    /// One node per id, indexed by position
    pub fn new(ids: impl IntoIterator<Item = ResourceId>) -> Self {
        let mut graph = DiGraph::new();
        for id in ids {
            graph.add_node(id);
        }
        Self { graph }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Record that `before` is applied before `after`
    pub fn add_edge(&mut self, before: usize, after: usize) {
        self.graph
            .update_edge(NodeIndex::new(before), NodeIndex::new(after), ());
    }

    /// Positions that must be applied before `idx`
    pub fn dependencies(&self, idx: usize) -> Vec<usize> {
        self.neighbors(idx, Direction::Incoming)
    }

    /// Positions that must wait for `idx`
    pub fn dependents(&self, idx: usize) -> Vec<usize> {
        self.neighbors(idx, Direction::Outgoing)
    }

    fn neighbors(&self, idx: usize, direction: Direction) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(idx), direction)
            .map(NodeIndex::index)
            .collect();
        out.sort_unstable();
        out
    }

    /// Kahn's algorithm, ties broken by position
    pub fn topological_order(&self) -> Result<Vec<usize>, PlanError> {
        let n = self.graph.node_count();
        let mut in_degree: Vec<usize> = (0..n)
            .map(|i| {
                self.graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for next in self.graph.neighbors(NodeIndex::new(idx)) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }

        if order.len() == n {
            Ok(order)
        } else {
            Err(PlanError::Cycle {
                cycle: self.find_cycle(),
            })
        }
    }

    /// Members of one cycle, in edge order starting from the earliest
    /// declared member
    fn find_cycle(&self) -> Vec<ResourceId> {
        let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .collect();
        for scc in &mut components {
            scc.sort_unstable();
        }
        components.sort_by_key(|scc| scc[0]);

        let Some(scc) = components.first() else {
            return Vec::new();
        };
        let members: HashSet<NodeIndex> = scc.iter().copied().collect();
        let start = scc[0];

        // Shortest path back to `start` inside the component
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            let mut successors: Vec<NodeIndex> = self
                .graph
                .neighbors(node)
                .filter(|n| members.contains(n))
                .collect();
            successors.sort_unstable();
            successors.dedup();
            for next in successors {
                if next == start {
                    let mut path = vec![node];
                    let mut cursor = node;
                    while let Some(&prev) = parent.get(&cursor) {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return path.into_iter().map(|i| self.graph[i].clone()).collect();
                }
                if !parent.contains_key(&next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        scc.iter().map(|i| self.graph[*i].clone()).collect()
    }
}

// src/dag/scheduler.rs

//! Static scheduling of a validated, acyclic [`FlowGraph`].
//!
//! - [`LevelScheduler::schedule`] partitions the nodes reachable from the
//!   roots into levels. A node's distance is the longest path from any root
//!   to it; level `i` holds the nodes at distance `d_max - i`, so level 0 runs
//!   first and the roots run last.
//! - [`LevelScheduler::topo_order`] is a depth-first post-order over all
//!   nodes in declaration order, suitable for enqueueing jobs one by one.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;

use crate::dag::graph::FlowGraph;
use crate::dag::task_info::NodeId;

/// Ordered levels of node ids. Nodes inside a level are independent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    levels: Vec<Vec<NodeId>>,
}

impl Schedule {
    pub fn new(levels: Vec<Vec<NodeId>>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_of(&self, id: NodeId) -> Option<usize> {
        self.levels.iter().position(|level| level.contains(&id))
    }

    /// All scheduled nodes, level by level.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.levels.iter().flatten().copied()
    }
}

pub struct LevelScheduler<'a> {
    graph: &'a FlowGraph,
}

impl<'a> LevelScheduler<'a> {
    pub fn new(graph: &'a FlowGraph) -> Self {
        Self { graph }
    }

    pub fn schedule(&self) -> Schedule {
        let n = self.graph.nodes.len();
        let mut distance: Vec<Option<usize>> = vec![None; n];
        let mut frontier = self.graph.roots();
        let mut depth = 0usize;
        let mut max_depth = 0usize;

        // Bounded by the node count; only an acyclic graph reaches here.
        while !frontier.is_empty() && depth <= n {
            let mut seen = vec![false; n];
            let mut next = Vec::new();
            for &id in &frontier {
                distance[id.0] = Some(depth);
                max_depth = depth;
                for dep in self.graph.dependency_nodes(id) {
                    if !seen[dep.0] {
                        seen[dep.0] = true;
                        next.push(dep);
                    }
                }
            }
            frontier = next;
            depth += 1;
        }

        if distance.iter().all(Option::is_none) {
            return Schedule::default();
        }

        let mut levels = vec![Vec::new(); max_depth + 1];
        for (idx, d) in distance.iter().enumerate() {
            if let Some(d) = d {
                levels[max_depth - d].push(NodeId(idx));
            }
        }
        Schedule::new(levels)
    }

    /// Dependencies before dependents; ties broken by declaration order.
    pub fn topo_order(&self) -> Vec<NodeId> {
        let g = dependency_graph(self.graph);
        let mut order = Vec::with_capacity(g.node_count());
        let mut dfs = DfsPostOrder::empty(&g);

        for start in g.node_indices() {
            dfs.move_to(start);
            while let Some(ix) = dfs.next(&g) {
                order.push(g[ix]);
            }
        }
        order
    }
}

/// Node-to-provider edges as a petgraph graph. Node indices equal [`NodeId`]s.
pub fn dependency_graph(graph: &FlowGraph) -> DiGraph<NodeId, ()> {
    let mut g = DiGraph::with_capacity(graph.nodes.len(), graph.nodes.len());
    for idx in 0..graph.nodes.len() {
        g.add_node(NodeId(idx));
    }
    for idx in 0..graph.nodes.len() {
        for dep in graph.dependency_nodes(NodeId(idx)) {
            g.add_edge(NodeIndex::new(idx), NodeIndex::new(dep.0), ());
        }
    }
    g
}

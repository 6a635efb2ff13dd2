// src/dag/cycle.rs

//! Dependency cycle detection.
//!
//! Depth-first walk along dependency edges, starting from the declared flow
//! outputs and then from every node's dependencies so that cycles
//! unreachable from the outputs are found as well. The current path is a
//! list of `(provider, type)` hops; re-entering a type already on the path
//! is a cycle. Types whose subtree has been fully explored are memoized and
//! never walked again.

use std::collections::HashSet;

use tracing::debug;

use crate::dag::graph::FlowGraph;
use crate::errors::{CompileError, CompileErrorKind, CycleStep};
use crate::types::TypeKey;

pub struct CycleDetector<'a> {
    graph: &'a FlowGraph,
    explored: HashSet<TypeKey>,
}

impl<'a> CycleDetector<'a> {
    pub fn new(graph: &'a FlowGraph) -> Self {
        Self {
            graph,
            explored: HashSet::new(),
        }
    }

    /// First cycle found, as a single fatal error.
    pub fn find_cycle(mut self) -> Result<(), CompileError> {
        let graph = self.graph;
        let mut path = Vec::new();

        for out in &graph.outputs {
            self.visit(&mut path, &out.key)?;
        }
        for node in &graph.nodes {
            for dep in &node.dependencies {
                self.visit(&mut path, dep)?;
            }
        }
        Ok(())
    }

    fn visit(&mut self, path: &mut Vec<CycleStep>, key: &TypeKey) -> Result<(), CompileError> {
        // Flow inputs and unresolved types cannot close a cycle.
        let Some(provider) = self.graph.provider_of(key) else {
            return Ok(());
        };
        let node = self.graph.node(provider);

        let step = CycleStep {
            node: provider,
            label: node.label.clone(),
            provides: key.clone(),
        };

        if let Some(start) = path.iter().position(|s| &s.provides == key) {
            let mut chain: Vec<CycleStep> = path[start..].to_vec();
            chain.push(step);
            let message = format!("cycle detected: {}", render_chain(&chain));
            debug!(hops = chain.len(), "dependency cycle found");
            return Err(CompileError::new(
                node.location,
                CompileErrorKind::Cycle(chain),
                message,
            ));
        }

        if self.explored.contains(key) {
            return Ok(());
        }

        path.push(step);
        for dep in &node.dependencies {
            if let Err(e) = self.visit(path, dep) {
                path.pop();
                return Err(e);
            }
        }
        path.pop();

        self.explored.insert(key.clone());
        Ok(())
    }
}

fn render_chain(chain: &[CycleStep]) -> String {
    let mut out = String::new();
    for (i, step) in chain.iter().enumerate() {
        if i == 0 {
            out.push_str(&format!(
                "need to run [{}] to provide {} (output)",
                step.label, step.provides
            ));
        } else {
            out.push_str(&format!(
                "\n\tneed to run [{}] to provide {}",
                step.label, step.provides
            ));
        }
    }
    out
}

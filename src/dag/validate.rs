// src/dag/validate.rs

//! Coverage checks over a built [`FlowGraph`].
//!
//! The validator walks breadth-first from the flow outputs (and from every
//! `invoke` task) back through provider dependencies. It confirms that each
//! reached type has a provider or is a flow input, and afterwards reports
//! flow inputs nobody consumed and node outputs nobody receives.
//!
//! The walk keeps a visited set, so it terminates on cyclic graphs too; it
//! does not report cycles itself.

use std::collections::{HashSet, VecDeque};

use crate::dag::graph::FlowGraph;
use crate::errors::{CompileErrorKind, CompileErrors};
use crate::types::{SourceLocation, TypeKey};

pub struct GraphValidator<'a> {
    graph: &'a FlowGraph,
    errors: &'a mut CompileErrors,
}

impl<'a> GraphValidator<'a> {
    pub fn new(graph: &'a FlowGraph, errors: &'a mut CompileErrors) -> Self {
        Self { graph, errors }
    }

    /// Run every check, accumulating problems.
    pub fn validate(mut self) {
        self.validate_unused_outputs();
        self.validate_coverage();
    }

    fn validate_unused_outputs(&mut self) {
        for node in &self.graph.nodes {
            for key in &node.outputs {
                if key.is_sentinel() {
                    continue;
                }
                if self.graph.receivers_of(key).is_empty() {
                    self.errors.report(
                        node.location,
                        CompileErrorKind::UnusedOutput,
                        format!("unused output type {key}"),
                    );
                }
            }
        }
    }

    fn validate_coverage(&mut self) {
        let graph = self.graph;
        let mut queue: VecDeque<(TypeKey, SourceLocation)> = VecDeque::new();

        for out in &graph.outputs {
            queue.push_back((out.key.clone(), out.location));
        }
        for task in graph.tasks.iter().filter(|t| t.invoke) {
            for key in &graph.node(task.node).outputs {
                queue.push_back((key.clone(), task.location));
            }
        }

        let mut visited: HashSet<TypeKey> = HashSet::new();
        let mut consumed: HashSet<TypeKey> = HashSet::new();

        while let Some((key, wanted_at)) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }

            if let Some(provider) = graph.provider_of(&key) {
                let node = graph.node(provider);
                for dep in &node.dependencies {
                    queue.push_back((dep.clone(), node.location));
                }
            } else if graph.is_flow_input(&key) {
                consumed.insert(key);
            } else {
                self.errors.report(
                    wanted_at,
                    CompileErrorKind::MissingProvider,
                    format!("no provider found for {key}"),
                );
            }
        }

        let mut reported: HashSet<&TypeKey> = HashSet::new();
        for input in &graph.inputs {
            if !consumed.contains(&input.key) && reported.insert(&input.key) {
                self.errors.report(
                    input.location,
                    CompileErrorKind::UnusedInput,
                    format!("unused input type {}", input.key),
                );
            }
        }
    }
}

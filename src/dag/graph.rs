// src/dag/graph.rs

//! Graph construction: providers, receivers and per-node dependencies.
//!
//! [`GraphBuilder`] walks a [`FlowSpec`] once, in declaration order, and
//! produces a [`FlowGraph`]. Every problem it can detect locally (bad
//! signatures, duplicate providers, malformed predicates or fallbacks) is
//! reported into the shared [`CompileErrors`]; a task with a malformed
//! declaration is left out of the graph so later passes do not report
//! follow-on noise for it.

use std::collections::HashMap;

use tracing::debug;

use crate::dag::task_info::{
    Declared, FlowSpec, Node, NodeId, NodeKind, PredicateDecl, PredicateDescriptor, TaskDecl,
    TaskDescriptor,
};
use crate::errors::{CompileErrorKind, CompileErrors};
use crate::types::{SourceLocation, TypeKey};

/// Who consumes a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    Node(NodeId),
    FlowOutput,
}

/// The graph of a flow: tasks, predicate nodes and the type edges between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowGraph {
    pub name: String,
    pub location: SourceLocation,
    pub inputs: Vec<Declared>,
    pub outputs: Vec<Declared>,
    pub tasks: Vec<TaskDescriptor>,
    pub nodes: Vec<Node>,
    providers: HashMap<TypeKey, NodeId>,
    flow_inputs: HashMap<TypeKey, SourceLocation>,
    receivers: HashMap<TypeKey, Vec<Receiver>>,
}

impl FlowGraph {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Task owning the node (for predicate nodes, the gated task).
    pub fn task_of(&self, id: NodeId) -> &TaskDescriptor {
        &self.tasks[self.node(id).task_ordinal()]
    }

    pub fn provider_of(&self, key: &TypeKey) -> Option<NodeId> {
        self.providers.get(key).copied()
    }

    pub fn providers(&self) -> &HashMap<TypeKey, NodeId> {
        &self.providers
    }

    pub fn is_flow_input(&self, key: &TypeKey) -> bool {
        self.flow_inputs.contains_key(key)
    }

    pub fn receivers_of(&self, key: &TypeKey) -> &[Receiver] {
        self.receivers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes whose outputs `id` consumes, deduplicated, in dependency order.
    /// Dependencies satisfied by flow inputs contribute nothing.
    pub fn dependency_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for dep in &self.node(id).dependencies {
            if let Some(p) = self.provider_of(dep) {
                if !out.contains(&p) {
                    out.push(p);
                }
            }
        }
        out
    }

    /// Nodes the schedule is computed from: the providers of the declared
    /// outputs, in output order, followed by every `invoke` task.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut roots = Vec::new();
        for out in &self.outputs {
            if let Some(p) = self.provider_of(&out.key) {
                if !roots.contains(&p) {
                    roots.push(p);
                }
            }
        }
        for task in self.tasks.iter().filter(|t| t.invoke) {
            if !roots.contains(&task.node) {
                roots.push(task.node);
            }
        }
        roots
    }
}

/// Builds a [`FlowGraph`] from a [`FlowSpec`], reporting local problems.
pub struct GraphBuilder<'a> {
    errors: &'a mut CompileErrors,
    graph: FlowGraph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(spec: &FlowSpec, errors: &'a mut CompileErrors) -> Self {
        Self {
            errors,
            graph: FlowGraph {
                name: spec.name.clone(),
                location: spec.location,
                inputs: spec.inputs.clone(),
                outputs: spec.outputs.clone(),
                tasks: Vec::new(),
                nodes: Vec::new(),
                providers: HashMap::new(),
                flow_inputs: HashMap::new(),
                receivers: HashMap::new(),
            },
        }
    }

    pub fn build(spec: &FlowSpec, errors: &'a mut CompileErrors) -> FlowGraph {
        let mut builder = Self::new(spec, errors);

        for input in &spec.inputs {
            builder.add_flow_input(input);
        }
        for output in &spec.outputs {
            builder.add_flow_output(output);
        }
        for (ordinal, decl) in spec.tasks.iter().enumerate() {
            builder.add_task(ordinal, decl);
        }

        debug!(
            flow = %builder.graph.name,
            tasks = builder.graph.tasks.len(),
            nodes = builder.graph.nodes.len(),
            "graph built"
        );
        builder.graph
    }

    fn add_flow_input(&mut self, input: &Declared) {
        if let Some(prev) = self.graph.flow_inputs.get(&input.key) {
            self.errors.report(
                input.location,
                CompileErrorKind::DuplicateInput,
                format!("type {} already provided as a flow input at {}", input.key, prev),
            );
            return;
        }
        self.graph.flow_inputs.insert(input.key.clone(), input.location);
    }

    fn add_flow_output(&mut self, output: &Declared) {
        let receivers = self.graph.receivers.entry(output.key.clone()).or_default();
        if receivers.contains(&Receiver::FlowOutput) {
            self.errors.report(
                output.location,
                CompileErrorKind::DuplicateOutput,
                format!("type {} already requested as a flow output", output.key),
            );
            return;
        }
        receivers.push(Receiver::FlowOutput);
    }

    fn add_task(&mut self, ordinal: usize, decl: &TaskDecl) {
        let shape = match decl.signature.shape() {
            Ok(shape) => shape,
            Err(problems) => {
                for p in problems {
                    self.errors
                        .report(decl.location, CompileErrorKind::InvalidSignature, p);
                }
                return;
            }
        };

        let mut valid = true;

        if shape.outputs.is_empty() && !decl.invoke {
            self.errors.report(
                decl.location,
                CompileErrorKind::InvalidInvoke,
                "task must return at least one non-error value but currently produces zero; \
                 did you intend to mark it invoke?",
            );
            valid = false;
        }
        if decl.invoke && !shape.outputs.is_empty() {
            self.errors.report(
                decl.location,
                CompileErrorKind::InvalidInvoke,
                format!(
                    "invoke tasks must not produce results, found {}",
                    shape.outputs.len()
                ),
            );
            valid = false;
        }

        if let Some(fallback) = &decl.fallback {
            valid &= self.check_fallback(decl, fallback, &shape.outputs, shape.has_error);
        }

        let predicate_inputs = match &decl.predicate {
            Some(pred) => match self.check_predicate(pred) {
                Some(inputs) => Some(inputs),
                None => {
                    valid = false;
                    None
                }
            },
            None => None,
        };

        if !valid {
            return;
        }

        let task_index = self.graph.tasks.len();
        let task_node = NodeId(self.graph.nodes.len());

        let outputs = if decl.invoke {
            vec![TypeKey::no_output_sentinel(ordinal)]
        } else {
            shape.outputs.clone()
        };

        let mut dependencies = shape.inputs.clone();
        let predicate = match (&decl.predicate, predicate_inputs) {
            (Some(pred), Some(inputs)) => {
                let sentinel = TypeKey::predicate_sentinel(ordinal);
                dependencies.push(sentinel.clone());
                Some(PredicateDescriptor {
                    location: pred.location,
                    inputs,
                    node: NodeId(task_node.0 + 1),
                    sentinel,
                })
            }
            _ => None,
        };

        self.push_node(Node {
            kind: NodeKind::Task { task: task_index },
            location: decl.location,
            label: decl.signature.to_string(),
            dependencies,
            outputs,
        });

        if let (Some(pred), Some(desc)) = (&decl.predicate, &predicate) {
            self.push_node(Node {
                kind: NodeKind::Predicate { task: task_index },
                location: pred.location,
                label: pred.signature.to_string(),
                dependencies: desc.inputs.clone(),
                outputs: vec![desc.sentinel.clone()],
            });
        }

        self.graph.tasks.push(TaskDescriptor {
            name: decl
                .name
                .clone()
                .unwrap_or_else(|| format!("task@{}", decl.location)),
            ordinal,
            location: decl.location,
            inputs: shape.inputs,
            outputs: shape.outputs,
            wants_context: shape.wants_context,
            has_error: shape.has_error,
            predicate,
            fallback: decl.fallback.clone(),
            invoke: decl.invoke,
            node: task_node,
        });
    }

    fn check_fallback(
        &mut self,
        decl: &TaskDecl,
        fallback: &[TypeKey],
        outputs: &[TypeKey],
        has_error: bool,
    ) -> bool {
        let mut valid = true;
        if !has_error {
            self.errors.report(
                decl.location,
                CompileErrorKind::InvalidFallback,
                "task must return an error for fallback values to be used",
            );
            valid = false;
        }
        if fallback.len() != outputs.len() {
            self.errors.report(
                decl.location,
                CompileErrorKind::InvalidFallback,
                format!(
                    "fallback values must match the task results: expected {}, got {}",
                    outputs.len(),
                    fallback.len()
                ),
            );
            return false;
        }
        for (i, (given, want)) in fallback.iter().zip(outputs).enumerate() {
            if given != want {
                self.errors.report(
                    decl.location,
                    CompileErrorKind::InvalidFallback,
                    format!("fallback value at position {i} of type {given} cannot be used as {want}"),
                );
                valid = false;
            }
        }
        valid
    }

    /// Returns the predicate's inputs when it is well formed.
    fn check_predicate(&mut self, pred: &PredicateDecl) -> Option<Vec<TypeKey>> {
        let shape = match pred.signature.shape() {
            Ok(shape) => shape,
            Err(problems) => {
                for p in problems {
                    self.errors
                        .report(pred.location, CompileErrorKind::InvalidPredicate, p);
                }
                return None;
            }
        };

        let mut valid = true;
        if shape.wants_context {
            self.errors.report(
                pred.location,
                CompileErrorKind::InvalidPredicate,
                "predicates cannot accept the cancellation context",
            );
            valid = false;
        }
        let returns_bool =
            !shape.has_error && shape.outputs.len() == 1 && shape.outputs[0].is::<bool>();
        if !returns_bool {
            self.errors.report(
                pred.location,
                CompileErrorKind::InvalidPredicate,
                format!("predicate must return a single bool, got {}", pred.signature),
            );
            valid = false;
        }

        valid.then_some(shape.inputs)
    }

    fn push_node(&mut self, node: Node) {
        let id = NodeId(self.graph.nodes.len());

        for key in &node.dependencies {
            self.graph
                .receivers
                .entry(key.clone())
                .or_default()
                .push(Receiver::Node(id));
        }

        for key in &node.outputs {
            if let Some(loc) = self.graph.flow_inputs.get(key) {
                self.errors.report(
                    node.location,
                    CompileErrorKind::DuplicateProvider,
                    format!("type {key} already provided as a flow input at {loc}"),
                );
                continue;
            }
            match self.graph.providers.get(key) {
                Some(prev) => {
                    let prev_loc = self.graph.nodes[prev.0].location;
                    self.errors.report(
                        node.location,
                        CompileErrorKind::DuplicateProvider,
                        format!("type {key} already provided at {prev_loc}"),
                    );
                }
                None => {
                    self.graph.providers.insert(key.clone(), id);
                }
            }
        }

        self.graph.nodes.push(node);
    }
}

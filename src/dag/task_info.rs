// src/dag/task_info.rs

//! Declarations fed into the compiler and the descriptors it produces.
//!
//! A [`FlowSpec`] is the raw, unchecked description of a flow: declared
//! inputs, requested outputs and a list of [`TaskDecl`]s, each with a
//! [`Signature`]. The compiler turns it into [`TaskDescriptor`]s and graph
//! [`Node`]s.

use std::any::Any;
use std::fmt;

use crate::types::{SourceLocation, TypeKey};

/// Ordered parameter and result keys of a task or predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<TypeKey>,
    results: Vec<TypeKey>,
    variadic: bool,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: TypeKey) -> Self {
        self.params.push(key);
        self
    }

    pub fn param_of<T: Any>(self) -> Self {
        self.param(TypeKey::of::<T>())
    }

    pub fn context(self) -> Self {
        self.param(TypeKey::context())
    }

    pub fn result(mut self, key: TypeKey) -> Self {
        self.results.push(key);
        self
    }

    pub fn result_of<T: Any>(self) -> Self {
        self.result(TypeKey::of::<T>())
    }

    pub fn error(self) -> Self {
        self.result(TypeKey::error())
    }

    /// Marks the last parameter as variadic. Never accepted by the compiler.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn params(&self) -> &[TypeKey] {
        &self.params
    }

    pub fn results(&self) -> &[TypeKey] {
        &self.results
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Split the signature into its inputs and outputs.
    ///
    /// The context may only be the first parameter and the error only the
    /// last result. Every violation is returned.
    pub(crate) fn shape(&self) -> Result<FunctionShape, Vec<String>> {
        if self.variadic {
            return Err(vec!["variadic functions are not yet supported".to_string()]);
        }

        let mut problems = Vec::new();
        let mut shape = FunctionShape::default();

        for (i, key) in self.params.iter().enumerate() {
            if key.is_context() {
                if i == 0 {
                    shape.wants_context = true;
                } else {
                    problems.push(
                        "only the first argument may be the cancellation context".to_string(),
                    );
                }
                continue;
            }
            if key.is_error() {
                problems.push("the error marker cannot be used as an argument".to_string());
                continue;
            }
            shape.inputs.push(key.clone());
        }

        let last = self.results.len().saturating_sub(1);
        for (i, key) in self.results.iter().enumerate() {
            if key.is_error() {
                if i == last {
                    shape.has_error = true;
                } else {
                    problems.push("only the last result may be an error".to_string());
                }
                continue;
            }
            if key.is_context() {
                problems.push("the cancellation context cannot be returned".to_string());
                continue;
            }
            shape.outputs.push(key.clone());
        }

        if problems.is_empty() {
            Ok(shape)
        } else {
            Err(problems)
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fn(")?;
        let last = self.params.len().saturating_sub(1);
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if self.variadic && i == last {
                f.write_str("...")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(")")?;
        match self.results.as_slice() {
            [] => Ok(()),
            [one] => write!(f, " -> {one}"),
            many => {
                f.write_str(" -> (")?;
                for (i, r) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{r}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Inputs/outputs of a signature once context and error are stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FunctionShape {
    pub inputs: Vec<TypeKey>,
    pub outputs: Vec<TypeKey>,
    pub wants_context: bool,
    pub has_error: bool,
}

/// A predicate guarding a task.
#[derive(Debug, Clone)]
pub struct PredicateDecl {
    pub location: SourceLocation,
    pub signature: Signature,
}

impl PredicateDecl {
    #[track_caller]
    pub fn new(signature: Signature) -> Self {
        Self {
            location: SourceLocation::caller(),
            signature,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }
}

/// One task registration, before compilation.
#[derive(Debug, Clone)]
pub struct TaskDecl {
    pub name: Option<String>,
    pub location: SourceLocation,
    pub signature: Signature,
    pub predicate: Option<PredicateDecl>,
    /// Types of the fallback values, in output order.
    pub fallback: Option<Vec<TypeKey>>,
    pub invoke: bool,
}

impl TaskDecl {
    #[track_caller]
    pub fn new(signature: Signature) -> Self {
        Self {
            name: None,
            location: SourceLocation::caller(),
            signature,
            predicate: None,
            fallback: None,
            invoke: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    pub fn with_predicate(mut self, predicate: PredicateDecl) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_fallback(mut self, values: Vec<TypeKey>) -> Self {
        self.fallback = Some(values);
        self
    }

    pub fn invoke(mut self) -> Self {
        self.invoke = true;
        self
    }
}

/// A flow input or output declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declared {
    pub key: TypeKey,
    pub location: SourceLocation,
}

/// Unchecked description of a whole flow.
#[derive(Debug, Clone)]
pub struct FlowSpec {
    pub name: String,
    pub location: SourceLocation,
    pub inputs: Vec<Declared>,
    pub outputs: Vec<Declared>,
    pub tasks: Vec<TaskDecl>,
}

impl FlowSpec {
    #[track_caller]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: SourceLocation::caller(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            tasks: Vec::new(),
        }
    }

    #[track_caller]
    pub fn input(mut self, key: TypeKey) -> Self {
        self.inputs.push(Declared {
            key,
            location: SourceLocation::caller(),
        });
        self
    }

    #[track_caller]
    pub fn output(mut self, key: TypeKey) -> Self {
        self.outputs.push(Declared {
            key,
            location: SourceLocation::caller(),
        });
        self
    }

    pub fn task(mut self, task: TaskDecl) -> Self {
        self.tasks.push(task);
        self
    }
}

/// Index of a node in the compiled graph. Nodes are numbered in declaration
/// order, a task's predicate immediately following the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// The task with this ordinal.
    Task { task: usize },
    /// The predicate gating the task with this ordinal.
    Predicate { task: usize },
}

/// A schedulable unit of the compiled graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub location: SourceLocation,
    /// Rendered signature, used in cycle diagnostics.
    pub label: String,
    pub dependencies: Vec<TypeKey>,
    pub outputs: Vec<TypeKey>,
}

impl Node {
    pub fn task_ordinal(&self) -> usize {
        match self.kind {
            NodeKind::Task { task } | NodeKind::Predicate { task } => task,
        }
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self.kind, NodeKind::Predicate { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateDescriptor {
    pub location: SourceLocation,
    pub inputs: Vec<TypeKey>,
    pub node: NodeId,
    /// Key produced by the predicate node and consumed by the gated task.
    pub sentinel: TypeKey,
}

/// Compiled view of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub name: String,
    pub ordinal: usize,
    pub location: SourceLocation,
    pub inputs: Vec<TypeKey>,
    pub outputs: Vec<TypeKey>,
    pub wants_context: bool,
    pub has_error: bool,
    pub predicate: Option<PredicateDescriptor>,
    pub fallback: Option<Vec<TypeKey>>,
    pub invoke: bool,
    pub node: NodeId,
}

impl TaskDescriptor {
    /// Inputs plus any predicate inputs the task does not already consume,
    /// in first-seen order.
    pub fn dependencies(&self) -> Vec<TypeKey> {
        let mut deps = self.inputs.clone();
        if let Some(pred) = &self.predicate {
            for key in &pred.inputs {
                if !deps.contains(key) {
                    deps.push(key.clone());
                }
            }
        }
        deps
    }
}

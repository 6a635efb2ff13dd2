#![allow(dead_code)]

//! Builders for `FlowSpec`s over named keys.
//!
//! ```ignore
//! let spec = FlowSpecBuilder::new("chain")
//!     .output("c")
//!     .task(task("A").provides(&["a"]))
//!     .task(task("B").needs(&["a"]).provides(&["b"]))
//!     .task(task("C").needs(&["b"]).provides(&["c"]))
//!     .build();
//! ```

use taskdag::dag::{Declared, FlowSpec, PredicateDecl, Signature, TaskDecl};
use taskdag::types::{SourceLocation, TypeKey};

/// Named key shorthand.
pub fn key(name: &str) -> TypeKey {
    TypeKey::named(name.to_string())
}

pub struct FlowSpecBuilder {
    spec: FlowSpec,
}

impl FlowSpecBuilder {
    #[track_caller]
    pub fn new(name: &str) -> Self {
        Self {
            spec: FlowSpec::new(name),
        }
    }

    #[track_caller]
    pub fn input(mut self, name: &str) -> Self {
        self.spec.inputs.push(Declared {
            key: key(name),
            location: SourceLocation::caller(),
        });
        self
    }

    #[track_caller]
    pub fn output(mut self, name: &str) -> Self {
        self.spec.outputs.push(Declared {
            key: key(name),
            location: SourceLocation::caller(),
        });
        self
    }

    pub fn task(mut self, task: TaskDeclBuilder) -> Self {
        self.spec.tasks.push(task.build());
        self
    }

    /// A raw declaration, e.g. one with a hand-written signature.
    pub fn decl(mut self, decl: TaskDecl) -> Self {
        self.spec.tasks.push(decl);
        self
    }

    pub fn build(self) -> FlowSpec {
        self.spec
    }
}

/// Start a task declaration located at the caller.
#[track_caller]
pub fn task(name: &str) -> TaskDeclBuilder {
    TaskDeclBuilder {
        name: name.to_string(),
        location: SourceLocation::caller(),
        context: false,
        needs: Vec::new(),
        provides: Vec::new(),
        fallible: false,
        predicate: None,
        fallback: None,
        invoke: false,
    }
}

pub struct TaskDeclBuilder {
    name: String,
    location: SourceLocation,
    context: bool,
    needs: Vec<TypeKey>,
    provides: Vec<TypeKey>,
    fallible: bool,
    predicate: Option<Vec<TypeKey>>,
    fallback: Option<Vec<TypeKey>>,
    invoke: bool,
}

impl TaskDeclBuilder {
    pub fn context(mut self) -> Self {
        self.context = true;
        self
    }

    pub fn needs(mut self, names: &[&str]) -> Self {
        self.needs.extend(names.iter().map(|n| key(n)));
        self
    }

    pub fn provides(mut self, names: &[&str]) -> Self {
        self.provides.extend(names.iter().map(|n| key(n)));
        self
    }

    pub fn fallible(mut self) -> Self {
        self.fallible = true;
        self
    }

    /// Gate the task on a well-formed predicate over `names`.
    pub fn when(mut self, names: &[&str]) -> Self {
        self.predicate = Some(names.iter().map(|n| key(n)).collect());
        self
    }

    pub fn fallback(mut self, names: &[&str]) -> Self {
        self.fallback = Some(names.iter().map(|n| key(n)).collect());
        self
    }

    pub fn invoke(mut self) -> Self {
        self.invoke = true;
        self
    }

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    pub fn build(self) -> TaskDecl {
        let mut sig = Signature::new();
        if self.context {
            sig = sig.context();
        }
        for k in self.needs {
            sig = sig.param(k);
        }
        for k in self.provides {
            sig = sig.result(k);
        }
        if self.fallible {
            sig = sig.error();
        }

        let mut decl = TaskDecl::new(sig).named(self.name).at(self.location);
        if let Some(inputs) = self.predicate {
            let pred_sig = inputs
                .into_iter()
                .fold(Signature::new(), Signature::param)
                .result_of::<bool>();
            decl = decl.with_predicate(PredicateDecl::new(pred_sig).at(self.location));
        }
        if let Some(fallback) = self.fallback {
            decl = decl.with_fallback(fallback);
        }
        if self.invoke {
            decl = decl.invoke();
        }
        decl
    }
}

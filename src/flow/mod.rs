// src/flow/mod.rs

//! Typed flow API.
//!
//! ```ignore
//! let flow = Flow::builder("trip")
//!     .input::<TripId>()
//!     .output::<Response>()
//!     .task(
//!         Task::new("load trip")
//!             .context()
//!             .input::<TripId>()
//!             .output::<Trip>()
//!             .fallible()
//!             .run(|ctx| async move {
//!                 let id = ctx.input::<TripId>()?;
//!                 ctx.provide(load_trip(*id).await?)
//!             }),
//!     )
//!     .task(/* Trip -> Response */)
//!     .build()?;
//!
//! let results = flow.run(Inputs::new().with(TripId(42)), &token).await?;
//! let response = results.get::<Response>();
//! ```
//!
//! Each registration builds a [`Signature`] for the compiler and keeps the
//! body for the runtime; [`FlowBuilder::build`] compiles once and the
//! resulting [`Flow`] can be run any number of times.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::dag::{FlowPlan, FlowSpec, PredicateDecl, Signature, TaskDecl, compile};
use crate::emit::{Emitter, NopEmitter};
use crate::errors::{CompileErrorKind, Result, TaskdagError};
use crate::exec::{
    FlowResults, FlowRuntime, Inputs, PredicateBody, PredicateFuture, TaskBody, TaskContext,
    TaskFuture, TaskRuntime, Value,
};
use crate::types::{SourceLocation, TypeKey};

/// A compiled flow, ready to run.
#[derive(Clone)]
pub struct Flow {
    runtime: FlowRuntime,
}

impl Flow {
    #[track_caller]
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder {
            spec: FlowSpec::new(name),
            tasks: Vec::new(),
            config: SchedulerConfig::default(),
            emitter: Arc::new(NopEmitter),
        }
    }

    pub fn plan(&self) -> &FlowPlan {
        &self.runtime.plan
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.runtime.config
    }

    /// Run the flow once with the given input values.
    pub async fn run(&self, inputs: Inputs, ctx: &CancellationToken) -> Result<FlowResults> {
        crate::exec::invoke(&self.runtime, inputs, ctx).await
    }
}

pub struct FlowBuilder {
    spec: FlowSpec,
    tasks: Vec<(SourceLocation, TaskRuntimeParts)>,
    config: SchedulerConfig,
    emitter: Arc<dyn Emitter>,
}

struct TaskRuntimeParts {
    body: Option<TaskBody>,
    predicate: Option<PredicateBody>,
    /// Where a predicate without a `check` body was declared.
    unchecked_predicate: Option<SourceLocation>,
    fallback: Option<Vec<Value>>,
}

impl FlowBuilder {
    #[track_caller]
    pub fn input<T: Any + Send + Sync>(self) -> Self {
        self.input_key(TypeKey::of::<T>())
    }

    #[track_caller]
    pub fn input_key(mut self, key: TypeKey) -> Self {
        self.spec = self.spec.input(key);
        self
    }

    #[track_caller]
    pub fn output<T: Any + Send + Sync>(self) -> Self {
        self.output_key(TypeKey::of::<T>())
    }

    #[track_caller]
    pub fn output_key(mut self, key: TypeKey) -> Self {
        self.spec = self.spec.output(key);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        let Task {
            decl,
            body,
            predicate,
            fallback,
        } = task;
        let location = decl.location;
        let (decl, predicate_body, unchecked_predicate) = match predicate {
            Some(p) => {
                let at = p.location;
                let (pred_decl, pred_body) = p.into_parts();
                let unchecked = pred_body.is_none().then_some(at);
                (decl.with_predicate(pred_decl), pred_body, unchecked)
            }
            None => (decl, None, None),
        };
        self.spec = self.spec.task(decl);
        self.tasks.push((
            location,
            TaskRuntimeParts {
                body,
                predicate: predicate_body,
                unchecked_predicate,
                fallback,
            },
        ));
        self
    }

    /// Flows stop at their first failure; a config asking to continue on
    /// error is rejected by [`FlowBuilder::build`].
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Limit concurrently running tasks; `0` lifts the limit.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.config = self.config.with_concurrency(limit);
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn Emitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Compile the flow. Every problem found is reported at once.
    pub fn build(self) -> Result<Flow> {
        let mut problems = crate::errors::CompileErrors::new();
        let mut tasks = Vec::with_capacity(self.tasks.len());

        if self.config.continue_on_error {
            problems.report(
                self.spec.location,
                CompileErrorKind::InvalidOption,
                "continue_on_error is not a valid flow option; use Parallel for independent tasks",
            );
        }

        for (location, parts) in self.tasks {
            if let Some(at) = parts.unchecked_predicate {
                problems.report(
                    at,
                    CompileErrorKind::InvalidPredicate,
                    "predicate has no body; call check() to provide one",
                );
            }
            let Some(body) = parts.body else {
                problems.report(
                    location,
                    CompileErrorKind::InvalidSignature,
                    "task has no body; call run() to provide one",
                );
                continue;
            };
            tasks.push(TaskRuntime {
                body,
                predicate: parts.predicate,
                fallback: parts.fallback,
            });
        }

        let plan = match compile(&self.spec) {
            Ok(plan) => plan,
            Err(mut errors) => {
                for e in problems.iter() {
                    errors.push(e.clone());
                }
                return Err(TaskdagError::Compile(errors));
            }
        };
        if !problems.is_empty() {
            return Err(TaskdagError::Compile(problems));
        }

        Ok(Flow {
            runtime: FlowRuntime {
                plan: Arc::new(plan),
                tasks: Arc::new(tasks),
                config: self.config,
                emitter: self.emitter,
            },
        })
    }
}

/// A task registration: signature, body and optional predicate/fallback.
///
/// Signature elements are recorded in call order; the context must come
/// first and `fallible()` last, as they would in a function signature.
pub struct Task {
    decl: TaskDecl,
    body: Option<TaskBody>,
    predicate: Option<Predicate>,
    fallback: Option<Vec<Value>>,
}

impl Task {
    #[track_caller]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            decl: TaskDecl::new(Signature::new()).named(name),
            body: None,
            predicate: None,
            fallback: None,
        }
    }

    /// Accept the cancellation context (first parameter).
    pub fn context(self) -> Self {
        self.map_signature(Signature::context)
    }

    pub fn input<T: Any + Send + Sync>(self) -> Self {
        self.input_key(TypeKey::of::<T>())
    }

    pub fn input_key(self, key: TypeKey) -> Self {
        self.map_signature(|s| s.param(key))
    }

    pub fn output<T: Any + Send + Sync>(self) -> Self {
        self.output_key(TypeKey::of::<T>())
    }

    pub fn output_key(self, key: TypeKey) -> Self {
        self.map_signature(|s| s.result(key))
    }

    /// Declare the trailing error result. Required for fallback values.
    pub fn fallible(self) -> Self {
        self.map_signature(Signature::error)
    }

    /// Run the task even though it produces nothing.
    pub fn invoke(mut self) -> Self {
        self.decl = self.decl.invoke();
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Value used for the next output, in output order, when the task fails
    /// or panics.
    pub fn fallback<T: Any + Send + Sync>(mut self, value: T) -> Self {
        let keys = self.decl.fallback.get_or_insert_with(Vec::new);
        keys.push(TypeKey::of::<T>());
        self.fallback
            .get_or_insert_with(Vec::new)
            .push(Arc::new(value));
        self
    }

    pub fn run<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.body = Some(Arc::new(move |ctx| -> TaskFuture { Box::pin(body(ctx)) }));
        self
    }

    fn map_signature(mut self, f: impl FnOnce(Signature) -> Signature) -> Self {
        let sig = std::mem::take(&mut self.decl.signature);
        self.decl.signature = f(sig);
        self
    }
}

/// A boolean guard deciding whether its task runs.
pub struct Predicate {
    location: SourceLocation,
    params: Vec<TypeKey>,
    body: Option<PredicateBody>,
}

impl Predicate {
    #[track_caller]
    pub fn new() -> Self {
        Self {
            location: SourceLocation::caller(),
            params: Vec::new(),
            body: None,
        }
    }

    /// Predicates cannot take the context; compiling one that does fails.
    pub fn context(mut self) -> Self {
        self.params.push(TypeKey::context());
        self
    }

    pub fn input<T: Any + Send + Sync>(self) -> Self {
        self.input_key(TypeKey::of::<T>())
    }

    pub fn input_key(mut self, key: TypeKey) -> Self {
        self.params.push(key);
        self
    }

    pub fn check<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.body = Some(Arc::new(move |ctx| -> PredicateFuture { Box::pin(body(ctx)) }));
        self
    }

    fn into_parts(self) -> (PredicateDecl, Option<PredicateBody>) {
        let signature = self
            .params
            .into_iter()
            .fold(Signature::new(), Signature::param)
            .result_of::<bool>();
        (PredicateDecl::new(signature).at(self.location), self.body)
    }
}

impl Default for Predicate {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

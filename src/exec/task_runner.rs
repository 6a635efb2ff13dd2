// src/exec/task_runner.rs

//! Engine jobs for flow tasks and predicates.
//!
//! A task job checks its predicate's verdict, runs the body with panic
//! containment, commits staged outputs on success and falls back to the
//! configured values on failure. A predicate job runs the predicate body
//! and stores its verdict in the predicate's sentinel slot.
//!
//! A faulting predicate fails its own job (skipping the gated task) unless
//! the gated task has fallback values; then the fault is handed to the task,
//! which recovers from it like from its own failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::debug;

use crate::dag::{FlowPlan, TaskDescriptor};
use crate::emit::TaskEmitter;
use crate::engine::guard::catch_panic;
use crate::engine::{Completion, Job, JobContext};
use crate::errors::{PanicError, Result, TaskdagError};
use crate::exec::context::TaskContext;
use crate::exec::store::{Value, ValueStore};
use crate::types::TypeKey;

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type TaskBody = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

pub type PredicateFuture = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>>;
pub type PredicateBody = Arc<dyn Fn(TaskContext) -> PredicateFuture + Send + Sync>;

/// Runtime half of a task registration, indexed by declaration ordinal.
#[derive(Clone)]
pub(crate) struct TaskRuntime {
    pub body: TaskBody,
    pub predicate: Option<PredicateBody>,
    /// One value per output, in output order.
    pub fallback: Option<Vec<Value>>,
}

/// State shared by every job of one flow invocation.
pub(crate) struct Invocation {
    pub plan: Arc<FlowPlan>,
    pub runtimes: Arc<Vec<TaskRuntime>>,
    pub store: Arc<ValueStore>,
    /// Indexed like `plan.tasks()`.
    pub emitters: Vec<Arc<dyn TaskEmitter>>,
    /// Set once a task's outcome has been reported (ran or recovered).
    pub handled: Vec<AtomicBool>,
}

impl Invocation {
    fn task(&self, idx: usize) -> (&TaskDescriptor, &TaskRuntime, &Arc<dyn TaskEmitter>) {
        let desc = &self.plan.tasks()[idx];
        (desc, &self.runtimes[desc.ordinal], &self.emitters[idx])
    }
}

enum Verdict {
    Run,
    Skip,
    Faulted(Fault),
}

enum Fault {
    Error(anyhow::Error),
    Panic(PanicError),
}

enum Outcome {
    Success,
    Error(anyhow::Error),
    Panic(PanicError),
}

pub(crate) fn task_job(inv: &Arc<Invocation>, idx: usize) -> Job {
    let inv = Arc::clone(inv);
    let name = inv.plan.tasks()[idx].name.clone();
    Job::with_completion(move |job| async move { run_task(&inv, idx, job).await }).named(name)
}

pub(crate) fn predicate_job(inv: &Arc<Invocation>, idx: usize) -> Job {
    let inv = Arc::clone(inv);
    let name = format!("{} (predicate)", inv.plan.tasks()[idx].name);
    Job::with_completion(move |job| async move { run_predicate(&inv, idx, job).await }).named(name)
}

async fn run_task(inv: &Invocation, idx: usize, job: JobContext) -> Result<Completion> {
    let (desc, rt, emitter) = inv.task(idx);

    let started = Instant::now();
    if let Some(pred) = &desc.predicate {
        let verdict = inv
            .store
            .get(&pred.sentinel)
            .and_then(|v| v.downcast::<Verdict>().ok())
            .ok_or_else(|| {
                TaskdagError::Scheduler(format!("predicate verdict for task {} is missing", desc.name))
            })?;
        match &*verdict {
            Verdict::Run => {}
            Verdict::Skip => {
                debug!(task = %desc.name, "predicate declined task");
                return Ok(Completion::Skip);
            }
            Verdict::Faulted(fault) => {
                inv.handled[idx].store(true, Ordering::Release);
                commit_fallback(&inv.store, desc, rt)?;
                match fault {
                    Fault::Error(err) => emitter.task_error_recovered(err),
                    Fault::Panic(panic) => emitter.task_panic_recovered(panic),
                }
                emitter.task_done(started.elapsed());
                return Ok(Completion::Done);
            }
        }
    }

    inv.handled[idx].store(true, Ordering::Release);
    let ctx = TaskContext::new(
        Arc::from(desc.name.as_str()),
        desc.inputs.clone().into(),
        desc.outputs.clone().into(),
        Arc::clone(&inv.store),
        job.cancellation().clone(),
    );

    let body = Arc::clone(&rt.body);
    let body_ctx = ctx.clone();
    let outcome = match catch_panic(async move { body(body_ctx).await }).await {
        Ok(Ok(())) => match ctx.take_outputs() {
            Ok(values) => {
                for (key, value) in values {
                    inv.store.set(&key, value)?;
                }
                Outcome::Success
            }
            Err(err) => Outcome::Error(err),
        },
        Ok(Err(err)) => Outcome::Error(err),
        Err(panic) => Outcome::Panic(panic.with_task(desc.name.clone())),
    };

    let completion = settle(inv, idx, outcome);
    emitter.task_done(started.elapsed());
    completion
}

fn settle(inv: &Invocation, idx: usize, outcome: Outcome) -> Result<Completion> {
    let (desc, rt, emitter) = inv.task(idx);
    match outcome {
        Outcome::Success => {
            emitter.task_success();
            Ok(Completion::Done)
        }
        Outcome::Error(err) if rt.fallback.is_some() => {
            commit_fallback(&inv.store, desc, rt)?;
            emitter.task_error_recovered(&err);
            Ok(Completion::Done)
        }
        Outcome::Error(err) => {
            emitter.task_error(&err);
            Err(TaskdagError::Task {
                task: desc.name.clone(),
                source: err,
            })
        }
        Outcome::Panic(panic) if rt.fallback.is_some() => {
            commit_fallback(&inv.store, desc, rt)?;
            emitter.task_panic_recovered(&panic);
            Ok(Completion::Done)
        }
        Outcome::Panic(panic) => {
            emitter.task_panic(&panic);
            Err(TaskdagError::Panic(panic))
        }
    }
}

fn commit_fallback(store: &ValueStore, desc: &TaskDescriptor, rt: &TaskRuntime) -> Result<()> {
    let values = rt.fallback.as_ref().ok_or_else(|| {
        TaskdagError::Scheduler(format!("task {} has no fallback values", desc.name))
    })?;
    for (key, value) in desc.outputs.iter().zip(values) {
        store.set(key, Arc::clone(value))?;
    }
    Ok(())
}

async fn run_predicate(inv: &Invocation, idx: usize, job: JobContext) -> Result<Completion> {
    let (desc, rt, emitter) = inv.task(idx);
    let (Some(pred), Some(body)) = (&desc.predicate, rt.predicate.clone()) else {
        return Err(TaskdagError::Scheduler(format!(
            "task {} has no predicate to evaluate",
            desc.name
        )));
    };

    let no_outputs: Vec<TypeKey> = Vec::new();
    let ctx = TaskContext::new(
        Arc::from(desc.name.as_str()),
        pred.inputs.clone().into(),
        no_outputs.into(),
        Arc::clone(&inv.store),
        job.cancellation().clone(),
    );

    let recoverable = rt.fallback.is_some();
    let verdict = match catch_panic(async move { body(ctx).await }).await {
        Ok(Ok(true)) => Verdict::Run,
        Ok(Ok(false)) => Verdict::Skip,
        Ok(Err(err)) if recoverable => Verdict::Faulted(Fault::Error(err)),
        Ok(Err(err)) => {
            emitter.task_error(&err);
            return Err(TaskdagError::Task {
                task: desc.name.clone(),
                source: err.context("predicate failed"),
            });
        }
        Err(panic) => {
            let panic = panic.with_task(desc.name.clone());
            if recoverable {
                Verdict::Faulted(Fault::Panic(panic))
            } else {
                emitter.task_panic(&panic);
                return Err(TaskdagError::Panic(panic));
            }
        }
    };

    inv.store.set(&pred.sentinel, Arc::new(verdict))?;
    Ok(Completion::Done)
}

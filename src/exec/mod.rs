// src/exec/mod.rs

//! Flow invocation.
//!
//! One call to [`invoke`] creates a fresh [`ValueStore`] and a fresh
//! engine [`Scheduler`], enqueues one job per scheduled node (providers
//! before consumers), runs them and reports lifecycle events.
//!
//! - [`store`] holds the write-once value slots.
//! - [`context`] is what task bodies see.
//! - [`task_runner`] builds the engine jobs for tasks and predicates.

pub mod context;
pub mod store;
pub mod task_runner;

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::dag::{FlowPlan, NodeKind};
use crate::emit::{Emitter, FlowInfo, TaskInfo};
use crate::engine::{JobState, ScheduledJob, Scheduler};
use crate::errors::{Result, TaskdagError};
use crate::types::TypeKey;

pub use context::TaskContext;
pub use store::{Value, ValueStore};
pub use task_runner::{PredicateBody, PredicateFuture, TaskBody, TaskFuture};

pub(crate) use task_runner::TaskRuntime;
use task_runner::{Invocation, predicate_job, task_job};

/// Values supplied for a flow's declared inputs.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: Vec<(TypeKey, Value)>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(self, value: T) -> Self {
        self.with_key(TypeKey::of::<T>(), Arc::new(value))
    }

    pub fn with_key(mut self, key: TypeKey, value: Value) -> Self {
        self.values.push((key, value));
        self
    }
}

/// Values of a flow's declared outputs after a successful invocation.
///
/// An output is absent when its provider was skipped by a false predicate.
#[derive(Debug)]
pub struct FlowResults {
    store: Arc<ValueStore>,
    outputs: Vec<TypeKey>,
}

impl FlowResults {
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get_key(&TypeKey::of::<T>())?.downcast::<T>().ok()
    }

    pub fn get_key(&self, key: &TypeKey) -> Option<Value> {
        if !self.outputs.contains(key) {
            return None;
        }
        self.store.get(key)
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.outputs.contains(key) && self.store.contains(key)
    }
}

/// Everything a compiled flow needs to run, shared across invocations.
#[derive(Clone)]
pub(crate) struct FlowRuntime {
    pub plan: Arc<FlowPlan>,
    pub tasks: Arc<Vec<TaskRuntime>>,
    pub config: SchedulerConfig,
    pub emitter: Arc<dyn Emitter>,
}

pub(crate) async fn invoke(
    flow: &FlowRuntime,
    inputs: Inputs,
    ctx: &CancellationToken,
) -> Result<FlowResults> {
    let info = FlowInfo {
        name: flow.plan.name().to_string(),
        location: flow.plan.graph().location,
    };
    let flow_emitter = flow.emitter.flow_init(&info);
    let started = Instant::now();

    let result = execute(flow, &info, inputs, ctx).await;

    match &result {
        Ok(_) => flow_emitter.flow_success(),
        Err(err) => flow_emitter.flow_error(err),
    }
    flow_emitter.flow_done(started.elapsed());
    result
}

async fn execute(
    flow: &FlowRuntime,
    info: &FlowInfo,
    inputs: Inputs,
    ctx: &CancellationToken,
) -> Result<FlowResults> {
    let plan = &flow.plan;
    let store = Arc::new(ValueStore::for_plan(plan));
    seed_inputs(plan, &store, inputs)?;

    let emitters = plan
        .tasks()
        .iter()
        .map(|t| {
            let task = TaskInfo {
                name: t.name.clone(),
                location: t.location,
            };
            flow.emitter.task_init(&task, info)
        })
        .collect();
    let handled = plan.tasks().iter().map(|_| AtomicBool::new(false)).collect();

    let inv = Arc::new(Invocation {
        plan: Arc::clone(plan),
        runtimes: Arc::clone(&flow.tasks),
        store: Arc::clone(&store),
        emitters,
        handled,
    });

    let mut scheduler = Scheduler::new(flow.config);
    if let Some(state_emitter) = flow.emitter.scheduler_init(info) {
        scheduler = scheduler.with_emitter(state_emitter);
    }

    let graph = plan.graph();
    let mut node_jobs: Vec<Option<ScheduledJob>> = vec![None; graph.nodes.len()];
    let mut task_jobs: Vec<Option<ScheduledJob>> = vec![None; graph.tasks.len()];

    for id in plan.enqueue_order() {
        let deps: Vec<ScheduledJob> = graph
            .dependency_nodes(id)
            .into_iter()
            .filter_map(|dep| node_jobs[dep.index()])
            .collect();

        let (job, task) = match graph.node(id).kind {
            NodeKind::Task { task } => (task_job(&inv, task), Some(task)),
            NodeKind::Predicate { task } => (predicate_job(&inv, task), None),
        };
        let handle = scheduler.enqueue(job.with_dependencies(deps))?;
        node_jobs[id.index()] = Some(handle);
        if let Some(task) = task {
            task_jobs[task] = Some(handle);
        }
    }

    info!(flow = %info.name, jobs = scheduler.len(), "running flow");
    let report = scheduler.run(ctx).await;

    for (idx, job) in task_jobs.iter().enumerate() {
        if inv.handled[idx].load(Ordering::Acquire) {
            continue;
        }
        if let Some(JobState::Skipped(cause)) = job.and_then(|j| report.state_of(j)) {
            inv.emitters[idx].task_skipped(cause);
        }
    }

    report.into_result()?;
    debug!(flow = %info.name, "flow outputs ready");

    Ok(FlowResults {
        store,
        outputs: graph.outputs.iter().map(|d| d.key.clone()).collect(),
    })
}

fn seed_inputs(plan: &FlowPlan, store: &ValueStore, inputs: Inputs) -> Result<()> {
    let graph = plan.graph();
    for (key, value) in inputs.values {
        if !graph.is_flow_input(&key) {
            return Err(TaskdagError::Inputs(format!(
                "{key} is not a declared input of flow {}",
                plan.name()
            )));
        }
        if store.contains(&key) {
            return Err(TaskdagError::Inputs(format!("{key} supplied more than once")));
        }
        store.set(&key, value)?;
    }
    for declared in &graph.inputs {
        if !store.contains(&declared.key) {
            return Err(TaskdagError::Inputs(format!(
                "missing value for {}",
                declared.key
            )));
        }
    }
    Ok(())
}

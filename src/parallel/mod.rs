// src/parallel/mod.rs

//! Independent tasks run side by side.
//!
//! ```ignore
//! Parallel::builder("warm caches")
//!     .task(ParallelTask::new("users").run(|ctx| async move { warm_users(&ctx).await }))
//!     .slice(Slice::new("shards", shards, |_ctx, idx, shard| async move {
//!         warm_shard(idx, shard).await
//!     }))
//!     .concurrency(4)
//!     .continue_on_error(true)
//!     .build()?
//!     .run(&token)
//!     .await?;
//! ```
//!
//! Nothing inside a [`Parallel`] depends on anything else, except that the
//! end function of a [`Slice`] or [`Map`] waits for every element. By default
//! the first failure stops jobs that have not started yet. With
//! `continue_on_error` every job runs and all failures come back together as
//! [`TaskdagError::Multiple`]. End functions need every element to succeed, so
//! they cannot be combined with `continue_on_error`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::emit::{Emitter, FlowInfo, NopEmitter, TaskEmitter, TaskInfo};
use crate::engine::guard::catch_panic;
use crate::engine::{Job, JobContext, JobState, ScheduledJob, Scheduler};
use crate::errors::{CompileErrorKind, CompileErrors, Result, TaskdagError};
use crate::types::SourceLocation;

type UnitBody = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

fn boxed_body<F, Fut>(body: F) -> UnitBody
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |ctx: JobContext| -> BoxFuture<'static, anyhow::Result<()>> {
        body(ctx).boxed()
    })
}

/// A single independent task.
pub struct ParallelTask {
    name: String,
    location: SourceLocation,
    body: Option<UnitBody>,
}

impl ParallelTask {
    #[track_caller]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: SourceLocation::caller(),
            body: None,
        }
    }

    pub fn run<F, Fut>(mut self, body: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.body = Some(boxed_body(body));
        self
    }
}

struct FanOut {
    kind: &'static str,
    name: String,
    location: SourceLocation,
    items: Vec<UnitBody>,
    end: Option<UnitBody>,
}

/// One job per element of a sequence.
pub struct Slice(FanOut);

impl Slice {
    /// `body` receives each element with its index.
    #[track_caller]
    pub fn new<T, I, F, Fut>(name: impl Into<String>, items: I, body: F) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        F: Fn(JobContext, usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let location = SourceLocation::caller();
        let body = Arc::new(body);
        let items = items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let body = Arc::clone(&body);
                boxed_body(move |ctx| body(ctx, idx, item))
            })
            .collect();
        Self(FanOut {
            kind: "slice",
            name: name.into(),
            location,
            items,
            end: None,
        })
    }

    /// Run `end` once every element has been processed successfully.
    pub fn end<F, Fut>(mut self, end: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.0.end = Some(boxed_body(end));
        self
    }
}

/// One job per key/value pair.
pub struct Map(FanOut);

impl Map {
    #[track_caller]
    pub fn new<K, V, I, F, Fut>(name: impl Into<String>, entries: I, body: F) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Send + 'static,
        V: Send + 'static,
        F: Fn(JobContext, K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let location = SourceLocation::caller();
        let body = Arc::new(body);
        let items = entries
            .into_iter()
            .map(|(key, value)| {
                let body = Arc::clone(&body);
                boxed_body(move |ctx| body(ctx, key, value))
            })
            .collect();
        Self(FanOut {
            kind: "map",
            name: name.into(),
            location,
            items,
            end: None,
        })
    }

    /// Run `end` once every entry has been processed successfully.
    pub fn end<F, Fut>(mut self, end: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.0.end = Some(boxed_body(end));
        self
    }
}

enum Unit {
    Task(ParallelTask),
    FanOut(FanOut),
}

/// A validated set of independent units, run once.
pub struct Parallel {
    name: String,
    location: SourceLocation,
    units: Vec<Unit>,
    config: SchedulerConfig,
    emitter: Arc<dyn Emitter>,
}

pub struct ParallelBuilder {
    name: String,
    location: SourceLocation,
    units: Vec<Unit>,
    config: SchedulerConfig,
    emitter: Arc<dyn Emitter>,
}

impl Parallel {
    #[track_caller]
    pub fn builder(name: impl Into<String>) -> ParallelBuilder {
        ParallelBuilder {
            name: name.into(),
            location: SourceLocation::caller(),
            units: Vec::new(),
            config: SchedulerConfig::default(),
            emitter: Arc::new(NopEmitter),
        }
    }

    /// Run every unit and report the outcome.
    ///
    /// Lifecycle events go through the flow hooks of the emitter, with one
    /// task emitter per task, slice or map.
    pub async fn run(self, ctx: &CancellationToken) -> Result<()> {
        let info = FlowInfo {
            name: self.name.clone(),
            location: self.location,
        };
        let flow_emitter = self.emitter.flow_init(&info);
        let started = Instant::now();

        let result = self.execute(&info, ctx).await;

        match &result {
            Ok(()) => flow_emitter.flow_success(),
            Err(err) => flow_emitter.flow_error(err),
        }
        flow_emitter.flow_done(started.elapsed());
        result
    }

    async fn execute(self, info: &FlowInfo, ctx: &CancellationToken) -> Result<()> {
        let mut scheduler = Scheduler::new(self.config);
        if let Some(state_emitter) = self.emitter.scheduler_init(info) {
            scheduler = scheduler.with_emitter(state_emitter);
        }

        let mut enqueued: Vec<Enqueued> = Vec::with_capacity(self.units.len());
        for unit in self.units {
            match unit {
                Unit::Task(task) => {
                    let emitter = self.emitter.task_init(
                        &TaskInfo {
                            name: task.name.clone(),
                            location: task.location,
                        },
                        info,
                    );
                    let Some(body) = task.body else {
                        return Err(TaskdagError::Scheduler(format!(
                            "task {} has no body",
                            task.name
                        )));
                    };
                    let job = unit_job(task.name, body, Arc::clone(&emitter), true);
                    let handle = scheduler.enqueue(job)?;
                    enqueued.push(Enqueued {
                        emitter,
                        jobs: vec![handle],
                        fan_out: false,
                    });
                }
                Unit::FanOut(fan) => {
                    let emitter = self.emitter.task_init(
                        &TaskInfo {
                            name: fan.name.clone(),
                            location: fan.location,
                        },
                        info,
                    );
                    let mut jobs = Vec::with_capacity(fan.items.len() + 1);
                    for (idx, body) in fan.items.into_iter().enumerate() {
                        let label = format!("{}[{idx}]", fan.name);
                        jobs.push(scheduler.enqueue(unit_job(
                            label,
                            body,
                            Arc::clone(&emitter),
                            false,
                        ))?);
                    }
                    if let Some(end) = fan.end {
                        let label = format!("{} (end)", fan.name);
                        let job = unit_job(label, end, Arc::clone(&emitter), false)
                            .with_dependencies(jobs.clone());
                        jobs.push(scheduler.enqueue(job)?);
                    }
                    enqueued.push(Enqueued {
                        emitter,
                        jobs,
                        fan_out: true,
                    });
                }
            }
        }

        info!(parallel = %info.name, jobs = scheduler.len(), "running parallel");
        let report = scheduler.run(ctx).await;

        for unit in &enqueued {
            let states: Vec<JobState> = unit
                .jobs
                .iter()
                .filter_map(|job| report.state_of(*job))
                .collect();
            let skipped = states.iter().find_map(|state| match state {
                JobState::Skipped(cause) => Some(*cause),
                _ => None,
            });
            match skipped {
                Some(cause) if !states.contains(&JobState::Failed) => {
                    unit.emitter.task_skipped(cause);
                }
                None if unit.fan_out && states.iter().all(|s| *s == JobState::Succeeded) => {
                    unit.emitter.task_success();
                    unit.emitter.task_done(report.elapsed());
                }
                _ => {}
            }
        }

        let continue_on_error = self.config.continue_on_error;
        let mut errors = report.into_errors();
        match errors.len() {
            0 => Ok(()),
            n if n > 1 && continue_on_error => Err(TaskdagError::Multiple(errors)),
            _ => Err(errors.remove(0)),
        }
    }
}

struct Enqueued {
    emitter: Arc<dyn TaskEmitter>,
    jobs: Vec<ScheduledJob>,
    fan_out: bool,
}

/// Engine job for one unit body. Fan-out elements only report failures;
/// the fan-out as a whole is reported once the run is over.
fn unit_job(
    label: String,
    body: UnitBody,
    emitter: Arc<dyn TaskEmitter>,
    reports_success: bool,
) -> Job {
    let task = label.clone();
    Job::new(move |ctx| async move {
        let started = Instant::now();
        let result = match catch_panic(async move { body(ctx).await }).await {
            Ok(Ok(())) => {
                if reports_success {
                    emitter.task_success();
                }
                Ok(())
            }
            Ok(Err(err)) => {
                emitter.task_error(&err);
                Err(TaskdagError::Task { task, source: err })
            }
            Err(panic) => {
                let panic = panic.with_task(task);
                emitter.task_panic(&panic);
                Err(TaskdagError::Panic(panic))
            }
        };
        if reports_success {
            emitter.task_done(started.elapsed());
        }
        result
    })
    .named(label)
}

impl ParallelBuilder {
    pub fn task(mut self, task: ParallelTask) -> Self {
        self.units.push(Unit::Task(task));
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = ParallelTask>) -> Self {
        self.units.extend(tasks.into_iter().map(Unit::Task));
        self
    }

    pub fn slice(mut self, slice: Slice) -> Self {
        self.units.push(Unit::FanOut(slice.0));
        self
    }

    pub fn map(mut self, map: Map) -> Self {
        self.units.push(Unit::FanOut(map.0));
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Limit concurrently running jobs; `0` lifts the limit.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.config = self.config.with_concurrency(limit);
        self
    }

    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.config = self.config.with_continue_on_error(enabled);
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn Emitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Check the directive. Every problem found is reported at once.
    pub fn build(self) -> Result<Parallel> {
        let mut problems = CompileErrors::new();

        if self.units.is_empty() {
            problems.report(
                self.location,
                CompileErrorKind::InvalidOption,
                "parallel needs at least one task, slice or map",
            );
        }
        for unit in &self.units {
            match unit {
                Unit::Task(task) if task.body.is_none() => problems.report(
                    task.location,
                    CompileErrorKind::InvalidSignature,
                    "task has no body; call run() to provide one",
                ),
                Unit::FanOut(fan) if fan.end.is_some() && self.config.continue_on_error => {
                    problems.report(
                        fan.location,
                        CompileErrorKind::InvalidOption,
                        format!(
                            "{} end function cannot be used with continue_on_error",
                            fan.kind
                        ),
                    )
                }
                _ => {}
            }
        }
        problems.into_result()?;

        Ok(Parallel {
            name: self.name,
            location: self.location,
            units: self.units,
            config: self.config,
            emitter: self.emitter,
        })
    }
}

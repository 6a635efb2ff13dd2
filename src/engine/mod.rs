// src/engine/mod.rs

//! Concurrent DAG execution engine.
//!
//! Jobs are enqueued one by one with handles to the jobs they depend on and
//! then run by [`Scheduler::run`] / [`Scheduler::wait`] on a bounded set of
//! Tokio tasks.
//!
//! The pure bookkeeping state machine (readiness counts, skip propagation,
//! halting) lives in [`core`]; the async shell that spawns job bodies and
//! reacts to their completion lives in [`runtime`]. Panic containment at the
//! job boundary is in [`guard`].

pub mod core;
pub mod guard;
pub mod runtime;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::errors::Result;

pub use self::core::{CoreScheduler, JobOutcome, SchedulerState};
pub use runtime::{RunReport, Scheduler};

/// Future returned by a job body.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<Completion>> + Send + 'static>>;

pub(crate) type JobFn = Box<dyn FnOnce(JobContext) -> JobFuture + Send + 'static>;

/// How a job body finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    /// The job declined to do its work (e.g. its predicate was false).
    /// Dependents are skipped; this is not an error.
    Skip,
}

/// Handle to an enqueued job, only meaningful to the scheduler that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduledJob {
    scheduler: u64,
    index: usize,
}

impl ScheduledJob {
    pub(crate) fn new(scheduler: u64, index: usize) -> Self {
        Self { scheduler, index }
    }

    /// Position of the job in enqueue order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn scheduler(&self) -> u64 {
        self.scheduler
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped(SkipCause),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Skipped(_)
        )
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobState::Skipped(_))
    }
}

/// Why a job never ran its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    /// The job itself returned [`Completion::Skip`].
    Declined,
    /// A dependency declined, directly or transitively.
    DependencyDeclined,
    /// A dependency failed.
    DependencyFailed,
    /// Another job failed and dispatch was halted.
    FlowFailed,
    /// The run was cancelled before the job started.
    Cancelled,
}

impl SkipCause {
    /// Skips that do not stem from an error.
    pub fn is_clean(&self) -> bool {
        matches!(self, SkipCause::Declined | SkipCause::DependencyDeclined)
    }

    /// Cause inherited by the dependents of a job skipped for `self`.
    pub(crate) fn inherited(self) -> SkipCause {
        match self {
            SkipCause::Declined | SkipCause::DependencyDeclined => SkipCause::DependencyDeclined,
            other => other,
        }
    }
}

/// Per-job view handed to the body.
#[derive(Debug, Clone)]
pub struct JobContext {
    job: ScheduledJob,
    cancellation: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job: ScheduledJob, cancellation: CancellationToken) -> Self {
        Self { job, cancellation }
    }

    pub fn job(&self) -> ScheduledJob {
        self.job
    }

    /// Child of the run's token; cancelled when the run is.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// A single-shot unit of work plus the jobs it waits for.
pub struct Job {
    pub(crate) name: Option<String>,
    pub(crate) run: JobFn,
    pub(crate) dependencies: Vec<ScheduledJob>,
}

impl Job {
    /// Job whose body either succeeds or fails.
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_completion(move |ctx| {
            let fut = run(ctx);
            async move { fut.await.map(|()| Completion::Done) }
        })
    }

    /// Job whose body may also decline with [`Completion::Skip`].
    pub fn with_completion<F, Fut>(run: F) -> Self
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Completion>> + Send + 'static,
    {
        Self {
            name: None,
            run: Box::new(move |ctx| -> JobFuture { Box::pin(run(ctx)) }),
            dependencies: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn after(mut self, dependency: ScheduledJob) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = ScheduledJob>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn dependencies(&self) -> &[ScheduledJob] {
        &self.dependencies
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

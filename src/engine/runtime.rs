// src/engine/runtime.rs

//! Async shell around [`CoreScheduler`].
//!
//! [`Scheduler`] owns the job bodies and a [`JoinSet`] of running jobs. Its
//! loop dispatches whatever the core says is ready, then waits for the first
//! of: a job finishing, the caller's cancellation, or a state-sampling tick.
//! All bookkeeping decisions are delegated to the core.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::emit::SchedulerEmitter;
use crate::engine::core::{CoreScheduler, JobOutcome};
use crate::engine::guard::catch_panic;
use crate::engine::{Completion, Job, JobContext, JobFn, JobState, ScheduledJob, SkipCause};
use crate::errors::{PanicError, Result, TaskdagError};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

type JobResult = std::result::Result<Result<Completion>, PanicError>;

/// Collects jobs, then runs them once.
pub struct Scheduler {
    id: u64,
    core: CoreScheduler,
    bodies: Vec<Option<JobFn>>,
    names: Vec<Option<String>>,
    config: SchedulerConfig,
    emitter: Option<Arc<dyn SchedulerEmitter>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            core: CoreScheduler::new(config.concurrency, config.continue_on_error),
            bodies: Vec::new(),
            names: Vec::new(),
            config,
            emitter: None,
        }
    }

    /// Sample [`crate::engine::SchedulerState`] every
    /// `state_flush_frequency` while running.
    pub fn with_emitter(mut self, emitter: Arc<dyn SchedulerEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }

    /// Record a job. Nothing runs until [`Scheduler::run`] or [`Scheduler::wait`].
    ///
    /// Dependencies must be handles previously returned by this scheduler.
    pub fn enqueue(&mut self, job: Job) -> Result<ScheduledJob> {
        let mut deps = Vec::with_capacity(job.dependencies.len());
        for dep in &job.dependencies {
            if dep.scheduler() != self.id {
                return Err(TaskdagError::Scheduler(
                    "dependency handle was issued by a different scheduler".to_string(),
                ));
            }
            deps.push(dep.index());
        }

        let idx = self.core.add_job(&deps)?;
        self.bodies.push(Some(job.run));
        self.names.push(job.name);
        debug!(job = %self.label(idx), deps = ?deps, "job enqueued");
        Ok(ScheduledJob::new(self.id, idx))
    }

    /// Run every job and return the first error, if any.
    pub async fn wait(self, ctx: &CancellationToken) -> Result<()> {
        self.run(ctx).await.into_result()
    }

    /// Run every job to a terminal state and report on each of them.
    pub async fn run(mut self, ctx: &CancellationToken) -> RunReport {
        let started = Instant::now();
        info!(
            jobs = self.core.len(),
            concurrency = ?self.config.concurrency,
            continue_on_error = self.config.continue_on_error,
            "scheduler starting"
        );

        let mut running: JoinSet<JobResult> = JoinSet::new();
        let mut in_flight: HashMap<Id, usize> = HashMap::new();
        let mut errors: Vec<TaskdagError> = Vec::new();
        let mut cancelled = false;
        let mut ticker = self.emitter.as_ref().map(|_| {
            let period = self.config.state_flush_frequency.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            if !cancelled && ctx.is_cancelled() {
                cancelled = true;
                warn!(running = self.core.running(), "run cancelled; no further jobs will start");
                self.core.halt(SkipCause::Cancelled);
            }

            while let Some(idx) = self.core.next_dispatch() {
                self.dispatch(idx, ctx, &mut running, &mut in_flight);
            }

            if self.core.is_finished() {
                break;
            }

            if running.is_empty() {
                error!("no runnable jobs remain but the run is not finished");
                errors.push(TaskdagError::Scheduler(
                    "no runnable jobs remain".to_string(),
                ));
                self.core.halt(SkipCause::FlowFailed);
                continue;
            }

            tokio::select! {
                biased;

                // Picked up at the top of the loop.
                _ = ctx.cancelled(), if !cancelled => {}

                joined = running.join_next_with_id() => {
                    if let Some(joined) = joined {
                        self.on_joined(joined, &mut in_flight, &mut errors);
                    }
                }

                _ = tick(&mut ticker) => {
                    if let Some(emitter) = &self.emitter {
                        emitter.emit_state(self.core.snapshot());
                    }
                }
            }
        }

        if errors.is_empty() && (cancelled || ctx.is_cancelled()) {
            errors.push(TaskdagError::Cancelled);
        }

        let elapsed = started.elapsed();
        match errors.first() {
            None => info!(?elapsed, "scheduler finished"),
            Some(err) => warn!(?elapsed, error = %err, failures = errors.len(), "scheduler finished with errors"),
        }

        RunReport {
            scheduler: self.id,
            states: self.core.states(),
            errors,
            elapsed,
        }
    }

    fn dispatch(
        &mut self,
        idx: usize,
        ctx: &CancellationToken,
        running: &mut JoinSet<JobResult>,
        in_flight: &mut HashMap<Id, usize>,
    ) {
        let Some(body) = self.bodies.get_mut(idx).and_then(Option::take) else {
            error!(job = %self.label(idx), "job body missing at dispatch");
            self.core.complete(idx, JobOutcome::Failed);
            return;
        };

        debug!(job = %self.label(idx), "dispatching job");
        let job_ctx = JobContext::new(ScheduledJob::new(self.id, idx), ctx.child_token());
        // The body is invoked inside the guard so a panic while building the
        // future is contained too.
        let handle = running.spawn(catch_panic(async move { body(job_ctx).await }));
        in_flight.insert(handle.id(), idx);
    }

    fn on_joined(
        &mut self,
        joined: std::result::Result<(Id, JobResult), JoinError>,
        in_flight: &mut HashMap<Id, usize>,
        errors: &mut Vec<TaskdagError>,
    ) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, Ok(result)),
            Err(join_err) => (join_err.id(), Err(join_err)),
        };
        let Some(idx) = in_flight.remove(&id) else {
            warn!(task_id = %id, "completion for unknown job ignored");
            return;
        };
        let job = self.label(idx);

        match result {
            Ok(Ok(Ok(Completion::Done))) => {
                debug!(job = %job, "job succeeded");
                self.core.complete(idx, JobOutcome::Succeeded);
            }
            Ok(Ok(Ok(Completion::Skip))) => {
                debug!(job = %job, "job declined");
                self.core.complete(idx, JobOutcome::Declined);
            }
            Ok(Ok(Err(err))) => {
                warn!(job = %job, error = %err, "job failed");
                self.core.complete(idx, JobOutcome::Failed);
                errors.push(err);
            }
            Ok(Err(panic)) => {
                error!(job = %job, panic = %panic.message(), "job panicked");
                self.core.complete(idx, JobOutcome::Failed);
                errors.push(TaskdagError::Panic(panic));
            }
            Err(join_err) => {
                error!(job = %job, error = %join_err, "job exited unexpectedly");
                self.core.complete(idx, JobOutcome::Failed);
                errors.push(TaskdagError::JobLost(format!("{job}: {join_err}")));
            }
        }
    }

    fn label(&self, idx: usize) -> String {
        match self.names.get(idx).and_then(Option::as_deref) {
            Some(name) => name.to_string(),
            None => format!("#{idx}"),
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Terminal state of every job of one run, plus the errors observed.
#[derive(Debug)]
pub struct RunReport {
    scheduler: u64,
    states: Vec<JobState>,
    errors: Vec<TaskdagError>,
    elapsed: Duration,
}

impl RunReport {
    pub fn state_of(&self, job: ScheduledJob) -> Option<JobState> {
        if job.scheduler() != self.scheduler {
            return None;
        }
        self.states.get(job.index()).copied()
    }

    pub fn states(&self) -> &[JobState] {
        &self.states
    }

    /// Errors in completion order. The first one is the run's result.
    pub fn errors(&self) -> &[TaskdagError] {
        &self.errors
    }

    pub fn first_error(&self) -> Option<&TaskdagError> {
        self.errors.first()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn into_errors(self) -> Vec<TaskdagError> {
        self.errors
    }

    pub fn into_result(self) -> Result<()> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

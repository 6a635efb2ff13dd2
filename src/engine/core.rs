// src/engine/core.rs

//! Pure job bookkeeping state machine.
//!
//! [`CoreScheduler`] knows nothing about futures or Tokio. It tracks, per
//! job, how many dependencies are still outstanding and which jobs consume
//! it; it hands out dispatchable jobs in readiness order, respects the
//! concurrency limit, propagates skips to dependents, and halts dispatch on
//! failure (unless continuing on error) or cancellation.
//!
//! The async shell (`engine::runtime::Scheduler`) drives it. Because it is
//! synchronous and deterministic it can be exercised directly in tests.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use tracing::debug;

use crate::engine::{JobState, SkipCause};
use crate::errors::{Result, TaskdagError};

/// Result of a job body as far as bookkeeping is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Declined,
    Failed,
}

/// Counters sampled periodically for scheduler emitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerState {
    /// Jobs that have not reached a terminal state, running ones included.
    pub pending: usize,
    /// Jobs whose dependencies are done, waiting for a worker.
    pub ready: usize,
    /// Jobs still waiting on dependencies.
    pub waiting: usize,
    /// Free worker slots; `None` when concurrency is unbounded.
    pub idle_workers: Option<usize>,
    /// Configured limit; `None` when unbounded.
    pub concurrency: Option<usize>,
}

#[derive(Debug)]
struct JobEntry {
    consumers: Vec<usize>,
    remaining: usize,
    state: JobState,
    /// Set once any dependency ends without succeeding.
    blocked: Option<SkipCause>,
}

#[derive(Debug)]
pub struct CoreScheduler {
    jobs: Vec<JobEntry>,
    ready: VecDeque<usize>,
    running: usize,
    open: usize,
    concurrency: Option<NonZeroUsize>,
    continue_on_error: bool,
    halted: Option<SkipCause>,
}

impl CoreScheduler {
    pub fn new(concurrency: Option<NonZeroUsize>, continue_on_error: bool) -> Self {
        Self {
            jobs: Vec::new(),
            ready: VecDeque::new(),
            running: 0,
            open: 0,
            concurrency,
            continue_on_error,
            halted: None,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Record a job depending on earlier jobs (by index). Returns its index.
    pub fn add_job(&mut self, deps: &[usize]) -> Result<usize> {
        let idx = self.jobs.len();
        let mut entry = JobEntry {
            consumers: Vec::new(),
            remaining: 0,
            state: JobState::Pending,
            blocked: None,
        };

        for &dep in deps {
            let Some(dep_entry) = self.jobs.get_mut(dep) else {
                return Err(TaskdagError::Scheduler(format!(
                    "job {idx} depends on job {dep}, which was not enqueued before it"
                )));
            };
            match dep_entry.state {
                JobState::Succeeded => {}
                JobState::Failed => {
                    entry.blocked.get_or_insert(SkipCause::DependencyFailed);
                }
                JobState::Skipped(cause) => {
                    entry.blocked.get_or_insert(cause.inherited());
                }
                JobState::Pending | JobState::Running => {
                    entry.remaining += 1;
                    dep_entry.consumers.push(idx);
                }
            }
        }

        if let Some(cause) = self.halted {
            entry.state = JobState::Skipped(entry.blocked.unwrap_or(cause));
            self.jobs.push(entry);
            return Ok(idx);
        }

        let ready = entry.remaining == 0;
        self.jobs.push(entry);
        self.open += 1;
        if ready {
            self.ready.push_back(idx);
        }
        Ok(idx)
    }

    /// Next job to start, if the limit allows and one is ready.
    ///
    /// Ready jobs with a blocked dependency are skipped (and their skip
    /// propagated) on the way.
    pub fn next_dispatch(&mut self) -> Option<usize> {
        if self.halted.is_some() {
            return None;
        }
        if let Some(limit) = self.concurrency {
            if self.running >= limit.get() {
                return None;
            }
        }

        while let Some(idx) = self.ready.pop_front() {
            if let Some(cause) = self.jobs[idx].blocked {
                debug!(job = idx, ?cause, "skipping job");
                self.finish(idx, JobState::Skipped(cause));
                continue;
            }
            self.jobs[idx].state = JobState::Running;
            self.running += 1;
            return Some(idx);
        }
        None
    }

    /// Record the outcome of a running job.
    pub fn complete(&mut self, idx: usize, outcome: JobOutcome) {
        match self.jobs.get(idx) {
            Some(entry) if entry.state == JobState::Running => {}
            _ => return,
        }
        self.running -= 1;

        let state = match outcome {
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Declined => JobState::Skipped(SkipCause::Declined),
            JobOutcome::Failed => JobState::Failed,
        };
        self.finish(idx, state);

        if outcome == JobOutcome::Failed && !self.continue_on_error {
            self.halt(SkipCause::FlowFailed);
        }
    }

    /// Stop dispatching and skip every job that has not started.
    pub fn halt(&mut self, cause: SkipCause) {
        if self.halted.is_some() {
            return;
        }
        debug!(?cause, "halting dispatch");
        self.halted = Some(cause);
        self.ready.clear();
        for entry in self.jobs.iter_mut() {
            if entry.state == JobState::Pending {
                entry.state = JobState::Skipped(entry.blocked.unwrap_or(cause));
                self.open -= 1;
            }
        }
    }

    /// Every job is terminal.
    pub fn is_finished(&self) -> bool {
        self.open == 0
    }

    pub fn state_of(&self, idx: usize) -> Option<JobState> {
        self.jobs.get(idx).map(|e| e.state)
    }

    pub fn states(&self) -> Vec<JobState> {
        self.jobs.iter().map(|e| e.state).collect()
    }

    pub fn snapshot(&self) -> SchedulerState {
        let waiting = self
            .jobs
            .iter()
            .filter(|e| e.state == JobState::Pending && e.remaining > 0)
            .count();
        SchedulerState {
            pending: self.open,
            ready: self.ready.len(),
            waiting,
            idle_workers: self
                .concurrency
                .map(|c| c.get().saturating_sub(self.running)),
            concurrency: self.concurrency.map(NonZeroUsize::get),
        }
    }

    fn finish(&mut self, idx: usize, state: JobState) {
        self.jobs[idx].state = state;
        self.open -= 1;

        let inherited = match state {
            JobState::Succeeded => None,
            JobState::Failed => Some(SkipCause::DependencyFailed),
            JobState::Skipped(cause) => Some(cause.inherited()),
            JobState::Pending | JobState::Running => None,
        };

        let consumers = std::mem::take(&mut self.jobs[idx].consumers);
        for consumer in consumers {
            let entry = &mut self.jobs[consumer];
            if let Some(cause) = inherited {
                entry.blocked.get_or_insert(cause);
            }
            entry.remaining -= 1;
            if entry.remaining == 0 && entry.state == JobState::Pending {
                self.ready.push_back(consumer);
            }
        }
    }
}

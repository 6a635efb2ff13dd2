// src/emit/mod.rs

//! Lifecycle event sinks.
//!
//! The flow runtime reports flow, task and scheduler events through these
//! traits and ignores whatever the implementation does with them. Every
//! hook has a no-op default so sinks only implement what they care about.
//!
//! - [`NopEmitter`] discards everything.
//! - [`LogEmitter`] turns events into `tracing` records.
//! - [`EmitterStack`] fans events out to several emitters.

mod log;

use std::sync::Arc;
use std::time::Duration;

use crate::engine::{SchedulerState, SkipCause};
use crate::errors::{PanicError, TaskdagError};
use crate::types::SourceLocation;

pub use self::log::LogEmitter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowInfo {
    pub name: String,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: String,
    pub location: SourceLocation,
}

/// Factory for per-flow, per-task and scheduler sinks. Called once per
/// flow invocation.
pub trait Emitter: Send + Sync {
    fn flow_init(&self, flow: &FlowInfo) -> Arc<dyn FlowEmitter>;

    fn task_init(&self, task: &TaskInfo, flow: &FlowInfo) -> Arc<dyn TaskEmitter>;

    /// `None` disables periodic state sampling.
    fn scheduler_init(&self, _flow: &FlowInfo) -> Option<Arc<dyn SchedulerEmitter>> {
        None
    }
}

pub trait FlowEmitter: Send + Sync {
    fn flow_success(&self) {}
    fn flow_error(&self, _error: &TaskdagError) {}
    fn flow_done(&self, _elapsed: Duration) {}
}

pub trait TaskEmitter: Send + Sync {
    fn task_success(&self) {}
    fn task_error(&self, _error: &anyhow::Error) {}
    fn task_error_recovered(&self, _error: &anyhow::Error) {}
    fn task_skipped(&self, _cause: SkipCause) {}
    fn task_panic(&self, _panic: &PanicError) {}
    fn task_panic_recovered(&self, _panic: &PanicError) {}
    /// Only reported for tasks whose body actually ran.
    fn task_done(&self, _elapsed: Duration) {}
}

pub trait SchedulerEmitter: Send + Sync {
    fn emit_state(&self, state: SchedulerState);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NopEmitter;

impl Emitter for NopEmitter {
    fn flow_init(&self, _flow: &FlowInfo) -> Arc<dyn FlowEmitter> {
        Arc::new(NopEmitter)
    }

    fn task_init(&self, _task: &TaskInfo, _flow: &FlowInfo) -> Arc<dyn TaskEmitter> {
        Arc::new(NopEmitter)
    }
}

impl FlowEmitter for NopEmitter {}
impl TaskEmitter for NopEmitter {}

impl SchedulerEmitter for NopEmitter {
    fn emit_state(&self, _state: SchedulerState) {}
}

/// Forwards every event to each inner emitter, in order.
#[derive(Clone, Default)]
pub struct EmitterStack {
    emitters: Vec<Arc<dyn Emitter>>,
}

impl EmitterStack {
    pub fn new(emitters: Vec<Arc<dyn Emitter>>) -> Self {
        Self { emitters }
    }

    pub fn push(&mut self, emitter: Arc<dyn Emitter>) {
        self.emitters.push(emitter);
    }
}

impl Emitter for EmitterStack {
    fn flow_init(&self, flow: &FlowInfo) -> Arc<dyn FlowEmitter> {
        Arc::new(FlowFanOut(
            self.emitters.iter().map(|e| e.flow_init(flow)).collect(),
        ))
    }

    fn task_init(&self, task: &TaskInfo, flow: &FlowInfo) -> Arc<dyn TaskEmitter> {
        Arc::new(TaskFanOut(
            self.emitters.iter().map(|e| e.task_init(task, flow)).collect(),
        ))
    }

    fn scheduler_init(&self, flow: &FlowInfo) -> Option<Arc<dyn SchedulerEmitter>> {
        let inner: Vec<_> = self
            .emitters
            .iter()
            .filter_map(|e| e.scheduler_init(flow))
            .collect();
        if inner.is_empty() {
            None
        } else {
            Some(Arc::new(SchedulerFanOut(inner)))
        }
    }
}

struct FlowFanOut(Vec<Arc<dyn FlowEmitter>>);

impl FlowEmitter for FlowFanOut {
    fn flow_success(&self) {
        self.0.iter().for_each(|e| e.flow_success());
    }

    fn flow_error(&self, error: &TaskdagError) {
        self.0.iter().for_each(|e| e.flow_error(error));
    }

    fn flow_done(&self, elapsed: Duration) {
        self.0.iter().for_each(|e| e.flow_done(elapsed));
    }
}

struct TaskFanOut(Vec<Arc<dyn TaskEmitter>>);

impl TaskEmitter for TaskFanOut {
    fn task_success(&self) {
        self.0.iter().for_each(|e| e.task_success());
    }

    fn task_error(&self, error: &anyhow::Error) {
        self.0.iter().for_each(|e| e.task_error(error));
    }

    fn task_error_recovered(&self, error: &anyhow::Error) {
        self.0.iter().for_each(|e| e.task_error_recovered(error));
    }

    fn task_skipped(&self, cause: SkipCause) {
        self.0.iter().for_each(|e| e.task_skipped(cause));
    }

    fn task_panic(&self, panic: &PanicError) {
        self.0.iter().for_each(|e| e.task_panic(panic));
    }

    fn task_panic_recovered(&self, panic: &PanicError) {
        self.0.iter().for_each(|e| e.task_panic_recovered(panic));
    }

    fn task_done(&self, elapsed: Duration) {
        self.0.iter().for_each(|e| e.task_done(elapsed));
    }
}

struct SchedulerFanOut(Vec<Arc<dyn SchedulerEmitter>>);

impl SchedulerEmitter for SchedulerFanOut {
    fn emit_state(&self, state: SchedulerState) {
        self.0.iter().for_each(|e| e.emit_state(state));
    }
}

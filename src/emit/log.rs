// src/emit/log.rs

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::emit::{Emitter, FlowEmitter, FlowInfo, SchedulerEmitter, TaskEmitter, TaskInfo};
use crate::engine::{SchedulerState, SkipCause};
use crate::errors::{PanicError, TaskdagError};

/// Emitter writing lifecycle events to `tracing`.
///
/// Successes and skips are logged at debug level, failures at error level
/// and recoveries at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmitter;

impl Emitter for LogEmitter {
    fn flow_init(&self, flow: &FlowInfo) -> Arc<dyn FlowEmitter> {
        Arc::new(LogFlowEmitter {
            flow: flow.name.clone(),
        })
    }

    fn task_init(&self, task: &TaskInfo, flow: &FlowInfo) -> Arc<dyn TaskEmitter> {
        Arc::new(LogTaskEmitter {
            flow: flow.name.clone(),
            task: task.name.clone(),
        })
    }

    fn scheduler_init(&self, flow: &FlowInfo) -> Option<Arc<dyn SchedulerEmitter>> {
        Some(Arc::new(LogSchedulerEmitter {
            flow: flow.name.clone(),
        }))
    }
}

struct LogFlowEmitter {
    flow: String,
}

impl FlowEmitter for LogFlowEmitter {
    fn flow_success(&self) {
        debug!(flow = %self.flow, "flow succeeded");
    }

    fn flow_error(&self, err: &TaskdagError) {
        error!(flow = %self.flow, error = %err, "flow failed");
    }

    fn flow_done(&self, elapsed: Duration) {
        debug!(flow = %self.flow, ?elapsed, "flow done");
    }
}

struct LogTaskEmitter {
    flow: String,
    task: String,
}

impl TaskEmitter for LogTaskEmitter {
    fn task_success(&self) {
        debug!(flow = %self.flow, task = %self.task, "task succeeded");
    }

    fn task_error(&self, err: &anyhow::Error) {
        error!(flow = %self.flow, task = %self.task, error = %err, "task failed");
    }

    fn task_error_recovered(&self, err: &anyhow::Error) {
        warn!(flow = %self.flow, task = %self.task, error = %err, "task error recovered");
    }

    fn task_skipped(&self, cause: SkipCause) {
        debug!(flow = %self.flow, task = %self.task, ?cause, "task skipped");
    }

    fn task_panic(&self, panic: &PanicError) {
        error!(
            flow = %self.flow,
            task = %self.task,
            panic = %panic.message(),
            backtrace = %panic.backtrace(),
            "task panicked"
        );
    }

    fn task_panic_recovered(&self, panic: &PanicError) {
        warn!(flow = %self.flow, task = %self.task, panic = %panic.message(), "task panic recovered");
    }

    fn task_done(&self, elapsed: Duration) {
        debug!(flow = %self.flow, task = %self.task, ?elapsed, "task done");
    }
}

struct LogSchedulerEmitter {
    flow: String,
}

impl SchedulerEmitter for LogSchedulerEmitter {
    fn emit_state(&self, state: SchedulerState) {
        debug!(
            flow = %self.flow,
            pending = state.pending,
            ready = state.ready,
            waiting = state.waiting,
            idle_workers = ?state.idle_workers,
            concurrency = ?state.concurrency,
            "scheduler state"
        );
    }
}

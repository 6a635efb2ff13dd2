//! An emitter that records every lifecycle event as a string.
//!
//! Events look like `"task_success load"` or `"task_skipped report DependencyFailed"`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskdag::emit::{Emitter, FlowEmitter, FlowInfo, SchedulerEmitter, TaskEmitter, TaskInfo};
use taskdag::engine::{SchedulerState, SkipCause};
use taskdag::errors::{PanicError, TaskdagError};

#[derive(Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<String>>>,
    task_log: Arc<Mutex<Vec<(String, String)>>>,
    states: Arc<Mutex<Vec<SchedulerState>>>,
    sample_states: bool,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also collect periodic scheduler state samples.
    pub fn with_states() -> Self {
        Self {
            sample_states: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn has(&self, event: &str) -> bool {
        self.events().iter().any(|e| e == event)
    }

    /// Events recorded for one task, without the task name, e.g.
    /// `["task_success", "task_done"]`.
    pub fn task_events(&self, task: &str) -> Vec<String> {
        self.task_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == task)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn states(&self) -> Vec<SchedulerState> {
        self.states.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn push_task(&self, task: &str, kind: &str, detail: Option<String>) {
        let (event, short) = match detail {
            Some(d) => (format!("{kind} {task} {d}"), format!("{kind} {d}")),
            None => (format!("{kind} {task}"), kind.to_string()),
        };
        self.push(event);
        self.task_log.lock().unwrap().push((task.to_string(), short));
    }
}

impl Emitter for RecordingEmitter {
    fn flow_init(&self, flow: &FlowInfo) -> Arc<dyn FlowEmitter> {
        self.push(format!("flow_init {}", flow.name));
        Arc::new(RecordingFlow {
            rec: self.clone(),
            flow: flow.name.clone(),
        })
    }

    fn task_init(&self, task: &TaskInfo, _flow: &FlowInfo) -> Arc<dyn TaskEmitter> {
        Arc::new(RecordingTask {
            rec: self.clone(),
            task: task.name.clone(),
        })
    }

    fn scheduler_init(&self, _flow: &FlowInfo) -> Option<Arc<dyn SchedulerEmitter>> {
        if !self.sample_states {
            return None;
        }
        Some(Arc::new(RecordingScheduler {
            states: Arc::clone(&self.states),
        }))
    }
}

struct RecordingFlow {
    rec: RecordingEmitter,
    flow: String,
}

impl FlowEmitter for RecordingFlow {
    fn flow_success(&self) {
        self.rec.push(format!("flow_success {}", self.flow));
    }

    fn flow_error(&self, _error: &TaskdagError) {
        self.rec.push(format!("flow_error {}", self.flow));
    }

    fn flow_done(&self, _elapsed: Duration) {
        self.rec.push(format!("flow_done {}", self.flow));
    }
}

struct RecordingTask {
    rec: RecordingEmitter,
    task: String,
}

impl TaskEmitter for RecordingTask {
    fn task_success(&self) {
        self.rec.push_task(&self.task, "task_success", None);
    }

    fn task_error(&self, _error: &anyhow::Error) {
        self.rec.push_task(&self.task, "task_error", None);
    }

    fn task_error_recovered(&self, _error: &anyhow::Error) {
        self.rec.push_task(&self.task, "task_error_recovered", None);
    }

    fn task_skipped(&self, cause: SkipCause) {
        self.rec.push_task(&self.task, "task_skipped", Some(format!("{cause:?}")));
    }

    fn task_panic(&self, _panic: &PanicError) {
        self.rec.push_task(&self.task, "task_panic", None);
    }

    fn task_panic_recovered(&self, _panic: &PanicError) {
        self.rec.push_task(&self.task, "task_panic_recovered", None);
    }

    fn task_done(&self, _elapsed: Duration) {
        self.rec.push_task(&self.task, "task_done", None);
    }
}

struct RecordingScheduler {
    states: Arc<Mutex<Vec<SchedulerState>>>,
}

impl SchedulerEmitter for RecordingScheduler {
    fn emit_state(&self, state: SchedulerState) {
        self.states.lock().unwrap().push(state);
    }
}

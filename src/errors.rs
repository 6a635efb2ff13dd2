// src/errors.rs

//! Crate-wide error types.
//!
//! - [`TaskdagError`] is what every fallible public operation returns.
//! - [`CompileErrors`] aggregates every problem found while compiling a flow.
//! - [`PanicError`] wraps a panic caught at a job boundary.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

use crate::dag::NodeId;
use crate::types::{SourceLocation, TypeKey};

#[derive(Error, Debug)]
pub enum TaskdagError {
    #[error(transparent)]
    Compile(#[from] CompileErrors),

    #[error("task {task} failed: {source}")]
    Task {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Panic(#[from] PanicError),

    #[error("flow cancelled")]
    Cancelled,

    #[error("job exited unexpectedly: {0}")]
    JobLost(String),

    #[error("invalid flow inputs: {0}")]
    Inputs(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Every failure of a run that continued on error, in completion order.
    #[error("{} jobs failed: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<TaskdagError>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskdagError {
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskdagError::Panic(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskdagError::Cancelled)
    }

    pub fn as_panic(&self) -> Option<&PanicError> {
        match self {
            TaskdagError::Panic(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_compile(&self) -> Option<&CompileErrors> {
        match self {
            TaskdagError::Compile(c) => Some(c),
            _ => None,
        }
    }
}

fn join_errors(errors: &[TaskdagError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskdagError>;

/// Category of a compile diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    DuplicateInput,
    DuplicateOutput,
    DuplicateProvider,
    MissingProvider,
    UnusedInput,
    UnusedOutput,
    InvalidSignature,
    InvalidPredicate,
    InvalidFallback,
    InvalidInvoke,
    /// A directive option that the directive does not accept.
    InvalidOption,
    /// The chain of providers forming the cycle, starting at the first
    /// provider visited.
    Cycle(Vec<CycleStep>),
}

/// One hop of a dependency cycle: `node` has to run to provide `provides`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleStep {
    pub node: NodeId,
    pub label: String,
    pub provides: TypeKey,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{location}: {message}")]
pub struct CompileError {
    pub location: SourceLocation,
    pub kind: CompileErrorKind,
    pub message: String,
}

impl CompileError {
    pub fn new(location: SourceLocation, kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            location,
            kind,
            message: message.into(),
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self.kind, CompileErrorKind::Cycle(_))
    }
}

/// Every diagnostic produced by one compilation, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileErrors {
    errors: Vec<CompileError>,
}

impl CompileErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        self.errors.push(error);
    }

    pub fn report(
        &mut self,
        location: SourceLocation,
        kind: CompileErrorKind,
        message: impl Into<String>,
    ) {
        self.push(CompileError::new(location, kind, message));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.errors.iter()
    }

    pub fn cycle(&self) -> Option<&CompileError> {
        self.errors.iter().find(|e| e.is_cycle())
    }

    /// Messages only, without locations.
    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }

    pub fn into_result(self) -> std::result::Result<(), CompileErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

impl<'a> IntoIterator for &'a CompileErrors {
    type Item = &'a CompileError;
    type IntoIter = std::slice::Iter<'a, CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// A panic caught while running a job.
///
/// The original payload can be taken back once with [`PanicError::take_payload`],
/// e.g. to resume unwinding on the caller's side.
pub struct PanicError {
    task: Option<String>,
    message: String,
    payload: Mutex<Option<Box<dyn Any + Send>>>,
    backtrace: Backtrace,
}

impl PanicError {
    /// Wrap a payload returned by `catch_unwind` together with the trace
    /// taken where the panic was raised.
    pub fn from_payload(payload: Box<dyn Any + Send>, backtrace: Backtrace) -> Self {
        let message = payload_message(payload.as_ref());
        Self {
            task: None,
            message,
            payload: Mutex::new(Some(payload)),
            backtrace,
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// The original panic payload, if it has not been taken yet.
    pub fn take_payload(&self) -> Option<Box<dyn Any + Send>> {
        self.payload
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task {
            Some(task) => write!(f, "task {task} panicked: {}", self.message),
            None => write!(f, "panic: {}", self.message),
        }
    }
}

impl fmt::Debug for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicError")
            .field("task", &self.task)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl std::error::Error for PanicError {}

// src/lib.rs

//! Type-directed task graphs.
//!
//! Tasks declare the types they consume and produce. Compiling a flow
//! resolves every consumed type to its single provider, rejects cycles and
//! unreachable or unused types, and orders the tasks into levels. Running a
//! flow executes the tasks on a bounded set of Tokio workers, respecting
//! dependencies, containing panics and honoring cancellation.
//!
//! - [`dag`]: the compiler (graph building, validation, cycles, levels).
//! - [`engine`]: the general-purpose concurrent job scheduler.
//! - [`exec`] / [`flow`]: running compiled flows with typed values.
//! - [`parallel`]: independent tasks, slices and maps without a graph.
//! - [`emit`]: lifecycle hooks; [`logging`] / [`config`]: ambient setup.

pub mod config;
pub mod dag;
pub mod emit;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod flow;
pub mod logging;
pub mod parallel;
pub mod types;

pub use dag::{FlowPlan, FlowSpec, Signature, TaskDecl, compile};
pub use emit::{Emitter, EmitterStack, LogEmitter, NopEmitter};
pub use engine::{Completion, Job, JobContext, JobState, ScheduledJob, Scheduler, SkipCause};
pub use errors::{CompileError, CompileErrorKind, CompileErrors, PanicError, Result, TaskdagError};
pub use exec::{FlowResults, Inputs, TaskContext};
pub use flow::{Flow, FlowBuilder, Predicate, Task};
pub use parallel::{Map, Parallel, ParallelBuilder, ParallelTask, Slice};
pub use types::{SourceLocation, TypeKey};

/// Re-exported so callers can cancel runs without depending on `tokio-util`.
pub use tokio_util::sync::CancellationToken;

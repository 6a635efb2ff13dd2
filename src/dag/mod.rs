// src/dag/mod.rs

//! Flow compiler.
//!
//! - [`task_info`] holds declarations and compiled descriptors.
//! - [`graph`] builds the provider/receiver graph.
//! - [`validate`] checks coverage, unused inputs and unused outputs.
//! - [`cycle`] finds dependency cycles.
//! - [`scheduler`] computes levels and a topological order.
//! - [`compile`] runs the whole pipeline.

pub mod compile;
pub mod cycle;
pub mod graph;
pub mod scheduler;
pub mod task_info;
pub mod validate;

pub use compile::{FlowPlan, compile};
pub use cycle::CycleDetector;
pub use graph::{FlowGraph, GraphBuilder, Receiver};
pub use scheduler::{LevelScheduler, Schedule};
pub use task_info::{
    Declared, FlowSpec, Node, NodeId, NodeKind, PredicateDecl, PredicateDescriptor, Signature,
    TaskDecl, TaskDescriptor,
};
pub use validate::GraphValidator;

// src/dag/compile.rs

//! The compile pipeline: build → validate → detect cycles → schedule.
//!
//! Builder and validator problems accumulate; a cycle is appended and ends
//! compilation on its own. Scheduling only runs on a clean graph.

use tracing::{debug, info};

use crate::dag::cycle::CycleDetector;
use crate::dag::graph::{FlowGraph, GraphBuilder};
use crate::dag::scheduler::{LevelScheduler, Schedule};
use crate::dag::task_info::{FlowSpec, Node, NodeId, TaskDescriptor};
use crate::dag::validate::GraphValidator;
use crate::errors::CompileErrors;

/// A compiled, validated flow. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPlan {
    graph: FlowGraph,
    schedule: Schedule,
    topo_order: Vec<NodeId>,
}

impl FlowPlan {
    pub fn name(&self) -> &str {
        &self.graph.name
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.graph.tasks
    }

    pub fn nodes(&self) -> &[Node] {
        &self.graph.nodes
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn topo_order(&self) -> &[NodeId] {
        &self.topo_order
    }

    /// Scheduled nodes in an order where every provider precedes its
    /// consumers: the topological order restricted to scheduled nodes.
    pub fn enqueue_order(&self) -> Vec<NodeId> {
        self.topo_order
            .iter()
            .copied()
            .filter(|id| self.schedule.level_of(*id).is_some())
            .collect()
    }
}

/// Compile a flow description.
pub fn compile(spec: &FlowSpec) -> Result<FlowPlan, CompileErrors> {
    let mut errors = CompileErrors::new();

    let graph = GraphBuilder::build(spec, &mut errors);
    GraphValidator::new(&graph, &mut errors).validate();

    if let Err(cycle) = CycleDetector::new(&graph).find_cycle() {
        errors.push(cycle);
        return Err(errors);
    }
    if !errors.is_empty() {
        debug!(flow = %spec.name, errors = errors.len(), "flow failed to compile");
        return Err(errors);
    }

    let scheduler = LevelScheduler::new(&graph);
    let schedule = scheduler.schedule();
    let topo_order = scheduler.topo_order();

    info!(
        flow = %spec.name,
        tasks = graph.tasks.len(),
        levels = schedule.len(),
        "flow compiled"
    );

    Ok(FlowPlan {
        graph,
        schedule,
        topo_order,
    })
}

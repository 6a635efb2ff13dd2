// src/exec/store.rs

//! Write-once storage for the values threaded through one flow invocation.
//!
//! There is one slot per flow input and per node output. Each slot has a
//! single writer (the flow caller or the providing task) and is only read by
//! tasks scheduled after that writer completed, so readers never race it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::dag::FlowPlan;
use crate::errors::{Result, TaskdagError};
use crate::types::TypeKey;

/// A produced value.
pub type Value = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Default)]
pub struct ValueStore {
    slots: HashMap<TypeKey, OnceLock<Value>>,
}

impl ValueStore {
    /// Empty slots for every flow input and every node output of `plan`.
    pub fn for_plan(plan: &FlowPlan) -> Self {
        let graph = plan.graph();
        let mut slots = HashMap::new();
        for input in &graph.inputs {
            slots.entry(input.key.clone()).or_insert_with(OnceLock::new);
        }
        for node in &graph.nodes {
            for key in &node.outputs {
                slots.entry(key.clone()).or_insert_with(OnceLock::new);
            }
        }
        Self { slots }
    }

    pub fn set(&self, key: &TypeKey, value: Value) -> Result<()> {
        let slot = self.slots.get(key).ok_or_else(|| {
            TaskdagError::Scheduler(format!("no slot for {key} in this flow"))
        })?;
        slot.set(value)
            .map_err(|_| TaskdagError::Scheduler(format!("{key} was already written")))
    }

    pub fn get(&self, key: &TypeKey) -> Option<Value> {
        self.slots.get(key)?.get().cloned()
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.get().is_some())
    }

    pub fn get_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get(&TypeKey::of::<T>())?.downcast::<T>().ok()
    }
}

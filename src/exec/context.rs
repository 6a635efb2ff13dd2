// src/exec/context.rs

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow, bail};
use tokio_util::sync::CancellationToken;

use crate::exec::store::{Value, ValueStore};
use crate::types::TypeKey;

/// What a task or predicate body sees: its declared inputs, a place to put
/// its declared outputs, and the run's cancellation token.
///
/// Outputs are staged here and only become visible to other tasks once the
/// body has returned successfully.
#[derive(Clone)]
pub struct TaskContext {
    task: Arc<str>,
    inputs: Arc<[TypeKey]>,
    outputs: Arc<[TypeKey]>,
    store: Arc<ValueStore>,
    staged: Arc<Mutex<Vec<(TypeKey, Value)>>>,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        task: Arc<str>,
        inputs: Arc<[TypeKey]>,
        outputs: Arc<[TypeKey]>,
        store: Arc<ValueStore>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            task,
            inputs,
            outputs,
            store,
            staged: Arc::new(Mutex::new(Vec::new())),
            cancellation,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// A declared input of type `T`.
    pub fn input<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        self.input_key(&key)?
            .downcast::<T>()
            .map_err(|_| anyhow!("value stored for {key} has a different type"))
    }

    /// A declared input by key, untyped.
    pub fn input_key(&self, key: &TypeKey) -> Result<Value> {
        if !self.inputs.contains(key) {
            bail!("task {} did not declare input {key}", self.task);
        }
        self.store
            .get(key)
            .ok_or_else(|| anyhow!("input {key} is not available to task {}", self.task))
    }

    /// Stage a declared output. Providing the same output twice keeps the
    /// last value.
    pub fn provide<T: Any + Send + Sync>(&self, value: T) -> Result<()> {
        self.provide_key(TypeKey::of::<T>(), Arc::new(value))
    }

    pub fn provide_key(&self, key: TypeKey, value: Value) -> Result<()> {
        if !self.outputs.contains(&key) {
            bail!("task {} did not declare output {key}", self.task);
        }
        let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
        staged.retain(|(k, _)| k != &key);
        staged.push((key, value));
        Ok(())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Staged outputs in declaration order; errors if any is missing.
    pub(crate) fn take_outputs(&self) -> Result<Vec<(TypeKey, Value)>> {
        let mut staged = std::mem::take(
            &mut *self.staged.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut ordered = Vec::with_capacity(self.outputs.len());
        for key in self.outputs.iter() {
            let Some(pos) = staged.iter().position(|(k, _)| k == key) else {
                bail!("task {} did not provide output {key}", self.task);
            };
            ordered.push(staged.swap_remove(pos));
        }
        Ok(ordered)
    }
}

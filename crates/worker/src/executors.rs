use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use workqueue_core::traits::TaskExecutor;

/// Executor registry keyed by task type.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its declared task type.
    /// A later registration for the same type replaces the earlier one.
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) {
        let task_type = executor.supported_task_type().to_string();
        info!("Registered executor for task type {task_type}");
        self.executors.insert(task_type, executor);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }

    pub fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};

use workqueue_core::config::WorkerConfig;
use workqueue_core::models::Task;
use workqueue_core::traits::{
    DispatchService, ProgressService, RetryService, TaskContext, WorkerRepository,
};
use workqueue_core::QueueResult;

use crate::executors::ExecutorRegistry;
use crate::heartbeat_manager::HeartbeatManager;

/// Worker poll loop.
///
/// Claims tasks from the shared store, routes them to the matching
/// executor and reports the outcome back through the retry service.
/// Tasks run under at-least-once semantics: a crash here simply lets
/// the lease expire and the task restarts elsewhere from scratch.
pub struct WorkerService {
    worker_id: String,
    config: WorkerConfig,
    dispatch: Arc<dyn DispatchService>,
    retry: Arc<dyn RetryService>,
    progress: Arc<dyn ProgressService>,
    executors: Arc<ExecutorRegistry>,
    heartbeat: Arc<HeartbeatManager>,
    active_tasks: Arc<AtomicI32>,
}

impl WorkerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: String,
        config: WorkerConfig,
        dispatch: Arc<dyn DispatchService>,
        retry: Arc<dyn RetryService>,
        progress: Arc<dyn ProgressService>,
        worker_repo: Arc<dyn WorkerRepository>,
        executors: ExecutorRegistry,
    ) -> Self {
        let active_tasks = Arc::new(AtomicI32::new(0));
        let heartbeat = Arc::new(HeartbeatManager::new(
            worker_id.clone(),
            config.clone(),
            worker_repo,
            active_tasks.clone(),
        ));
        Self {
            worker_id,
            config,
            dispatch,
            retry,
            progress,
            executors: Arc::new(executors),
            heartbeat,
            active_tasks,
        }
    }

    /// Derives a unique worker id from the hostname.
    pub fn generate_worker_id(kind: &str) -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{kind}-{host}-{}", &suffix[..8])
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn active_task_count(&self) -> i32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Claims and executes at most one task inline.
    /// Returns whether a task was processed.
    pub async fn process_next(&self) -> QueueResult<bool> {
        let Some(task) = self
            .dispatch
            .next_task(&self.worker_id, &self.config.capabilities)
            .await?
        else {
            return Ok(false);
        };

        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        let result = self.execute_task(task).await;
        self.active_tasks.fetch_sub(1, Ordering::SeqCst);
        result?;
        Ok(true)
    }

    async fn execute_task(&self, task: Task) -> QueueResult<()> {
        let Some(executor) = self.executors.get(&task.task_type) else {
            // A claim for a type we cannot run is a deployment problem,
            // not a task problem: hand it back with a retry request.
            warn!(
                "No executor registered for task type {}, releasing task {}",
                task.task_type, task.id
            );
            self.retry
                .handle_failure(
                    task.id,
                    &self.worker_id,
                    &format!("no executor registered for task type {}", task.task_type),
                    true,
                )
                .await?;
            return Ok(());
        };

        info!(
            "Executing task {} (type {}, attempt {})",
            task.id,
            task.task_type,
            task.retry_count + 1
        );
        let context = TaskContext::from_task(&task, &self.worker_id);
        match executor.execute(&context, self.progress.clone()).await {
            Ok(outcome) if outcome.success => {
                self.retry
                    .handle_success(
                        task.id,
                        &self.worker_id,
                        outcome.result_location.as_deref(),
                        outcome.result_metadata,
                    )
                    .await
            }
            Ok(outcome) => {
                let error = outcome
                    .error_message
                    .as_deref()
                    .unwrap_or("task reported failure without a message");
                self.retry
                    .handle_failure(task.id, &self.worker_id, error, outcome.retry_requested)
                    .await?;
                Ok(())
            }
            Err(e) => {
                self.retry
                    .handle_failure(task.id, &self.worker_id, &e.to_string(), true)
                    .await?;
                Ok(())
            }
        }
    }

    /// Runs the worker: registration, heartbeats and the poll loop.
    pub async fn run(self: Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> QueueResult<()> {
        if self.executors.is_empty() {
            warn!("Worker {} starting with no registered executors", self.worker_id);
        }

        self.heartbeat.beat().await?;
        let heartbeat_handle = self
            .heartbeat
            .clone()
            .start_heartbeat_task(shutdown_rx.resubscribe());
        info!(
            "Worker {} started, supported types: {:?}",
            self.worker_id,
            self.executors.supported_types()
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_seconds));
        let mut shutdown_rx = shutdown_rx;
        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if self.active_task_count() >= self.config.max_concurrent_tasks {
                        continue;
                    }
                    let service = self.clone();
                    tokio::spawn(async move {
                        match service.process_next().await {
                            Ok(true) | Ok(false) => {}
                            Err(e) => error!("Worker poll failed: {e}"),
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("Worker {} shutting down", self.worker_id);
                    break;
                }
            }
        }

        heartbeat_handle.await.ok();
        Ok(())
    }
}

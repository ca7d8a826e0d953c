//! 内存存储实现
//!
//! 所有仓储共享同一把锁，因此每个方法天然是一次原子操作，
//! 与数据库后端的单条条件 `UPDATE` 语义一致。不做持久化，
//! 适用于单元测试和不需要跨进程协调的嵌入式场景。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use workqueue_core::models::{
    DependencyKind, ProgressEvent, Task, TaskDependency, TaskFilter, TaskStatus,
    TaskStatusSummary, WorkerInfo, WorkerStatus,
};
use workqueue_core::traits::{
    ProgressEventRepository, TaskDependencyRepository, TaskRepository, WorkerRepository,
};
use workqueue_core::{QueueError, QueueResult};

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<i64, Task>,
    next_task_id: i64,
    dependencies: Vec<TaskDependency>,
    next_dependency_id: i64,
    workers: HashMap<String, WorkerInfo>,
    events: Vec<ProgressEvent>,
    next_event_id: i64,
}

/// 内存存储
///
/// 工厂：四个仓储句柄共享同一份状态。
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(MemoryTaskRepository {
            state: self.state.clone(),
        })
    }

    pub fn dependency_repository(&self) -> Arc<dyn TaskDependencyRepository> {
        Arc::new(MemoryTaskDependencyRepository {
            state: self.state.clone(),
        })
    }

    pub fn worker_repository(&self) -> Arc<dyn WorkerRepository> {
        Arc::new(MemoryWorkerRepository {
            state: self.state.clone(),
        })
    }

    pub fn progress_event_repository(&self) -> Arc<dyn ProgressEventRepository> {
        Arc::new(MemoryProgressEventRepository {
            state: self.state.clone(),
        })
    }
}

fn lock(state: &Mutex<MemoryState>) -> QueueResult<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|_| QueueError::Internal("内存存储的锁已中毒".to_string()))
}

pub struct MemoryTaskRepository {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn create(&self, task: &Task) -> QueueResult<Task> {
        let mut state = lock(&self.state)?;
        state.next_task_id += 1;
        let mut created = task.clone();
        created.id = state.next_task_id;
        state.tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> QueueResult<Option<Task>> {
        let state = lock(&self.state)?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> QueueResult<Vec<Task>> {
        let state = lock(&self.state)?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| {
                filter
                    .task_type
                    .as_deref()
                    .is_none_or(|ty| t.task_type == ty)
            })
            .filter(|t| {
                filter
                    .source_ref
                    .as_deref()
                    .is_none_or(|r| t.source_ref == r)
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let mut tasks: Vec<Task> = tasks.into_iter().skip(offset).collect();
        if let Some(limit) = filter.limit {
            tasks.truncate(limit.max(0) as usize);
        }
        Ok(tasks)
    }

    async fn fetch_claimable(&self, now: DateTime<Utc>, limit: i64) -> QueueResult<Vec<Task>> {
        let state = lock(&self.state)?;
        let mut candidates: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.is_claimable_at(now))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        candidates.truncate(limit.max(0) as usize);
        Ok(candidates)
    }

    async fn try_claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !task.is_claimable_at(now) {
            return Ok(false);
        }
        task.status = TaskStatus::Processing;
        task.lease_owner = Some(worker_id.to_string());
        task.lease_started_at = Some(now);
        task.lease_expires_at = Some(lease_until);
        task.updated_at = now;
        Ok(true)
    }

    async fn renew_lease(
        &self,
        id: i64,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing || task.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        task.lease_expires_at = Some(lease_until);
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> QueueResult<u64> {
        let mut state = lock(&self.state)?;
        let mut released = 0;
        for task in state.tasks.values_mut() {
            let expired = task.status == TaskStatus::Processing
                && task.lease_expires_at.is_some_and(|expiry| expiry < now);
            if expired {
                task.status = TaskStatus::Queued;
                task.lease_owner = None;
                task.lease_started_at = None;
                task.lease_expires_at = None;
                task.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn update_progress(
        &self,
        id: i64,
        worker_id: &str,
        percent: f64,
        step_name: &str,
        message: Option<&str>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing || task.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        task.progress_percent = percent;
        task.current_step = Some(step_name.to_string());
        task.progress_message = message.map(str::to_string);
        task.lease_expires_at = Some(lease_until);
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_completed(
        &self,
        id: i64,
        worker_id: &str,
        result_location: Option<&str>,
        result_metadata: Option<&serde_json::Value>,
    ) -> QueueResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing || task.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        task.status = TaskStatus::Completed;
        task.progress_percent = 100.0;
        task.result_location = result_location.map(str::to_string);
        task.result_metadata = result_metadata.cloned();
        task.lease_owner = None;
        task.lease_started_at = None;
        task.lease_expires_at = None;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_retrying(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing
            || task.lease_owner.as_deref() != Some(worker_id)
            || !task.has_retry_budget()
        {
            return Ok(false);
        }
        task.status = TaskStatus::Retry;
        task.retry_count += 1;
        task.error_count += 1;
        task.last_error = Some(error.to_string());
        task.next_run_at = next_run_at;
        task.lease_owner = None;
        task.lease_started_at = None;
        task.lease_expires_at = None;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_failed(&self, id: i64, worker_id: &str, error: &str) -> QueueResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing || task.lease_owner.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        task.status = TaskStatus::Failed;
        task.error_count += 1;
        task.last_error = Some(error.to_string());
        task.lease_owner = None;
        task.lease_started_at = None;
        task.lease_expires_at = None;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn requeue_failed(&self, id: i64, next_run_at: DateTime<Utc>) -> QueueResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Failed || !task.has_retry_budget() {
            return Ok(false);
        }
        task.status = TaskStatus::Retry;
        task.retry_count += 1;
        task.next_run_at = next_run_at;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn status_summary(&self) -> QueueResult<TaskStatusSummary> {
        let state = lock(&self.state)?;
        let mut summary = TaskStatusSummary::default();
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Queued => summary.queued += 1,
                TaskStatus::Processing => summary.processing += 1,
                TaskStatus::Retry => summary.retry += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        Ok(summary)
    }
}

pub struct MemoryTaskDependencyRepository {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl TaskDependencyRepository for MemoryTaskDependencyRepository {
    async fn add(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
        kind: DependencyKind,
    ) -> QueueResult<TaskDependency> {
        let mut state = lock(&self.state)?;
        let exists = state
            .dependencies
            .iter()
            .any(|d| d.task_id == task_id && d.prerequisite_task_id == prerequisite_task_id);
        if exists {
            return Err(QueueError::DatabaseOperation(format!(
                "依赖边已存在: {task_id} -> {prerequisite_task_id}"
            )));
        }
        state.next_dependency_id += 1;
        let mut dependency = TaskDependency::new(task_id, prerequisite_task_id, kind);
        dependency.id = state.next_dependency_id;
        state.dependencies.push(dependency.clone());
        Ok(dependency)
    }

    async fn get_for_task(&self, task_id: i64) -> QueueResult<Vec<TaskDependency>> {
        let state = lock(&self.state)?;
        Ok(state
            .dependencies
            .iter()
            .filter(|d| d.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn all_edges(&self) -> QueueResult<Vec<(i64, i64)>> {
        let state = lock(&self.state)?;
        Ok(state
            .dependencies
            .iter()
            .map(|d| (d.task_id, d.prerequisite_task_id))
            .collect())
    }
}

pub struct MemoryWorkerRepository {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl WorkerRepository for MemoryWorkerRepository {
    async fn heartbeat(&self, worker: &WorkerInfo) -> QueueResult<()> {
        let mut state = lock(&self.state)?;
        match state.workers.get_mut(&worker.id) {
            Some(existing) => {
                existing.kind = worker.kind.clone();
                existing.status = WorkerStatus::Alive;
                existing.capabilities = worker.capabilities.clone();
                existing.current_load = worker.current_load;
                existing.max_concurrent = worker.max_concurrent;
                existing.last_heartbeat = worker.last_heartbeat;
            }
            None => {
                state.workers.insert(worker.id.clone(), worker.clone());
            }
        }
        Ok(())
    }

    async fn get_by_id(&self, worker_id: &str) -> QueueResult<Option<WorkerInfo>> {
        let state = lock(&self.state)?;
        Ok(state.workers.get(worker_id).cloned())
    }

    async fn list(&self) -> QueueResult<Vec<WorkerInfo>> {
        let state = lock(&self.state)?;
        let mut workers: Vec<WorkerInfo> = state.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }

    async fn mark_down_stale(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<String>> {
        let mut state = lock(&self.state)?;
        let mut stale = Vec::new();
        for worker in state.workers.values_mut() {
            if worker.is_alive() && worker.heartbeat_older_than(cutoff) {
                worker.status = WorkerStatus::Down;
                stale.push(worker.id.clone());
            }
        }
        stale.sort();
        Ok(stale)
    }

    async fn remove(&self, worker_id: &str) -> QueueResult<()> {
        let mut state = lock(&self.state)?;
        state.workers.remove(worker_id);
        Ok(())
    }
}

pub struct MemoryProgressEventRepository {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl ProgressEventRepository for MemoryProgressEventRepository {
    async fn append(&self, event: &ProgressEvent) -> QueueResult<ProgressEvent> {
        let mut state = lock(&self.state)?;
        state.next_event_id += 1;
        let mut created = event.clone();
        created.id = state.next_event_id;
        state.events.push(created.clone());
        Ok(created)
    }

    async fn get_by_task_id(&self, task_id: i64) -> QueueResult<Vec<ProgressEvent>> {
        let state = lock(&self.state)?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use workqueue_core::models::{DependencyKind, NewTask, Task, TaskDependency, TaskStatus};
use workqueue_core::traits::{
    ProducerService, RetryService, TaskDependencyRepository, TaskRepository,
};
use workqueue_core::{QueueError, QueueResult};

use crate::dependency_checker::DependencyCheckService;

/// 生产方服务实现
///
/// 队列的写入口：入队、建立依赖边、显式重试。依赖边在写入前
/// 做存在性与成环校验，环会导致相关任务永久静默饥饿，必须在
/// 入口处拒绝。
pub struct TaskProducerService {
    task_repo: Arc<dyn TaskRepository>,
    dependency_repo: Arc<dyn TaskDependencyRepository>,
    dependency_checker: Arc<dyn DependencyCheckService>,
    retry_service: Arc<dyn RetryService>,
}

impl TaskProducerService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        dependency_repo: Arc<dyn TaskDependencyRepository>,
        dependency_checker: Arc<dyn DependencyCheckService>,
        retry_service: Arc<dyn RetryService>,
    ) -> Self {
        Self {
            task_repo,
            dependency_repo,
            dependency_checker,
            retry_service,
        }
    }

    fn validate_new_task(new_task: &NewTask) -> QueueResult<()> {
        if new_task.task_type.trim().is_empty() {
            return Err(QueueError::InvalidTaskParams("task_type 不能为空".into()));
        }
        if new_task.source_ref.trim().is_empty() {
            return Err(QueueError::InvalidTaskParams("source_ref 不能为空".into()));
        }
        if new_task.max_retries < 0 {
            return Err(QueueError::InvalidTaskParams(
                "max_retries 不能为负数".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProducerService for TaskProducerService {
    async fn enqueue(&self, new_task: NewTask) -> QueueResult<Task> {
        Self::validate_new_task(&new_task)?;
        let task = self.task_repo.create(&Task::new(new_task)).await?;
        info!(
            "任务入队: id {} 类型 {} 优先级 {}",
            task.id, task.task_type, task.priority
        );
        Ok(task)
    }

    async fn add_dependency(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
        kind: DependencyKind,
    ) -> QueueResult<TaskDependency> {
        self.dependency_checker
            .validate_new_dependency(task_id, prerequisite_task_id)
            .await?;
        self.dependency_repo
            .add(task_id, prerequisite_task_id, kind)
            .await
    }

    async fn retry_task(&self, task_id: i64) -> QueueResult<Task> {
        let task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(QueueError::TaskNotFound { id: task_id })?;

        if task.status != TaskStatus::Failed {
            return Err(QueueError::InvalidTransition {
                from: task.status,
                to: TaskStatus::Retry,
            });
        }
        if !task.has_retry_budget() {
            return Err(QueueError::RetriesExhausted { id: task_id });
        }

        let next_run_at = self.retry_service.next_retry_time(task.retry_count + 1);
        let requeued = self.task_repo.requeue_failed(task_id, next_run_at).await?;
        if !requeued {
            // 守卫未命中：与并发的重试请求竞争失败或预算恰好耗尽
            return Err(QueueError::RetriesExhausted { id: task_id });
        }

        info!(
            "任务 {} 显式重试，将在 {} 重新可调度",
            task_id,
            next_run_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        self.task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(QueueError::TaskNotFound { id: task_id })
    }
}

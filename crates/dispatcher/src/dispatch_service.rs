use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use workqueue_core::models::{Task, TaskStatusSummary};
use workqueue_core::traits::{DispatchService, LeaseService, TaskRepository};
use workqueue_core::{QueueError, QueueResult};

use crate::dependency_checker::DependencyCheckService;

/// 分派配置
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// 单次分派拉取的候选任务数量
    pub claim_batch_size: i64,
    /// 单次分派允许输给竞争者的认领尝试次数，
    /// 耗尽后返回"暂无任务"而不是无限重选
    pub claim_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            claim_batch_size: 16,
            claim_attempts: 3,
        }
    }
}

/// 分派服务实现
///
/// 选取与认领是两步：候选列表在求值瞬间有效，真正的仲裁发生在
/// 认领这一步的原子条件写入上。并发分派对同一候选的竞争是预期
/// 行为，输掉的一方顺延到下一个候选，从不上抛为错误。
pub struct TaskDispatchService {
    task_repo: Arc<dyn TaskRepository>,
    lease_service: Arc<dyn LeaseService>,
    dependency_checker: Arc<dyn DependencyCheckService>,
    config: DispatchConfig,
}

impl TaskDispatchService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        lease_service: Arc<dyn LeaseService>,
        dependency_checker: Arc<dyn DependencyCheckService>,
        config: Option<DispatchConfig>,
    ) -> Self {
        Self {
            task_repo,
            lease_service,
            dependency_checker,
            config: config.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl DispatchService for TaskDispatchService {
    async fn next_task(
        &self,
        worker_id: &str,
        capabilities: &[String],
    ) -> QueueResult<Option<Task>> {
        // capabilities 仅登记不参与过滤，按能力分派留作扩展点
        debug!(
            "Worker {} 请求任务，声明能力: {:?}",
            worker_id, capabilities
        );

        // 每次分派前先回收过期租约，保证崩溃Worker的任务及时回到候选池
        self.lease_service.expire_sweep().await?;

        let now = Utc::now();
        let candidates = self
            .task_repo
            .fetch_claimable(now, self.config.claim_batch_size)
            .await?;

        let mut attempts = 0u32;
        for candidate in candidates {
            let check = self.dependency_checker.check_task(candidate.id).await?;
            if !check.can_execute {
                debug!(
                    "任务 {} 依赖未满足，跳过: {:?}",
                    candidate.id, check.blocking_dependencies
                );
                continue;
            }

            if attempts >= self.config.claim_attempts {
                debug!("认领尝试预算耗尽，本轮返回空");
                break;
            }
            attempts += 1;

            if self
                .lease_service
                .try_claim(candidate.id, worker_id)
                .await?
            {
                let task = self
                    .task_repo
                    .get_by_id(candidate.id)
                    .await?
                    .ok_or(QueueError::TaskNotFound { id: candidate.id })?;
                info!(
                    "任务 {} (类型 {}) 分派给Worker {}",
                    task.id, task.task_type, worker_id
                );
                return Ok(Some(task));
            }

            debug!("任务 {} 的认领输给了并发竞争者", candidate.id);
        }

        Ok(None)
    }

    async fn queue_summary(&self) -> QueueResult<TaskStatusSummary> {
        self.task_repo.status_summary().await
    }
}

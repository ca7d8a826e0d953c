use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use workqueue_core::traits::{FailureOutcome, RetryService, TaskRepository};
use workqueue_core::{QueueError, QueueResult};

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 基础重试间隔（秒）
    pub base_delay_seconds: i64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 最大重试间隔（秒）
    pub max_delay_seconds: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 300, // 5分钟
            backoff_multiplier: 2.0,
            max_delay_seconds: 86400, // 1天
        }
    }
}

/// 重试策略服务实现
///
/// 处理Worker上报的执行结果。失败时无条件累计错误信息；
/// 是否安排重试取决于Worker的请求和任务自身的重试预算，
/// 退避间隔按 `base × multiplier^retry_count` 指数增长。
pub struct TaskRetryService {
    task_repo: Arc<dyn TaskRepository>,
    config: RetryConfig,
}

impl TaskRetryService {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config: Option<RetryConfig>) -> Self {
        Self {
            task_repo,
            config: config.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl RetryService for TaskRetryService {
    async fn handle_success(
        &self,
        task_id: i64,
        worker_id: &str,
        result_location: Option<&str>,
        result_metadata: Option<serde_json::Value>,
    ) -> QueueResult<()> {
        let completed = self
            .task_repo
            .mark_completed(task_id, worker_id, result_location, result_metadata.as_ref())
            .await?;

        if !completed {
            // 守卫未命中：租约已易主或已被回收，上报方是僵尸Worker
            return Err(QueueError::LeaseNotHeld {
                task_id,
                worker_id: worker_id.to_string(),
            });
        }

        info!("任务 {} 执行成功", task_id);
        Ok(())
    }

    async fn handle_failure(
        &self,
        task_id: i64,
        worker_id: &str,
        error: &str,
        retry_requested: bool,
    ) -> QueueResult<FailureOutcome> {
        let task = self
            .task_repo
            .get_by_id(task_id)
            .await?
            .ok_or(QueueError::TaskNotFound { id: task_id })?;

        if retry_requested && task.has_retry_budget() {
            let next_run_at = self.next_retry_time(task.retry_count + 1);
            let retried = self
                .task_repo
                .mark_retrying(task_id, worker_id, error, next_run_at)
                .await?;
            if !retried {
                return Err(QueueError::LeaseNotHeld {
                    task_id,
                    worker_id: worker_id.to_string(),
                });
            }

            info!(
                "任务 {} 第 {} 次失败，将在 {} 重试: {}",
                task_id,
                task.retry_count + 1,
                next_run_at.format("%Y-%m-%d %H:%M:%S UTC"),
                error
            );
            return Ok(FailureOutcome::Retried { next_run_at });
        }

        if retry_requested {
            debug!(
                "任务 {} 已达到最大重试次数 {}，转为终态失败",
                task_id, task.max_retries
            );
        }

        let failed = self.task_repo.mark_failed(task_id, worker_id, error).await?;
        if !failed {
            return Err(QueueError::LeaseNotHeld {
                task_id,
                worker_id: worker_id.to_string(),
            });
        }

        warn!("任务 {} 终态失败: {}", task_id, error);
        Ok(FailureOutcome::Terminal)
    }

    /// 第 `retry_count` 次重试的退避目标时间：
    /// `now + base × multiplier^retry_count`，受最大间隔约束
    fn next_retry_time(&self, retry_count: i32) -> DateTime<Utc> {
        let base = self.config.base_delay_seconds as f64;
        let exponential = base * self.config.backoff_multiplier.powi(retry_count);
        let capped = exponential.min(self.config.max_delay_seconds as f64);
        Utc::now() + Duration::seconds(capped as i64)
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info};

use workqueue_core::traits::{LeaseService, TaskRepository};
use workqueue_core::{QueueError, QueueResult};

/// 租约配置
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// 租约时长（秒）。Worker必须在该窗口内续约（显式续约或
    /// 进度上报的副作用），否则任务会被回收重新排队。
    pub lease_duration_seconds: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration_seconds: 300, // 5分钟
        }
    }
}

/// 租约服务实现
///
/// 认领、续约、回收全部落在仓储层的单次条件写入上：
/// 认领只在"未被租用"时命中，续约只在"调用方是持有者"时命中，
/// 两个Worker同时确信自己持有同一任务的情况不可能出现。
pub struct TaskLeaseService {
    task_repo: Arc<dyn TaskRepository>,
    config: LeaseConfig,
}

impl TaskLeaseService {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config: Option<LeaseConfig>) -> Self {
        Self {
            task_repo,
            config: config.unwrap_or_default(),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::seconds(self.config.lease_duration_seconds)
    }
}

#[async_trait]
impl LeaseService for TaskLeaseService {
    async fn try_claim(&self, task_id: i64, worker_id: &str) -> QueueResult<bool> {
        let now = Utc::now();
        let lease_until = now + self.lease_duration();
        let claimed = self
            .task_repo
            .try_claim(task_id, worker_id, now, lease_until)
            .await?;

        if claimed {
            debug!(
                "Worker {} 认领任务 {}，租约至 {}",
                worker_id,
                task_id,
                lease_until.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Ok(claimed)
    }

    async fn renew(&self, task_id: i64, worker_id: &str) -> QueueResult<()> {
        let lease_until = Utc::now() + self.lease_duration();
        let renewed = self
            .task_repo
            .renew_lease(task_id, worker_id, lease_until)
            .await?;

        if !renewed {
            return Err(QueueError::LeaseNotHeld {
                task_id,
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    async fn expire_sweep(&self) -> QueueResult<u64> {
        let released = self.task_repo.release_expired_leases(Utc::now()).await?;
        if released > 0 {
            info!("租约回收：{} 个任务重新排队", released);
        }
        Ok(released)
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use workqueue_core::traits::{WorkerRepository, WorkerWatchService};
use workqueue_core::QueueResult;

/// Worker巡检配置
#[derive(Debug, Clone)]
pub struct WorkerWatchConfig {
    /// 心跳超时时间（秒）
    pub heartbeat_timeout_seconds: i64,
}

impl Default for WorkerWatchConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 90,
        }
    }
}

/// Worker失效检测
///
/// 把心跳超时的Worker标记为 Down，仅用于运维可见性；
/// 失效Worker已认领任务的回收完全由租约过期机制完成，
/// 巡检不直接触碰任务状态。
pub struct WorkerFailureDetector {
    worker_repo: Arc<dyn WorkerRepository>,
    config: WorkerWatchConfig,
}

impl WorkerFailureDetector {
    pub fn new(worker_repo: Arc<dyn WorkerRepository>, config: Option<WorkerWatchConfig>) -> Self {
        Self {
            worker_repo,
            config: config.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl WorkerWatchService for WorkerFailureDetector {
    async fn sweep_stale_workers(&self) -> QueueResult<Vec<String>> {
        let cutoff = self.stale_cutoff(Utc::now());
        let stale = self.worker_repo.mark_down_stale(cutoff).await?;
        for worker_id in &stale {
            warn!(
                "Worker {} 心跳超过 {} 秒，标记为 Down",
                worker_id, self.config.heartbeat_timeout_seconds
            );
        }
        Ok(stale)
    }

    fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(self.config.heartbeat_timeout_seconds)
    }
}

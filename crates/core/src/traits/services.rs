//! 队列服务层接口定义
//!
//! 仓储之上的业务语义：入队、分派、租约、重试、进度上报。
//! 实现位于 `workqueue-dispatcher`（分派侧）和 `workqueue-worker`
//! （执行侧），通过 `Arc<dyn ...>` 注入，不直接访问全局状态。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::QueueResult;
use crate::models::{DependencyKind, NewTask, Task, TaskDependency, TaskStatusSummary};

/// 生产方服务接口：入队、建立依赖、显式重试
#[async_trait]
pub trait ProducerService: Send + Sync {
    /// 入队一个新任务
    async fn enqueue(&self, new_task: NewTask) -> QueueResult<Task>;

    /// 为已入队的任务添加前置依赖。
    /// 校验两端任务存在且新边不会构成环。
    async fn add_dependency(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
        kind: DependencyKind,
    ) -> QueueResult<TaskDependency>;

    /// 显式重试一个终态失败的任务；重试预算耗尽时返回
    /// [`QueueError::RetriesExhausted`](crate::QueueError::RetriesExhausted)
    async fn retry_task(&self, task_id: i64) -> QueueResult<Task>;
}

/// 分派服务接口：为请求任务的Worker选出并认领下一个可执行任务
#[async_trait]
pub trait DispatchService: Send + Sync {
    /// 认领下一个可执行任务。
    ///
    /// 返回 `None` 表示当前没有可用任务（包括认领预算内全部
    /// 输给并发竞争者的情况），调用方应稍后重试而不是阻塞等待。
    /// `capabilities` 仅作登记，目前不参与候选过滤。
    async fn next_task(&self, worker_id: &str, capabilities: &[String])
        -> QueueResult<Option<Task>>;

    /// 队列状态统计
    async fn queue_summary(&self) -> QueueResult<TaskStatusSummary>;
}

/// 租约服务接口
#[async_trait]
pub trait LeaseService: Send + Sync {
    /// 尝试认领指定任务
    async fn try_claim(&self, task_id: i64, worker_id: &str) -> QueueResult<bool>;

    /// 续约。独立于进度上报的轻量保活信号；
    /// 调用方不是当前持有者时返回错误。
    async fn renew(&self, task_id: i64, worker_id: &str) -> QueueResult<()>;

    /// 回收所有过期租约，返回回收的任务数
    async fn expire_sweep(&self) -> QueueResult<u64>;
}

/// 失败处理的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureOutcome {
    /// 已安排退避重试
    Retried { next_run_at: DateTime<Utc> },
    /// 终态失败，不再重试
    Terminal,
}

/// 重试策略服务接口：处理Worker上报的执行结果
#[async_trait]
pub trait RetryService: Send + Sync {
    /// 处理成功完成
    async fn handle_success(
        &self,
        task_id: i64,
        worker_id: &str,
        result_location: Option<&str>,
        result_metadata: Option<serde_json::Value>,
    ) -> QueueResult<()>;

    /// 处理执行失败：无条件累计错误，按请求与预算决定重试或终态
    async fn handle_failure(
        &self,
        task_id: i64,
        worker_id: &str,
        error: &str,
        retry_requested: bool,
    ) -> QueueResult<FailureOutcome>;

    /// 计算第 `retry_count` 次重试的退避目标时间
    fn next_retry_time(&self, retry_count: i32) -> DateTime<Utc>;
}

/// 进度上报服务接口
#[async_trait]
pub trait ProgressService: Send + Sync {
    /// 上报步骤进度。
    ///
    /// 更新任务的实时进度字段、在同一次写入中续约（保活副作用），
    /// 并追加一条不可变的进度事件。
    async fn report_progress(
        &self,
        task_id: i64,
        worker_id: &str,
        percent: f64,
        step_name: &str,
        message: Option<&str>,
        data: Option<serde_json::Value>,
    ) -> QueueResult<()>;
}

/// Worker巡检服务接口
#[async_trait]
pub trait WorkerWatchService: Send + Sync {
    /// 把心跳超时的 Alive Worker 标记为 Down，返回受影响的 id。
    /// 这些Worker已认领任务的回收完全由租约过期机制负责。
    async fn sweep_stale_workers(&self) -> QueueResult<Vec<String>>;

    /// 当前判定存活的截止时间
    fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc>;
}

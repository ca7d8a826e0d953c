//! 数据仓储层接口定义
//!
//! 队列存储是整个系统唯一的共享可变资源，所有状态变更都必须表达为
//! 针对存储的单次条件写入（compare-and-swap 语义）：带守卫条件的
//! `UPDATE ... WHERE`，命中零行即为被拒绝的转换。接口与实现分离，
//! 支持多种后端：
//! - 内存实现（单元测试、嵌入式场景）
//! - SQLite 实现
//! - PostgreSQL 实现
//!
//! 所有返回 `bool` 的方法表示条件写入是否命中；`false` 不是错误，
//! 而是并发竞争或守卫失败的正常结果，由上层服务决定如何处理。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::QueueResult;
use crate::models::{
    DependencyKind, ProgressEvent, Task, TaskDependency, TaskFilter, TaskStatusSummary, WorkerInfo,
};

/// 任务仓储接口
///
/// 管理任务记录的完整生命周期：入队、认领、续约、进度、完成、
/// 失败、重试与租约回收。认领与每一次状态迁移都是原子条件写入，
/// 这是"至多一个活跃Worker持有一个任务"不变量的唯一保障。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 持久化新任务，返回包含存储层生成 id 的任务
    async fn create(&self, task: &Task) -> QueueResult<Task>;

    /// 根据 id 获取任务
    async fn get_by_id(&self, id: i64) -> QueueResult<Option<Task>>;

    /// 按过滤条件查询任务列表
    async fn list(&self, filter: &TaskFilter) -> QueueResult<Vec<Task>>;

    /// 获取候选任务：状态可认领、到达 `next_run_at`、未被租用。
    ///
    /// 结果按优先级降序、创建时间升序排列（同优先级内 FIFO）。
    /// 排序仅在本次调用求值的瞬间有权威性，并发认领靠
    /// [`try_claim`](TaskRepository::try_claim) 仲裁。
    async fn fetch_claimable(&self, now: DateTime<Utc>, limit: i64) -> QueueResult<Vec<Task>>;

    /// 原子认领：仅当任务未被租用且处于可认领状态时成功。
    ///
    /// 成功时在同一次写入中设置租约持有者、租约窗口和
    /// `status = Processing`。返回 `false` 表示输给了并发的认领者。
    async fn try_claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// 续约：仅当调用方是当前租约持有者时延长到期时间
    async fn renew_lease(
        &self,
        id: i64,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// 回收过期租约：把所有租约已过期的 Processing 任务清除租约
    /// 字段并退回 Queued，不增加重试计数。返回回收的任务数。
    async fn release_expired_leases(&self, now: DateTime<Utc>) -> QueueResult<u64>;

    /// 更新实时进度字段，同一次写入中把租约延长到 `lease_until`。
    /// 以 `lease_owner = worker_id` 为守卫。
    async fn update_progress(
        &self,
        id: i64,
        worker_id: &str,
        percent: f64,
        step_name: &str,
        message: Option<&str>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// 标记成功完成：写入结果位置与元数据，进度置为 100%，
    /// 清除租约。以持有者为守卫。
    async fn mark_completed(
        &self,
        id: i64,
        worker_id: &str,
        result_location: Option<&str>,
        result_metadata: Option<&serde_json::Value>,
    ) -> QueueResult<bool>;

    /// 标记失败并安排退避重试：`retry_count` 与 `error_count` 各加一，
    /// 记录错误，设置 `next_run_at`，状态转为 Retry，清除租约。
    /// 守卫包含 `retry_count < max_retries`。
    async fn mark_retrying(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// 标记终态失败：`error_count` 加一，记录错误，清除租约
    async fn mark_failed(&self, id: i64, worker_id: &str, error: &str) -> QueueResult<bool>;

    /// 显式重试已终态失败的任务：Failed -> Retry，`retry_count` 加一，
    /// 设置 `next_run_at`。守卫包含 `status = Failed` 与重试预算。
    async fn requeue_failed(&self, id: i64, next_run_at: DateTime<Utc>) -> QueueResult<bool>;

    /// 各状态任务数量统计
    async fn status_summary(&self) -> QueueResult<TaskStatusSummary>;
}

/// 任务依赖仓储接口
///
/// 依赖图的成环校验由调度层的依赖检查服务负责，仓储只存边。
#[async_trait]
pub trait TaskDependencyRepository: Send + Sync {
    /// 添加依赖边
    async fn add(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
        kind: DependencyKind,
    ) -> QueueResult<TaskDependency>;

    /// 获取指定任务的全部前置依赖边
    async fn get_for_task(&self, task_id: i64) -> QueueResult<Vec<TaskDependency>>;

    /// 获取全量依赖边 `(task_id, prerequisite_task_id)`，用于成环检测
    async fn all_edges(&self) -> QueueResult<Vec<(i64, i64)>>;
}

/// Worker仓储接口
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    /// 注册或心跳更新（upsert）：已存在的Worker刷新心跳时间、
    /// 负载、能力并恢复 Alive 状态
    async fn heartbeat(&self, worker: &WorkerInfo) -> QueueResult<()>;

    /// 根据 id 获取Worker
    async fn get_by_id(&self, worker_id: &str) -> QueueResult<Option<WorkerInfo>>;

    /// 获取全部Worker
    async fn list(&self) -> QueueResult<Vec<WorkerInfo>>;

    /// 把心跳早于 `cutoff` 的 Alive Worker 标记为 Down，
    /// 返回受影响的Worker id
    async fn mark_down_stale(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<String>>;

    /// 注销Worker
    async fn remove(&self, worker_id: &str) -> QueueResult<()>;
}

/// 进度事件仓储接口
///
/// 只追加，不提供修改或删除操作。
#[async_trait]
pub trait ProgressEventRepository: Send + Sync {
    /// 追加一条进度事件
    async fn append(&self, event: &ProgressEvent) -> QueueResult<ProgressEvent>;

    /// 按时间顺序获取某任务的全部进度事件
    async fn get_by_task_id(&self, task_id: i64) -> QueueResult<Vec<ProgressEvent>>;
}

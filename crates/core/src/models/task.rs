use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务记录
///
/// 队列中的工作单元。一条记录同时承载调度信息、租约信息、
/// 重试状态和实时进度，是整个系统唯一的协调点。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符，由数据库生成
/// - `task_type`: 任务类型标签，如 "document_analysis"
/// - `source_ref`: 生产方实体的不透明引用（队列不解释其含义）
/// - `priority`: 优先级，数值越大越先被调度
/// - `payload`: 任务类型相关的配置，JSON 格式，对队列不透明
/// - `status`: 任务状态（见 [`TaskStatus`]）
/// - `next_run_at`: 下次可被调度的时间；新任务为创建时间，重试任务为退避目标时间
/// - `lease_owner` / `lease_started_at` / `lease_expires_at`: 租约字段，未被持有时全部为空
/// - `retry_count` / `max_retries` / `last_error` / `error_count`: 重试状态
/// - `progress_percent` / `current_step` / `progress_message`: 实时进度
/// - `result_location` / `result_metadata`: 执行结果
///
/// 不变量：`lease_owner` 非空时 `lease_expires_at` 必定非空；
/// 同一任务在任意时刻至多存在一个未过期的租约。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_type: String,
    pub source_ref: String,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub progress_percent: f64,
    pub current_step: Option<String>,
    pub progress_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub error_count: i32,
    pub lease_owner: Option<String>,
    pub lease_started_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub result_location: Option<String>,
    pub result_metadata: Option<serde_json::Value>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务状态
///
/// 封闭的状态机，所有合法转换由 [`TaskStatus::can_transition_to`] 枚举：
///
/// - `Queued` → `Processing`（认领成功）
/// - `Retry` → `Processing`（退避期满后认领）
/// - `Processing` → `Completed`（执行成功）
/// - `Processing` → `Failed`（执行失败且不再重试）
/// - `Processing` → `Retry`（执行失败且请求重试、预算未耗尽）
/// - `Processing` → `Queued`（租约过期被回收，不计入重试次数）
/// - `Failed` → `Retry`（显式重试请求且预算未耗尽）
///
/// `Completed` 是终态；`Failed` 在重试预算耗尽后也是终态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "RETRY")]
    Retry,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl TaskStatus {
    /// 判断到目标状态的转换是否合法
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Retry, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Retry)
                | (Processing, Queued)
                | (Failed, Retry)
        )
    }

    /// 是否处于可被认领的状态
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Retry)
    }

    /// 是否为终态（不含仍有重试预算的 Failed，由调用方结合预算判断）
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Retry => "RETRY",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "QUEUED" => Some(TaskStatus::Queued),
            "PROCESSING" => Some(TaskStatus::Processing),
            "RETRY" => Some(TaskStatus::Retry),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        TaskStatus::parse(s).ok_or_else(|| format!("Invalid task status: {s}").into())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        TaskStatus::parse(s).ok_or_else(|| format!("Invalid task status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 入队参数
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub source_ref: String,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub max_retries: i32,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            source_ref: source_ref.into(),
            priority: 0,
            payload: serde_json::json!({}),
            max_retries: 3,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// 任务查询过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub source_ref: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 各状态任务数量统计
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TaskStatusSummary {
    pub queued: u64,
    pub processing: u64,
    pub retry: u64,
    pub completed: u64,
    pub failed: u64,
}

impl TaskStatusSummary {
    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.retry + self.completed + self.failed
    }

    pub fn active(&self) -> u64 {
        self.queued + self.processing + self.retry
    }
}

impl Task {
    /// 由入队参数构造新任务，id 将由存储层生成
    pub fn new(new_task: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            task_type: new_task.task_type,
            source_ref: new_task.source_ref,
            priority: new_task.priority,
            payload: new_task.payload,
            status: TaskStatus::Queued,
            progress_percent: 0.0,
            current_step: None,
            progress_message: None,
            retry_count: 0,
            max_retries: new_task.max_retries,
            last_error: None,
            error_count: 0,
            lease_owner: None,
            lease_started_at: None,
            lease_expires_at: None,
            result_location: None,
            result_metadata: None,
            next_run_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// 当前是否持有租约
    pub fn is_leased(&self) -> bool {
        self.lease_owner.is_some()
    }

    /// 在给定时刻是否满足认领的时间与租约条件（依赖关系另行检查）
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && !self.is_leased() && self.next_run_at <= now
    }

    /// 重试预算是否仍有剩余
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        let all = [Queued, Processing, Retry, Completed, Failed];
        let legal = [
            (Queued, Processing),
            (Retry, Processing),
            (Processing, Completed),
            (Processing, Failed),
            (Processing, Retry),
            (Processing, Queued),
            (Failed, Retry),
        ];

        for from in all {
            for to in all {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "transition {from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_unconditional_exit() {
        use TaskStatus::*;
        for to in [Queued, Processing, Retry, Completed, Failed] {
            assert!(!Completed.can_transition_to(to));
        }
        // Failed 仅允许显式重试这一条出边
        assert!(Failed.can_transition_to(Retry));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Queued));
    }

    #[test]
    fn test_claimable_at() {
        let now = Utc::now();
        let mut task = Task::new(NewTask::new("document_analysis", "doc-1"));
        assert!(task.is_claimable_at(now + chrono::Duration::seconds(1)));

        task.next_run_at = now + chrono::Duration::minutes(10);
        assert!(!task.is_claimable_at(now));

        task.next_run_at = now;
        task.lease_owner = Some("worker-1".to_string());
        assert!(!task.is_claimable_at(now));

        task.lease_owner = None;
        task.status = TaskStatus::Completed;
        assert!(!task.is_claimable_at(now));
    }

    #[test]
    fn test_status_roundtrip() {
        use TaskStatus::*;
        for status in [Queued, Processing, Retry, Completed, Failed] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("RUNNING"), None);
    }
}

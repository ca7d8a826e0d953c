use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 进度事件
///
/// 只追加的审计记录。任务记录上的实时进度字段会被覆盖，
/// 进度事件则永不修改、永不删除，用于事后还原执行历史。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: i64,
    pub task_id: i64,
    pub step_name: String,
    pub step_status: StepStatus,
    pub percent: f64,
    pub message: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// 步骤状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepStatus {
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "STARTED",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<StepStatus> {
        match s {
            "STARTED" => Some(StepStatus::Started),
            "RUNNING" => Some(StepStatus::Running),
            "COMPLETED" => Some(StepStatus::Completed),
            "FAILED" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for StepStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for StepStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for StepStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        StepStatus::parse(s).ok_or_else(|| format!("Invalid step status: {s}").into())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for StepStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        StepStatus::parse(s).ok_or_else(|| format!("Invalid step status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for StepStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for StepStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl ProgressEvent {
    pub fn new(
        task_id: i64,
        step_name: impl Into<String>,
        step_status: StepStatus,
        percent: f64,
    ) -> Self {
        Self {
            id: 0,
            task_id,
            step_name: step_name.into(),
            step_status,
            percent,
            message: None,
            data: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务依赖边
///
/// 有向边：`task_id` 依赖 `prerequisite_task_id`。
/// 前置任务进入 `Completed` 状态之前，依赖方不会被调度。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    pub id: i64,
    pub task_id: i64,
    pub prerequisite_task_id: i64,
    pub kind: DependencyKind,
    pub created_at: DateTime<Utc>,
}

/// 依赖类型
///
/// 目前仅定义"前置任务必须成功完成"一种语义，保留枚举以便将来扩展。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DependencyKind {
    #[serde(rename = "COMPLETION")]
    Completion,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Completion => "COMPLETION",
        }
    }

    pub fn parse(s: &str) -> Option<DependencyKind> {
        match s {
            "COMPLETION" => Some(DependencyKind::Completion),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for DependencyKind {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for DependencyKind {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for DependencyKind {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        DependencyKind::parse(s).ok_or_else(|| format!("Invalid dependency kind: {s}").into())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DependencyKind {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        DependencyKind::parse(s).ok_or_else(|| format!("Invalid dependency kind: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for DependencyKind {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DependencyKind {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl TaskDependency {
    pub fn new(task_id: i64, prerequisite_task_id: i64, kind: DependencyKind) -> Self {
        Self {
            id: 0,
            task_id,
            prerequisite_task_id,
            kind,
            created_at: Utc::now(),
        }
    }
}

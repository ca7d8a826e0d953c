use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use workqueue_core::models::{DependencyKind, TaskDependency};
use workqueue_core::traits::TaskDependencyRepository;
use workqueue_core::{QueueError, QueueResult};

pub struct SqliteTaskDependencyRepository {
    pool: SqlitePool,
}

impl SqliteTaskDependencyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_dependency(row: &sqlx::sqlite::SqliteRow) -> QueueResult<TaskDependency> {
        Ok(TaskDependency {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            prerequisite_task_id: row.try_get("prerequisite_task_id")?,
            kind: row.try_get("kind")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TaskDependencyRepository for SqliteTaskDependencyRepository {
    async fn add(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
        kind: DependencyKind,
    ) -> QueueResult<TaskDependency> {
        let row = sqlx::query(
            "INSERT INTO task_dependencies (task_id, prerequisite_task_id, kind, created_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, task_id, prerequisite_task_id, kind, created_at",
        )
        .bind(task_id)
        .bind(prerequisite_task_id)
        .bind(kind)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        let created = Self::row_to_dependency(&row)?;
        debug!("添加依赖边: {} -> {}", task_id, prerequisite_task_id);
        Ok(created)
    }

    async fn get_for_task(&self, task_id: i64) -> QueueResult<Vec<TaskDependency>> {
        let rows = sqlx::query(
            "SELECT id, task_id, prerequisite_task_id, kind, created_at \
             FROM task_dependencies WHERE task_id = $1 ORDER BY id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        rows.iter().map(Self::row_to_dependency).collect()
    }

    async fn all_edges(&self) -> QueueResult<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            "SELECT task_id, prerequisite_task_id FROM task_dependencies ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<i64, _>("task_id")?,
                    row.try_get::<i64, _>("prerequisite_task_id")?,
                ))
            })
            .collect()
    }
}

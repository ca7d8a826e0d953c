use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use workqueue_core::models::ProgressEvent;
use workqueue_core::traits::ProgressEventRepository;
use workqueue_core::{QueueError, QueueResult};

pub struct SqliteProgressEventRepository {
    pool: SqlitePool,
}

impl SqliteProgressEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> QueueResult<ProgressEvent> {
        Ok(ProgressEvent {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            step_name: row.try_get("step_name")?,
            step_status: row.try_get("step_status")?,
            percent: row.try_get("percent")?,
            message: row.try_get("message")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ProgressEventRepository for SqliteProgressEventRepository {
    async fn append(&self, event: &ProgressEvent) -> QueueResult<ProgressEvent> {
        let row = sqlx::query(
            "INSERT INTO progress_events (task_id, step_name, step_status, percent, \
                 message, data, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, task_id, step_name, step_status, percent, message, data, created_at",
        )
        .bind(event.task_id)
        .bind(&event.step_name)
        .bind(event.step_status)
        .bind(event.percent)
        .bind(&event.message)
        .bind(&event.data)
        .bind(event.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Self::row_to_event(&row)
    }

    async fn get_by_task_id(&self, task_id: i64) -> QueueResult<Vec<ProgressEvent>> {
        let rows = sqlx::query(
            "SELECT id, task_id, step_name, step_status, percent, message, data, created_at \
             FROM progress_events WHERE task_id = $1 ORDER BY id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        rows.iter().map(Self::row_to_event).collect()
    }
}

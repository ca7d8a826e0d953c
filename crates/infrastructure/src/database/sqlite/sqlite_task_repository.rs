use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use workqueue_core::models::{Task, TaskFilter, TaskStatus, TaskStatusSummary};
use workqueue_core::traits::TaskRepository;
use workqueue_core::{QueueError, QueueResult};

const TASK_COLUMNS: &str = "id, task_type, source_ref, priority, payload, status, \
     progress_percent, current_step, progress_message, retry_count, max_retries, \
     last_error, error_count, lease_owner, lease_started_at, lease_expires_at, \
     result_location, result_metadata, next_run_at, created_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> QueueResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            source_ref: row.try_get("source_ref")?,
            priority: row.try_get("priority")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            progress_percent: row.try_get("progress_percent")?,
            current_step: row.try_get("current_step")?,
            progress_message: row.try_get("progress_message")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            last_error: row.try_get("last_error")?,
            error_count: row.try_get("error_count")?,
            lease_owner: row.try_get("lease_owner")?,
            lease_started_at: row.try_get("lease_started_at")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            result_location: row.try_get("result_location")?,
            result_metadata: row.try_get("result_metadata")?,
            next_run_at: row.try_get("next_run_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> QueueResult<Task> {
        let query = format!(
            "INSERT INTO tasks (task_type, source_ref, priority, payload, status, \
                 progress_percent, current_step, progress_message, retry_count, max_retries, \
                 last_error, error_count, lease_owner, lease_started_at, lease_expires_at, \
                 result_location, result_metadata, next_run_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&task.task_type)
            .bind(&task.source_ref)
            .bind(task.priority)
            .bind(&task.payload)
            .bind(task.status)
            .bind(task.progress_percent)
            .bind(&task.current_step)
            .bind(&task.progress_message)
            .bind(task.retry_count)
            .bind(task.max_retries)
            .bind(&task.last_error)
            .bind(task.error_count)
            .bind(&task.lease_owner)
            .bind(task.lease_started_at)
            .bind(task.lease_expires_at)
            .bind(&task.result_location)
            .bind(&task.result_metadata)
            .bind(task.next_run_at)
            .bind(task.created_at)
            .bind(task.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(QueueError::Database)?;

        let created = Self::row_to_task(&row)?;
        debug!("任务入队: id {} 类型 {}", created.id, created.task_type);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> QueueResult<Option<Task>> {
        let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueueError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &TaskFilter) -> QueueResult<Vec<Task>> {
        let mut query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1");
        let mut param_count = 0;

        if filter.status.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND status = ${param_count}"));
        }
        if filter.task_type.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND task_type = ${param_count}"));
        }
        if filter.source_ref.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND source_ref = ${param_count}"));
        }
        query.push_str(" ORDER BY id ASC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = filter.offset {
            query.push_str(&format!(" OFFSET {offset}"));
        }

        let mut sqlx_query = sqlx::query(&query);
        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status);
        }
        if let Some(task_type) = &filter.task_type {
            sqlx_query = sqlx_query.bind(task_type);
        }
        if let Some(source_ref) = &filter.source_ref {
            sqlx_query = sqlx_query.bind(source_ref);
        }

        let rows = sqlx_query
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::Database)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn fetch_claimable(&self, now: DateTime<Utc>, limit: i64) -> QueueResult<Vec<Task>> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status IN ('QUEUED', 'RETRY') AND lease_owner IS NULL AND next_run_at <= $1 \
             ORDER BY priority DESC, created_at ASC, id ASC LIMIT $2"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::Database)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn try_claim(
        &self,
        id: i64,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'PROCESSING', lease_owner = $2, \
                 lease_started_at = $3, lease_expires_at = $4, updated_at = $3 \
             WHERE id = $1 AND status IN ('QUEUED', 'RETRY') \
                 AND lease_owner IS NULL AND next_run_at <= $3",
        )
        .bind(id)
        .bind(worker_id)
        .bind(now)
        .bind(lease_until)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew_lease(
        &self,
        id: i64,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET lease_expires_at = $3, updated_at = $4 \
             WHERE id = $1 AND lease_owner = $2 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(worker_id)
        .bind(lease_until)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'QUEUED', lease_owner = NULL, \
                 lease_started_at = NULL, lease_expires_at = NULL, updated_at = $1 \
             WHERE status = 'PROCESSING' AND lease_expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        let released = result.rows_affected();
        if released > 0 {
            debug!("回收了 {} 个过期租约", released);
        }
        Ok(released)
    }

    async fn update_progress(
        &self,
        id: i64,
        worker_id: &str,
        percent: f64,
        step_name: &str,
        message: Option<&str>,
        lease_until: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET progress_percent = $3, current_step = $4, \
                 progress_message = $5, lease_expires_at = $6, updated_at = $7 \
             WHERE id = $1 AND lease_owner = $2 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(worker_id)
        .bind(percent)
        .bind(step_name)
        .bind(message)
        .bind(lease_until)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        id: i64,
        worker_id: &str,
        result_location: Option<&str>,
        result_metadata: Option<&serde_json::Value>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'COMPLETED', progress_percent = 100.0, \
                 result_location = $3, result_metadata = $4, lease_owner = NULL, \
                 lease_started_at = NULL, lease_expires_at = NULL, updated_at = $5 \
             WHERE id = $1 AND lease_owner = $2 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(worker_id)
        .bind(result_location)
        .bind(result_metadata)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_retrying(
        &self,
        id: i64,
        worker_id: &str,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'RETRY', retry_count = retry_count + 1, \
                 error_count = error_count + 1, last_error = $3, next_run_at = $4, \
                 lease_owner = NULL, lease_started_at = NULL, lease_expires_at = NULL, \
                 updated_at = $5 \
             WHERE id = $1 AND lease_owner = $2 AND status = 'PROCESSING' \
                 AND retry_count < max_retries",
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(next_run_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: i64, worker_id: &str, error: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'FAILED', error_count = error_count + 1, \
                 last_error = $3, lease_owner = NULL, lease_started_at = NULL, \
                 lease_expires_at = NULL, updated_at = $4 \
             WHERE id = $1 AND lease_owner = $2 AND status = 'PROCESSING'",
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue_failed(&self, id: i64, next_run_at: DateTime<Utc>) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'RETRY', retry_count = retry_count + 1, \
                 next_run_at = $2, updated_at = $3 \
             WHERE id = $1 AND status = 'FAILED' AND retry_count < max_retries",
        )
        .bind(id)
        .bind(next_run_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn status_summary(&self) -> QueueResult<TaskStatusSummary> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(QueueError::Database)?;

        let mut summary = TaskStatusSummary::default();
        for row in rows {
            let status: TaskStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let count = count.max(0) as u64;
            match status {
                TaskStatus::Queued => summary.queued = count,
                TaskStatus::Processing => summary.processing = count,
                TaskStatus::Retry => summary.retry = count,
                TaskStatus::Completed => summary.completed = count,
                TaskStatus::Failed => summary.failed = count,
            }
        }
        Ok(summary)
    }
}

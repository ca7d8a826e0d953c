use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use workqueue_core::models::WorkerInfo;
use workqueue_core::traits::WorkerRepository;
use workqueue_core::{QueueError, QueueResult};

pub struct SqliteWorkerRepository {
    pool: SqlitePool,
}

impl SqliteWorkerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &sqlx::sqlite::SqliteRow) -> QueueResult<WorkerInfo> {
        let capabilities: serde_json::Value = row.try_get("capabilities")?;
        Ok(WorkerInfo {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            capabilities: serde_json::from_value(capabilities)
                .map_err(|e| QueueError::Serialization(e.to_string()))?,
            current_load: row.try_get("current_load")?,
            max_concurrent: row.try_get("max_concurrent")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[async_trait]
impl WorkerRepository for SqliteWorkerRepository {
    async fn heartbeat(&self, worker: &WorkerInfo) -> QueueResult<()> {
        let capabilities = serde_json::to_value(&worker.capabilities)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO workers (id, kind, status, capabilities, current_load, \
                 max_concurrent, last_heartbeat, registered_at) \
             VALUES ($1, $2, 'ALIVE', $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET \
                 kind = excluded.kind, \
                 status = 'ALIVE', \
                 capabilities = excluded.capabilities, \
                 current_load = excluded.current_load, \
                 max_concurrent = excluded.max_concurrent, \
                 last_heartbeat = excluded.last_heartbeat",
        )
        .bind(&worker.id)
        .bind(&worker.kind)
        .bind(&capabilities)
        .bind(worker.current_load)
        .bind(worker.max_concurrent)
        .bind(worker.last_heartbeat)
        .bind(worker.registered_at)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        debug!("Worker {} 心跳更新，负载 {}", worker.id, worker.current_load);
        Ok(())
    }

    async fn get_by_id(&self, worker_id: &str) -> QueueResult<Option<WorkerInfo>> {
        let row = sqlx::query(
            "SELECT id, kind, status, capabilities, current_load, max_concurrent, \
                 last_heartbeat, registered_at \
             FROM workers WHERE id = $1",
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_worker(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> QueueResult<Vec<WorkerInfo>> {
        let rows = sqlx::query(
            "SELECT id, kind, status, capabilities, current_load, max_concurrent, \
                 last_heartbeat, registered_at \
             FROM workers ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn mark_down_stale(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<String>> {
        let rows = sqlx::query(
            "UPDATE workers SET status = 'DOWN' \
             WHERE status = 'ALIVE' AND last_heartbeat < $1 \
             RETURNING id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        let mut stale: Vec<String> = rows
            .iter()
            .map(|row| row.try_get::<String, _>("id").map_err(QueueError::from))
            .collect::<QueueResult<_>>()?;
        stale.sort();
        Ok(stale)
    }

    async fn remove(&self, worker_id: &str) -> QueueResult<()> {
        sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(QueueError::Database)?;
        Ok(())
    }
}

mod postgres_progress_event_repository;
mod postgres_task_dependency_repository;
mod postgres_task_repository;
mod postgres_worker_repository;

pub use postgres_progress_event_repository::PostgresProgressEventRepository;
pub use postgres_task_dependency_repository::PostgresTaskDependencyRepository;
pub use postgres_task_repository::PostgresTaskRepository;
pub use postgres_worker_repository::PostgresWorkerRepository;

/// PostgreSQL 建表语句（幂等）
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id BIGSERIAL PRIMARY KEY,
    task_type VARCHAR(255) NOT NULL,
    source_ref VARCHAR(255) NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    payload JSONB NOT NULL DEFAULT '{}',
    status VARCHAR(20) NOT NULL DEFAULT 'QUEUED',
    progress_percent DOUBLE PRECISION NOT NULL DEFAULT 0,
    current_step VARCHAR(255),
    progress_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    last_error TEXT,
    error_count INTEGER NOT NULL DEFAULT 0,
    lease_owner VARCHAR(255),
    lease_started_at TIMESTAMPTZ,
    lease_expires_at TIMESTAMPTZ,
    result_location TEXT,
    result_metadata JSONB,
    next_run_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_claimable
    ON tasks (status, next_run_at, priority);

CREATE TABLE IF NOT EXISTS task_dependencies (
    id BIGSERIAL PRIMARY KEY,
    task_id BIGINT NOT NULL,
    prerequisite_task_id BIGINT NOT NULL,
    kind VARCHAR(20) NOT NULL DEFAULT 'COMPLETION',
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (task_id, prerequisite_task_id)
);

CREATE INDEX IF NOT EXISTS idx_task_dependencies_task
    ON task_dependencies (task_id);

CREATE TABLE IF NOT EXISTS workers (
    id VARCHAR(255) PRIMARY KEY,
    kind VARCHAR(255) NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'ALIVE',
    capabilities JSONB NOT NULL DEFAULT '[]',
    current_load INTEGER NOT NULL DEFAULT 0,
    max_concurrent INTEGER NOT NULL DEFAULT 1,
    last_heartbeat TIMESTAMPTZ NOT NULL,
    registered_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS progress_events (
    id BIGSERIAL PRIMARY KEY,
    task_id BIGINT NOT NULL,
    step_name VARCHAR(255) NOT NULL,
    step_status VARCHAR(20) NOT NULL,
    percent DOUBLE PRECISION NOT NULL,
    message TEXT,
    data JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_progress_events_task
    ON progress_events (task_id, id);
"#;

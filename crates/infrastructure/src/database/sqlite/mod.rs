mod sqlite_progress_event_repository;
mod sqlite_task_dependency_repository;
mod sqlite_task_repository;
mod sqlite_worker_repository;

pub use sqlite_progress_event_repository::SqliteProgressEventRepository;
pub use sqlite_task_dependency_repository::SqliteTaskDependencyRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
pub use sqlite_worker_repository::SqliteWorkerRepository;

/// SQLite 建表语句（幂等）
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_type TEXT NOT NULL,
    source_ref TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'QUEUED',
    progress_percent REAL NOT NULL DEFAULT 0,
    current_step TEXT,
    progress_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    last_error TEXT,
    error_count INTEGER NOT NULL DEFAULT 0,
    lease_owner TEXT,
    lease_started_at TIMESTAMP,
    lease_expires_at TIMESTAMP,
    result_location TEXT,
    result_metadata TEXT,
    next_run_at TIMESTAMP NOT NULL,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_claimable
    ON tasks (status, next_run_at, priority);

CREATE TABLE IF NOT EXISTS task_dependencies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    prerequisite_task_id INTEGER NOT NULL,
    kind TEXT NOT NULL DEFAULT 'COMPLETION',
    created_at TIMESTAMP NOT NULL,
    UNIQUE (task_id, prerequisite_task_id)
);

CREATE INDEX IF NOT EXISTS idx_task_dependencies_task
    ON task_dependencies (task_id);

CREATE TABLE IF NOT EXISTS workers (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ALIVE',
    capabilities TEXT NOT NULL DEFAULT '[]',
    current_load INTEGER NOT NULL DEFAULT 0,
    max_concurrent INTEGER NOT NULL DEFAULT 1,
    last_heartbeat TIMESTAMP NOT NULL,
    registered_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS progress_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    step_name TEXT NOT NULL,
    step_status TEXT NOT NULL,
    percent REAL NOT NULL,
    message TEXT,
    data TEXT NOT NULL DEFAULT '{}',
    created_at TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_progress_events_task
    ON progress_events (task_id, id);
"#;

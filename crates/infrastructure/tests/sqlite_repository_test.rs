//! SQLite 后端的仓储集成测试
//!
//! 内存库使用单连接池：每个 SQLite `:memory:` 连接都是独立的数据库，
//! 多连接会导致建表结果互不可见。

use chrono::{Duration, Utc};
use serde_json::json;

use workqueue_core::models::{
    DependencyKind, NewTask, ProgressEvent, StepStatus, Task, TaskFilter, TaskStatus, WorkerInfo,
    WorkerStatus,
};
use workqueue_core::traits::{
    ProgressEventRepository, TaskDependencyRepository, TaskRepository, WorkerRepository,
};
use workqueue_infrastructure::DatabaseManager;

async fn setup() -> DatabaseManager {
    let manager = DatabaseManager::new("sqlite::memory:", 1)
        .await
        .expect("打开内存数据库失败");
    manager.migrate().await.expect("建表失败");
    manager
}

fn analysis_task() -> Task {
    Task::new(
        NewTask::new("document_analysis", "deck-42")
            .with_priority(1)
            .with_payload(json!({
                "kind": "document_analysis",
                "source_location": "s3://uploads/deck-42.pdf"
            })),
    )
}

#[tokio::test]
async fn test_enqueue_claim_progress_complete_roundtrip() {
    let manager = setup().await;
    let repo = manager.task_repository();

    let task = repo.create(&analysis_task()).await.unwrap();
    assert!(task.id > 0);
    assert_eq!(task.status, TaskStatus::Queued);

    let now = Utc::now();
    let candidates = repo.fetch_claimable(now, 10).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, task.id);

    let lease = now + Duration::seconds(300);
    assert!(repo.try_claim(task.id, "worker-a", now, lease).await.unwrap());
    assert!(!repo.try_claim(task.id, "worker-b", now, lease).await.unwrap());

    let extended = lease + Duration::seconds(300);
    assert!(repo
        .update_progress(task.id, "worker-a", 60.0, "analyze_slides", Some("第6页"), extended)
        .await
        .unwrap());

    let metadata = json!({"slides": 12});
    assert!(repo
        .mark_completed(task.id, "worker-a", Some("s3://results/deck-42"), Some(&metadata))
        .await
        .unwrap());

    let done = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress_percent, 100.0);
    assert_eq!(done.result_location.as_deref(), Some("s3://results/deck-42"));
    assert_eq!(done.result_metadata, Some(metadata));
    assert!(done.lease_owner.is_none());
    assert!(done.lease_expires_at.is_none());
}

#[tokio::test]
async fn test_expired_lease_sweep_reverts_to_queued() {
    let manager = setup().await;
    let repo = manager.task_repository();
    let task = repo.create(&analysis_task()).await.unwrap();

    let now = Utc::now();
    // 直接授予一个已经过期的租约来模拟Worker崩溃
    let expired_lease = now - Duration::seconds(10);
    assert!(repo
        .try_claim(task.id, "worker-a", now, expired_lease)
        .await
        .unwrap());

    assert_eq!(repo.release_expired_leases(now).await.unwrap(), 1);

    let reclaimed = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(reclaimed.status, TaskStatus::Queued);
    assert!(reclaimed.lease_owner.is_none());
    assert!(reclaimed.lease_started_at.is_none());
    assert!(reclaimed.lease_expires_at.is_none());
    // 租约过期回收不计入重试预算
    assert_eq!(reclaimed.retry_count, 0);
    assert_eq!(reclaimed.error_count, 0);
}

#[tokio::test]
async fn test_claimable_ordering_priority_then_fifo() {
    let manager = setup().await;
    let repo = manager.task_repository();

    let t0 = Utc::now() - Duration::seconds(30);
    let t1 = t0 + Duration::seconds(10);
    let t2 = t0 + Duration::seconds(20);

    let mut low_old = analysis_task();
    low_old.priority = 1;
    low_old.created_at = t0;
    let mut high = analysis_task();
    high.priority = 5;
    high.created_at = t1;
    let mut low_new = analysis_task();
    low_new.priority = 1;
    low_new.created_at = t2;

    let low_old = repo.create(&low_old).await.unwrap();
    let high = repo.create(&high).await.unwrap();
    let low_new = repo.create(&low_new).await.unwrap();

    let order: Vec<i64> = repo
        .fetch_claimable(Utc::now(), 10)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(order, vec![high.id, low_old.id, low_new.id]);
}

#[tokio::test]
async fn test_retry_budget_and_terminal_failure() {
    let manager = setup().await;
    let repo = manager.task_repository();

    let mut task = analysis_task();
    task.max_retries = 1;
    let task = repo.create(&task).await.unwrap();

    let now = Utc::now();
    assert!(repo
        .try_claim(task.id, "worker-a", now, now + Duration::seconds(300))
        .await
        .unwrap());
    assert!(repo
        .mark_retrying(task.id, "worker-a", "视觉模型超时", now)
        .await
        .unwrap());

    let retried = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(retried.status, TaskStatus::Retry);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.error_count, 1);
    assert_eq!(retried.last_error.as_deref(), Some("视觉模型超时"));

    // 预算耗尽：mark_retrying 的守卫拒绝，只能转终态失败
    let later = now + Duration::seconds(1);
    assert!(repo
        .try_claim(task.id, "worker-a", later, later + Duration::seconds(300))
        .await
        .unwrap());
    assert!(!repo
        .mark_retrying(task.id, "worker-a", "再次超时", later)
        .await
        .unwrap());
    assert!(repo.mark_failed(task.id, "worker-a", "再次超时").await.unwrap());

    let failed = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_count, 2);

    // 显式重试同样受预算约束
    assert!(!repo.requeue_failed(task.id, later).await.unwrap());
}

#[tokio::test]
async fn test_retry_task_not_claimable_before_next_run_at() {
    let manager = setup().await;
    let repo = manager.task_repository();
    let task = repo.create(&analysis_task()).await.unwrap();

    let now = Utc::now();
    assert!(repo
        .try_claim(task.id, "worker-a", now, now + Duration::seconds(300))
        .await
        .unwrap());
    let next_run_at = now + Duration::minutes(10);
    assert!(repo
        .mark_retrying(task.id, "worker-a", "瞬时错误", next_run_at)
        .await
        .unwrap());

    assert!(repo.fetch_claimable(now, 10).await.unwrap().is_empty());
    assert!(!repo
        .try_claim(task.id, "worker-b", now, now + Duration::seconds(300))
        .await
        .unwrap());

    let after_backoff = next_run_at + Duration::seconds(1);
    assert!(repo
        .try_claim(task.id, "worker-b", after_backoff, after_backoff + Duration::seconds(300))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_list_filter_and_status_summary() {
    let manager = setup().await;
    let repo = manager.task_repository();

    let first = repo.create(&analysis_task()).await.unwrap();
    let _second = repo.create(&analysis_task()).await.unwrap();

    let now = Utc::now();
    assert!(repo
        .try_claim(first.id, "worker-a", now, now + Duration::seconds(300))
        .await
        .unwrap());

    let processing = repo
        .list(&TaskFilter {
            status: Some(TaskStatus::Processing),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].id, first.id);

    let summary = repo.status_summary().await.unwrap();
    assert_eq!(summary.processing, 1);
    assert_eq!(summary.queued, 1);
    assert_eq!(summary.total(), 2);
}

#[tokio::test]
async fn test_dependency_edges_unique_constraint() {
    let manager = setup().await;
    let deps = manager.dependency_repository();

    deps.add(2, 1, DependencyKind::Completion).await.unwrap();
    assert!(deps.add(2, 1, DependencyKind::Completion).await.is_err());

    let edges = deps.all_edges().await.unwrap();
    assert_eq!(edges, vec![(2, 1)]);

    let for_task = deps.get_for_task(2).await.unwrap();
    assert_eq!(for_task.len(), 1);
    assert_eq!(for_task[0].prerequisite_task_id, 1);
    assert_eq!(for_task[0].kind, DependencyKind::Completion);
}

#[tokio::test]
async fn test_worker_heartbeat_upsert_and_stale_sweep() {
    let manager = setup().await;
    let workers = manager.worker_repository();

    let mut info = WorkerInfo::new(
        "worker-a",
        "document-analysis",
        vec!["document_analysis".to_string()],
        4,
    );
    workers.heartbeat(&info).await.unwrap();

    info.current_load = 3;
    info.last_heartbeat = Utc::now();
    workers.heartbeat(&info).await.unwrap();

    let stored = workers.get_by_id("worker-a").await.unwrap().unwrap();
    assert_eq!(stored.current_load, 3);
    assert_eq!(stored.capabilities, vec!["document_analysis".to_string()]);
    assert!(stored.is_alive());

    let stale = workers
        .mark_down_stale(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stale, vec!["worker-a".to_string()]);
    assert_eq!(
        workers.get_by_id("worker-a").await.unwrap().unwrap().status,
        WorkerStatus::Down
    );

    workers.remove("worker-a").await.unwrap();
    assert!(workers.get_by_id("worker-a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_progress_events_append_and_replay() {
    let manager = setup().await;
    let events = manager.progress_event_repository();

    for (step, status, percent) in [
        ("extract_text", StepStatus::Started, 0.0),
        ("extract_text", StepStatus::Completed, 30.0),
        ("analyze_slides", StepStatus::Running, 60.0),
    ] {
        events
            .append(
                &ProgressEvent::new(9, step, status, percent)
                    .with_message("流水线推进")
                    .with_data(json!({"page": 3})),
            )
            .await
            .unwrap();
    }

    let history = events.get_by_task_id(9).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(history[0].step_status, StepStatus::Started);
    assert_eq!(history[2].step_name, "analyze_slides");
    assert_eq!(history[2].data, json!({"page": 3}));
}

#[tokio::test]
async fn test_file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());

    let task_id = {
        let manager = DatabaseManager::new(&url, 1).await.unwrap();
        manager.migrate().await.unwrap();
        let task = manager.task_repository().create(&analysis_task()).await.unwrap();
        manager.close().await;
        task.id
    };

    let manager = DatabaseManager::new(&url, 1).await.unwrap();
    manager.migrate().await.unwrap();
    let task = manager
        .task_repository()
        .get_by_id(task_id)
        .await
        .unwrap()
        .expect("重新打开后任务应仍然存在");
    assert_eq!(task.task_type, "document_analysis");
    manager.close().await;
}

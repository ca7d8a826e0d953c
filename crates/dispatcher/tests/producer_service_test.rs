//! 生产方服务测试：入队校验、依赖写入、显式重试

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use workqueue_core::models::{DependencyKind, NewTask, TaskStatus};
use workqueue_core::traits::{ProducerService, TaskRepository};
use workqueue_core::QueueError;
use workqueue_dispatcher::{DependencyChecker, TaskProducerService, TaskRetryService};
use workqueue_infrastructure::MemoryStore;

struct Harness {
    task_repo: Arc<dyn TaskRepository>,
    producer: TaskProducerService,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let task_repo = store.task_repository();
    let dependency_repo = store.dependency_repository();
    let checker = Arc::new(DependencyChecker::new(
        task_repo.clone(),
        dependency_repo.clone(),
    ));
    let retry = Arc::new(TaskRetryService::new(task_repo.clone(), None));
    let producer = TaskProducerService::new(task_repo.clone(), dependency_repo, checker, retry);
    Harness {
        task_repo,
        producer,
    }
}

#[tokio::test]
async fn test_enqueue_persists_fields() {
    let h = harness();
    let task = h
        .producer
        .enqueue(
            NewTask::new("document_analysis", "deck-42")
                .with_priority(7)
                .with_payload(json!({
                    "kind": "document_analysis",
                    "source_location": "s3://uploads/deck-42.pdf",
                    "analysis_template": "standard"
                }))
                .with_max_retries(5),
        )
        .await
        .unwrap();

    assert!(task.id > 0);
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.priority, 7);
    assert_eq!(task.max_retries, 5);
    assert_eq!(task.payload["source_location"], "s3://uploads/deck-42.pdf");
    assert!(task.next_run_at <= Utc::now());
}

#[tokio::test]
async fn test_enqueue_rejects_invalid_params() {
    let h = harness();

    assert!(matches!(
        h.producer.enqueue(NewTask::new("", "doc")).await,
        Err(QueueError::InvalidTaskParams(_))
    ));
    assert!(matches!(
        h.producer.enqueue(NewTask::new("document_analysis", " ")).await,
        Err(QueueError::InvalidTaskParams(_))
    ));
    assert!(matches!(
        h.producer
            .enqueue(NewTask::new("document_analysis", "doc").with_max_retries(-1))
            .await,
        Err(QueueError::InvalidTaskParams(_))
    ));
}

#[tokio::test]
async fn test_add_dependency_validates_and_persists() {
    let h = harness();
    let t1 = h
        .producer
        .enqueue(NewTask::new("document_analysis", "doc"))
        .await
        .unwrap();
    let t2 = h
        .producer
        .enqueue(NewTask::new("document_analysis", "doc"))
        .await
        .unwrap();

    let edge = h
        .producer
        .add_dependency(t2.id, t1.id, DependencyKind::Completion)
        .await
        .unwrap();
    assert_eq!(edge.task_id, t2.id);
    assert_eq!(edge.prerequisite_task_id, t1.id);

    // 反向边会成环
    assert!(matches!(
        h.producer
            .add_dependency(t1.id, t2.id, DependencyKind::Completion)
            .await,
        Err(QueueError::CircularDependency)
    ));
    // 两端必须存在
    assert!(matches!(
        h.producer
            .add_dependency(t2.id, t2.id + 999, DependencyKind::Completion)
            .await,
        Err(QueueError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_retry_task_requires_failed_status() {
    let h = harness();
    let task = h
        .producer
        .enqueue(NewTask::new("document_analysis", "doc"))
        .await
        .unwrap();

    assert!(matches!(
        h.producer.retry_task(task.id).await,
        Err(QueueError::InvalidTransition { .. })
    ));
    assert!(matches!(
        h.producer.retry_task(task.id + 999).await,
        Err(QueueError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_retry_task_requeues_failed_with_backoff() {
    let h = harness();
    let task = h
        .producer
        .enqueue(NewTask::new("document_analysis", "doc"))
        .await
        .unwrap();

    let now = Utc::now();
    assert!(h
        .task_repo
        .try_claim(task.id, "worker-a", now, now + Duration::seconds(300))
        .await
        .unwrap());
    assert!(h
        .task_repo
        .mark_failed(task.id, "worker-a", "文件损坏")
        .await
        .unwrap());

    let requeued = h.producer.retry_task(task.id).await.unwrap();
    assert_eq!(requeued.status, TaskStatus::Retry);
    assert_eq!(requeued.retry_count, 1);
    // 显式重试同样走指数退避：5min × 2^1
    let delay = (requeued.next_run_at - Utc::now()).num_seconds();
    assert!((delay - 600).abs() <= 2, "实际延迟 {delay}s");
}

#[tokio::test]
async fn test_retry_task_rejected_when_budget_exhausted() {
    let h = harness();
    let task = h
        .producer
        .enqueue(NewTask::new("document_analysis", "doc").with_max_retries(0))
        .await
        .unwrap();

    let now = Utc::now();
    assert!(h
        .task_repo
        .try_claim(task.id, "worker-a", now, now + Duration::seconds(300))
        .await
        .unwrap());
    assert!(h
        .task_repo
        .mark_failed(task.id, "worker-a", "文件损坏")
        .await
        .unwrap());

    assert!(matches!(
        h.producer.retry_task(task.id).await,
        Err(QueueError::RetriesExhausted { .. })
    ));
}

//! 依赖检查测试：门控判断与成环拒绝

use std::sync::Arc;

use chrono::{Duration, Utc};

use workqueue_core::models::{DependencyKind, NewTask, Task};
use workqueue_core::traits::{TaskDependencyRepository, TaskRepository};
use workqueue_core::QueueError;
use workqueue_dispatcher::{DependencyCheckService, DependencyChecker};
use workqueue_infrastructure::MemoryStore;

struct Harness {
    task_repo: Arc<dyn TaskRepository>,
    dependency_repo: Arc<dyn TaskDependencyRepository>,
    checker: DependencyChecker,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let task_repo = store.task_repository();
    let dependency_repo = store.dependency_repository();
    let checker = DependencyChecker::new(task_repo.clone(), dependency_repo.clone());
    Harness {
        task_repo,
        dependency_repo,
        checker,
    }
}

async fn enqueue(h: &Harness) -> Task {
    h.task_repo
        .create(&Task::new(NewTask::new("document_analysis", "doc")))
        .await
        .unwrap()
}

async fn complete(h: &Harness, task_id: i64) {
    let now = Utc::now();
    assert!(h
        .task_repo
        .try_claim(task_id, "worker-x", now, now + Duration::seconds(300))
        .await
        .unwrap());
    assert!(h
        .task_repo
        .mark_completed(task_id, "worker-x", None, None)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_task_without_dependencies_can_execute() {
    let h = harness();
    let task = enqueue(&h).await;

    let result = h.checker.check_task(task.id).await.unwrap();
    assert!(result.can_execute);
    assert!(result.blocking_dependencies.is_empty());
    assert!(result.reason.is_none());
}

#[tokio::test]
async fn test_incomplete_prerequisite_blocks_until_completed() {
    let h = harness();
    let prerequisite = enqueue(&h).await;
    let dependent = enqueue(&h).await;
    h.dependency_repo
        .add(dependent.id, prerequisite.id, DependencyKind::Completion)
        .await
        .unwrap();

    let result = h.checker.check_task(dependent.id).await.unwrap();
    assert!(!result.can_execute);
    assert_eq!(result.blocking_dependencies, vec![prerequisite.id]);
    assert!(result.reason.is_some());

    complete(&h, prerequisite.id).await;

    let result = h.checker.check_task(dependent.id).await.unwrap();
    assert!(result.can_execute);
}

#[tokio::test]
async fn test_failed_prerequisite_still_blocks() {
    let h = harness();
    let prerequisite = enqueue(&h).await;
    let dependent = enqueue(&h).await;
    h.dependency_repo
        .add(dependent.id, prerequisite.id, DependencyKind::Completion)
        .await
        .unwrap();

    let now = Utc::now();
    assert!(h
        .task_repo
        .try_claim(prerequisite.id, "worker-x", now, now + Duration::seconds(300))
        .await
        .unwrap());
    assert!(h
        .task_repo
        .mark_failed(prerequisite.id, "worker-x", "解析失败")
        .await
        .unwrap());

    // 只有 Completed 满足依赖，Failed 不算
    let result = h.checker.check_task(dependent.id).await.unwrap();
    assert!(!result.can_execute);
}

#[tokio::test]
async fn test_missing_prerequisite_row_blocks() {
    let h = harness();
    let dependent = enqueue(&h).await;
    h.dependency_repo
        .add(dependent.id, dependent.id + 999, DependencyKind::Completion)
        .await
        .unwrap();

    let result = h.checker.check_task(dependent.id).await.unwrap();
    assert!(!result.can_execute);
}

#[tokio::test]
async fn test_self_dependency_rejected() {
    let h = harness();
    let task = enqueue(&h).await;

    assert!(matches!(
        h.checker.validate_new_dependency(task.id, task.id).await,
        Err(QueueError::CircularDependency)
    ));
}

#[tokio::test]
async fn test_unknown_task_rejected() {
    let h = harness();
    let task = enqueue(&h).await;

    assert!(matches!(
        h.checker.validate_new_dependency(task.id + 999, task.id).await,
        Err(QueueError::TaskNotFound { .. })
    ));
    assert!(matches!(
        h.checker.validate_new_dependency(task.id, task.id + 999).await,
        Err(QueueError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_cycle_detection_over_transitive_chain() {
    let h = harness();
    let a = enqueue(&h).await;
    let b = enqueue(&h).await;
    let c = enqueue(&h).await;

    // a -> b -> c 合法
    h.checker.validate_new_dependency(a.id, b.id).await.unwrap();
    h.dependency_repo
        .add(a.id, b.id, DependencyKind::Completion)
        .await
        .unwrap();
    h.checker.validate_new_dependency(b.id, c.id).await.unwrap();
    h.dependency_repo
        .add(b.id, c.id, DependencyKind::Completion)
        .await
        .unwrap();

    // c -> a 成环，必须拒绝
    assert!(h.checker.detect_cycle_with(c.id, a.id).await.unwrap());
    assert!(matches!(
        h.checker.validate_new_dependency(c.id, a.id).await,
        Err(QueueError::CircularDependency)
    ));

    // 无关的新边不受影响
    let d = enqueue(&h).await;
    assert!(!h.checker.detect_cycle_with(d.id, a.id).await.unwrap());
}

//! 分派服务测试：优先级排序、FIFO、依赖门控、并发互斥

use std::sync::Arc;

use chrono::{Duration, Utc};

use workqueue_core::models::{DependencyKind, NewTask, Task, TaskStatus};
use workqueue_core::traits::{
    DispatchService, LeaseService, TaskDependencyRepository, TaskRepository,
};
use workqueue_dispatcher::{
    DependencyChecker, DispatchConfig, TaskDispatchService, TaskLeaseService,
};
use workqueue_infrastructure::MemoryStore;

struct Harness {
    task_repo: Arc<dyn TaskRepository>,
    dependency_repo: Arc<dyn TaskDependencyRepository>,
    lease: Arc<TaskLeaseService>,
    dispatch: Arc<TaskDispatchService>,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let task_repo = store.task_repository();
    let dependency_repo = store.dependency_repository();
    let lease = Arc::new(TaskLeaseService::new(task_repo.clone(), None));
    let checker = Arc::new(DependencyChecker::new(
        task_repo.clone(),
        dependency_repo.clone(),
    ));
    let dispatch = Arc::new(TaskDispatchService::new(
        task_repo.clone(),
        lease.clone(),
        checker,
        Some(DispatchConfig {
            claim_batch_size: 16,
            claim_attempts: 3,
        }),
    ));
    Harness {
        task_repo,
        dependency_repo,
        lease,
        dispatch,
    }
}

async fn enqueue(h: &Harness, priority: i32) -> Task {
    h.task_repo
        .create(&Task::new(
            NewTask::new("document_analysis", "doc").with_priority(priority),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_empty_queue_returns_none() {
    let h = harness();
    let claimed = h.dispatch.next_task("worker-a", &[]).await.unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
async fn test_higher_priority_wins_regardless_of_age() {
    let h = harness();
    let low = enqueue(&h, 1).await;
    let high = enqueue(&h, 5).await;
    assert!(low.created_at <= high.created_at);

    let claimed = h.dispatch.next_task("worker-a", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, high.id);
    assert_eq!(claimed.status, TaskStatus::Processing);
    assert_eq!(claimed.lease_owner.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn test_fifo_within_same_priority() {
    let h = harness();

    let mut older = Task::new(NewTask::new("document_analysis", "doc").with_priority(3));
    older.created_at = Utc::now() - Duration::seconds(60);
    let older = h.task_repo.create(&older).await.unwrap();
    let newer = enqueue(&h, 3).await;

    let claimed = h.dispatch.next_task("worker-a", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, older.id);

    let claimed = h.dispatch.next_task("worker-b", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, newer.id);
}

#[tokio::test]
async fn test_dependency_gating_end_to_end() {
    let h = harness();

    // T2 优先级更高但依赖 T1，门控必须压过优先级
    let t1 = enqueue(&h, 1).await;
    let t2 = enqueue(&h, 10).await;
    h.dependency_repo
        .add(t2.id, t1.id, DependencyKind::Completion)
        .await
        .unwrap();

    let claimed = h.dispatch.next_task("worker-a", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, t1.id);

    // T1 仍在执行中，T2 不可认领
    assert!(h.dispatch.next_task("worker-b", &[]).await.unwrap().is_none());

    assert!(h
        .task_repo
        .mark_completed(t1.id, "worker-a", Some("s3://results/t1"), None)
        .await
        .unwrap());

    let claimed = h.dispatch.next_task("worker-b", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, t2.id);
}

#[tokio::test]
async fn test_prerequisite_missing_from_store_blocks_dispatch() {
    let h = harness();
    let task = enqueue(&h, 1).await;
    // 直接写入指向不存在任务的边（绕过生产方校验）
    h.dependency_repo
        .add(task.id, task.id + 1000, DependencyKind::Completion)
        .await
        .unwrap();

    assert!(h.dispatch.next_task("worker-a", &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_dispatch_claims_each_task_once() {
    let h = harness();
    let mut expected: Vec<i64> = Vec::new();
    for _ in 0..4 {
        expected.push(enqueue(&h, 1).await.id);
    }

    let mut handles = Vec::new();
    for i in 0..8 {
        let dispatch = h.dispatch.clone();
        handles.push(tokio::spawn(async move {
            dispatch.next_task(&format!("worker-{i}"), &[]).await
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(task) = handle.await.unwrap().unwrap() {
            claimed.push(task.id);
        }
    }

    claimed.sort_unstable();
    expected.sort_unstable();
    // 每个任务恰好被认领一次，竞争失败方拿到 None 而不是错误
    assert_eq!(claimed, expected);
}

#[tokio::test]
async fn test_dispatch_sweeps_expired_leases_first() {
    let h = harness();
    let task = enqueue(&h, 1).await;

    // 模拟崩溃Worker：租约已过期但尚未被回收
    let now = Utc::now();
    assert!(h
        .task_repo
        .try_claim(task.id, "worker-dead", now, now - Duration::seconds(5))
        .await
        .unwrap());

    let claimed = h.dispatch.next_task("worker-b", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);
    assert_eq!(claimed.lease_owner.as_deref(), Some("worker-b"));
    // 回收不计入重试预算
    assert_eq!(claimed.retry_count, 0);
}

#[tokio::test]
async fn test_queue_summary_counts() {
    let h = harness();
    enqueue(&h, 1).await;
    let claimed = {
        enqueue(&h, 1).await;
        h.dispatch.next_task("worker-a", &[]).await.unwrap().unwrap()
    };
    assert_eq!(claimed.status, TaskStatus::Processing);

    let summary = h.dispatch.queue_summary().await.unwrap();
    assert_eq!(summary.processing, 1);
    assert_eq!(summary.queued, 1);
    assert_eq!(summary.total(), 2);
}

#[tokio::test]
async fn test_lease_service_renew_only_for_holder() {
    let h = harness();
    let task = enqueue(&h, 1).await;
    assert!(h.lease.try_claim(task.id, "worker-a").await.unwrap());

    h.lease.renew(task.id, "worker-a").await.unwrap();
    assert!(h.lease.renew(task.id, "worker-b").await.is_err());
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::debug;

use workqueue_core::models::{ProgressEvent, StepStatus};
use workqueue_core::traits::{ProgressEventRepository, ProgressService, TaskRepository};
use workqueue_core::{QueueError, QueueResult};

/// Progress reporter backed by the shared store.
///
/// Every report does three things in order: updates the task's live
/// progress fields, extends the lease in the same conditional write
/// (the report doubles as a liveness heartbeat), and appends an
/// immutable progress event for audit history. A report from a worker
/// that no longer holds the lease is rejected and leaves no trace.
pub struct TaskProgressReporter {
    task_repo: Arc<dyn TaskRepository>,
    event_repo: Arc<dyn ProgressEventRepository>,
    lease_duration: Duration,
}

impl TaskProgressReporter {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        event_repo: Arc<dyn ProgressEventRepository>,
        lease_duration_seconds: i64,
    ) -> Self {
        Self {
            task_repo,
            event_repo,
            lease_duration: Duration::seconds(lease_duration_seconds),
        }
    }
}

#[async_trait]
impl ProgressService for TaskProgressReporter {
    async fn report_progress(
        &self,
        task_id: i64,
        worker_id: &str,
        percent: f64,
        step_name: &str,
        message: Option<&str>,
        data: Option<serde_json::Value>,
    ) -> QueueResult<()> {
        let lease_until = Utc::now() + self.lease_duration;
        let updated = self
            .task_repo
            .update_progress(task_id, worker_id, percent, step_name, message, lease_until)
            .await?;
        if !updated {
            return Err(QueueError::LeaseNotHeld {
                task_id,
                worker_id: worker_id.to_string(),
            });
        }

        let step_status = if percent >= 100.0 {
            StepStatus::Completed
        } else {
            StepStatus::Running
        };
        let mut event = ProgressEvent::new(task_id, step_name, step_status, percent);
        if let Some(message) = message {
            event = event.with_message(message);
        }
        if let Some(data) = data {
            event = event.with_data(data);
        }
        self.event_repo.append(&event).await?;

        debug!("Task {task_id} progress {percent:.1}% at step {step_name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use workqueue_core::models::{NewTask, Task};
    use workqueue_infrastructure::MemoryStore;

    async fn setup() -> (MemoryStore, TaskProgressReporter, i64) {
        let store = MemoryStore::new();
        let task_repo = store.task_repository();
        let task = task_repo
            .create(&Task::new(NewTask::new("document_analysis", "doc")))
            .await
            .unwrap();
        let now = Utc::now();
        assert!(task_repo
            .try_claim(task.id, "worker-a", now, now + Duration::seconds(60))
            .await
            .unwrap());

        let reporter = TaskProgressReporter::new(
            task_repo,
            store.progress_event_repository(),
            300,
        );
        (store, reporter, task.id)
    }

    #[tokio::test]
    async fn test_report_updates_live_fields_and_appends_event() {
        let (store, reporter, task_id) = setup().await;
        let before = Utc::now();

        reporter
            .report_progress(
                task_id,
                "worker-a",
                40.0,
                "extract_text",
                Some("page 4 of 10"),
                Some(json!({"page": 4})),
            )
            .await
            .unwrap();

        let task = store
            .task_repository()
            .get_by_id(task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.progress_percent, 40.0);
        assert_eq!(task.current_step.as_deref(), Some("extract_text"));
        assert_eq!(task.progress_message.as_deref(), Some("page 4 of 10"));
        // the report renewed the lease
        assert!(task.lease_expires_at.unwrap() >= before + Duration::seconds(290));

        let events = store
            .progress_event_repository()
            .get_by_task_id(task_id)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step_status, StepStatus::Running);
        assert_eq!(events[0].data, json!({"page": 4}));
    }

    #[tokio::test]
    async fn test_full_percent_records_completed_step() {
        let (store, reporter, task_id) = setup().await;

        reporter
            .report_progress(task_id, "worker-a", 100.0, "finalize", None, None)
            .await
            .unwrap();

        let events = store
            .progress_event_repository()
            .get_by_task_id(task_id)
            .await
            .unwrap();
        assert_eq!(events[0].step_status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_report_from_non_holder_is_rejected_without_event() {
        let (store, reporter, task_id) = setup().await;

        let result = reporter
            .report_progress(task_id, "worker-b", 50.0, "extract_text", None, None)
            .await;
        assert!(matches!(result, Err(QueueError::LeaseNotHeld { .. })));

        // no audit row for a rejected report
        assert!(store
            .progress_event_repository()
            .get_by_task_id(task_id)
            .await
            .unwrap()
            .is_empty());
        let task = store
            .task_repository()
            .get_by_id(task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.progress_percent, 0.0);
    }
}

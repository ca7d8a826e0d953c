use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info};

use workqueue_core::config::WorkerConfig;
use workqueue_core::models::WorkerInfo;
use workqueue_core::traits::WorkerRepository;
use workqueue_core::QueueResult;

/// Periodic worker registration heartbeats.
///
/// The registration is advisory: the dispatcher reads it for
/// operational visibility but does not gate dispatch on it. Task-level
/// liveness is carried by leases, not by these heartbeats.
pub struct HeartbeatManager {
    worker_id: String,
    config: WorkerConfig,
    worker_repo: Arc<dyn WorkerRepository>,
    active_tasks: Arc<AtomicI32>,
}

impl HeartbeatManager {
    pub fn new(
        worker_id: String,
        config: WorkerConfig,
        worker_repo: Arc<dyn WorkerRepository>,
        active_tasks: Arc<AtomicI32>,
    ) -> Self {
        Self {
            worker_id,
            config,
            worker_repo,
            active_tasks,
        }
    }

    fn current_info(&self) -> WorkerInfo {
        let mut info = WorkerInfo::new(
            self.worker_id.clone(),
            self.config.kind.clone(),
            self.config.capabilities.clone(),
            self.config.max_concurrent_tasks,
        );
        info.current_load = self.active_tasks.load(Ordering::SeqCst);
        info.last_heartbeat = Utc::now();
        info
    }

    /// Sends a single registration/heartbeat upsert.
    pub async fn beat(&self) -> QueueResult<()> {
        self.worker_repo.heartbeat(&self.current_info()).await
    }

    /// Spawns the background heartbeat loop.
    pub fn start_heartbeat_task(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let mut heartbeat_interval =
            interval(Duration::from_secs(self.config.heartbeat_interval_seconds));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        if let Err(e) = self.beat().await {
                            error!("Failed to send worker heartbeat: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Heartbeat task shutting down");
                        if let Err(e) = self.worker_repo.remove(&self.worker_id).await {
                            error!("Failed to unregister worker: {e}");
                        }
                        break;
                    }
                }
            }
        })
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use workqueue_core::models::TaskStatus;
use workqueue_core::traits::{TaskDependencyRepository, TaskRepository};
use workqueue_core::{QueueError, QueueResult};

/// 依赖检查服务接口
#[async_trait]
pub trait DependencyCheckService: Send + Sync {
    /// 检查任务的全部前置依赖是否满足
    async fn check_task(&self, task_id: i64) -> QueueResult<DependencyCheckResult>;

    /// 校验一条待添加的依赖边：两端任务存在且不会构成环
    async fn validate_new_dependency(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
    ) -> QueueResult<()>;

    /// 判断加入新边后依赖图是否含环
    async fn detect_cycle_with(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
    ) -> QueueResult<bool>;
}

#[derive(Debug, Clone)]
pub struct DependencyCheckResult {
    pub can_execute: bool,
    pub blocking_dependencies: Vec<i64>,
    pub reason: Option<String>,
}

pub struct DependencyChecker {
    task_repo: Arc<dyn TaskRepository>,
    dependency_repo: Arc<dyn TaskDependencyRepository>,
}

impl DependencyChecker {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        dependency_repo: Arc<dyn TaskDependencyRepository>,
    ) -> Self {
        Self {
            task_repo,
            dependency_repo,
        }
    }

    /// 单个前置任务是否满足：状态必须是 Completed。
    /// 前置任务记录缺失按未满足处理。
    async fn prerequisite_satisfied(&self, prerequisite_task_id: i64) -> QueueResult<bool> {
        match self.task_repo.get_by_id(prerequisite_task_id).await? {
            Some(task) if task.status == TaskStatus::Completed => Ok(true),
            Some(task) => {
                debug!(
                    "前置任务 {} 状态为 {:?}，依赖未满足",
                    prerequisite_task_id, task.status
                );
                Ok(false)
            }
            None => {
                debug!("前置任务 {} 不存在，依赖未满足", prerequisite_task_id);
                Ok(false)
            }
        }
    }

    /// Kahn 拓扑排序检测成环：无法完全消去时图中必有环
    fn has_cycle(graph: &HashMap<i64, Vec<i64>>) -> bool {
        let mut in_degree: HashMap<i64, usize> = HashMap::new();
        for &node in graph.keys() {
            in_degree.entry(node).or_insert(0);
        }
        for targets in graph.values() {
            for &target in targets {
                *in_degree.entry(target).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<i64> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&node, _)| node)
            .collect();

        let mut processed = 0usize;
        let total = in_degree.len();
        while let Some(node) = queue.pop_front() {
            processed += 1;
            if let Some(targets) = graph.get(&node) {
                for &target in targets {
                    if let Some(degree) = in_degree.get_mut(&target) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(target);
                        }
                    }
                }
            }
        }
        processed < total
    }
}

#[async_trait]
impl DependencyCheckService for DependencyChecker {
    async fn check_task(&self, task_id: i64) -> QueueResult<DependencyCheckResult> {
        let dependencies = self.dependency_repo.get_for_task(task_id).await?;
        if dependencies.is_empty() {
            return Ok(DependencyCheckResult {
                can_execute: true,
                blocking_dependencies: Vec::new(),
                reason: None,
            });
        }

        let mut blocking_dependencies = Vec::new();
        for dependency in &dependencies {
            if !self
                .prerequisite_satisfied(dependency.prerequisite_task_id)
                .await?
            {
                blocking_dependencies.push(dependency.prerequisite_task_id);
            }
        }

        let can_execute = blocking_dependencies.is_empty();
        let reason = (!can_execute).then(|| {
            format!("以下前置任务尚未完成: {blocking_dependencies:?}")
        });

        Ok(DependencyCheckResult {
            can_execute,
            blocking_dependencies,
            reason,
        })
    }

    async fn validate_new_dependency(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
    ) -> QueueResult<()> {
        if task_id == prerequisite_task_id {
            return Err(QueueError::CircularDependency);
        }
        if self.task_repo.get_by_id(task_id).await?.is_none() {
            return Err(QueueError::TaskNotFound { id: task_id });
        }
        if self
            .task_repo
            .get_by_id(prerequisite_task_id)
            .await?
            .is_none()
        {
            return Err(QueueError::TaskNotFound {
                id: prerequisite_task_id,
            });
        }
        if self.detect_cycle_with(task_id, prerequisite_task_id).await? {
            return Err(QueueError::CircularDependency);
        }
        Ok(())
    }

    async fn detect_cycle_with(
        &self,
        task_id: i64,
        prerequisite_task_id: i64,
    ) -> QueueResult<bool> {
        let mut graph: HashMap<i64, Vec<i64>> = HashMap::new();
        for (from, to) in self.dependency_repo.all_edges().await? {
            graph.entry(from).or_default().push(to);
        }
        graph.entry(task_id).or_default().push(prerequisite_task_id);

        let has_cycle = Self::has_cycle(&graph);
        if has_cycle {
            warn!(
                "检测到循环依赖，拒绝新边: {} -> {}",
                task_id, prerequisite_task_id
            );
        }
        Ok(has_cycle)
    }
}

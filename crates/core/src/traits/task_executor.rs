//! 任务执行器接口
//!
//! 真正的流水线逻辑（文档解析、模型调用等）是队列之外的协作方，
//! 通过该接口接入：Worker认领任务后把执行上下文交给匹配的执行器，
//! 执行器经 [`ProgressService`] 流式上报进度，最终返回执行结果。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::QueueResult;
use crate::models::Task;
use crate::traits::services::ProgressService;

/// 执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: i64,
    pub task_type: String,
    pub source_ref: String,
    pub payload: Value,
    pub retry_count: i32,
    pub worker_id: String,
}

impl TaskContext {
    pub fn from_task(task: &Task, worker_id: impl Into<String>) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            source_ref: task.source_ref.clone(),
            payload: task.payload.clone(),
            retry_count: task.retry_count,
            worker_id: worker_id.into(),
        }
    }
}

/// 执行结果
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub result_location: Option<String>,
    pub result_metadata: Option<Value>,
    pub error_message: Option<String>,
    /// 失败时是否请求重试。租约过期导致的回收不经过该路径。
    pub retry_requested: bool,
}

impl TaskOutcome {
    pub fn success(result_location: Option<String>, result_metadata: Option<Value>) -> Self {
        Self {
            success: true,
            result_location,
            result_metadata,
            error_message: None,
            retry_requested: false,
        }
    }

    pub fn failure(error_message: impl Into<String>, retry_requested: bool) -> Self {
        Self {
            success: false,
            result_location: None,
            result_metadata: None,
            error_message: Some(error_message.into()),
            retry_requested,
        }
    }
}

/// 任务执行器接口
///
/// 任务必须按"至少一次"语义设计：租约过期回收后此前的部分工作
/// 会被丢弃并从头重新执行，执行器需要保证幂等。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 该执行器支持的任务类型标签
    fn supported_task_type(&self) -> &str;

    /// 执行任务
    async fn execute(
        &self,
        context: &TaskContext,
        progress: Arc<dyn ProgressService>,
    ) -> QueueResult<TaskOutcome>;
}

use thiserror::Error;

use crate::models::TaskStatus;

/// 队列错误类型定义
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("检测到循环依赖")]
    CircularDependency,

    #[error("任务 {id} 的重试次数已耗尽")]
    RetriesExhausted { id: i64 },

    #[error("Worker {worker_id} 不持有任务 {task_id} 的租约")]
    LeaseNotHeld { task_id: i64, worker_id: String },

    #[error("非法的状态转换: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("没有支持任务类型 {task_type} 的执行器")]
    ExecutorNotFound { task_type: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type QueueResult<T> = std::result::Result<T, QueueError>;

//! 队列调度侧服务
//!
//! 实现任务的分派（候选选取 + 原子认领）、租约管理与过期回收、
//! 失败重试策略、依赖检查以及生产方入队接口。所有状态变更最终
//! 落在仓储层的单次条件写入上，本层只做策略与编排。

pub mod dependency_checker;
pub mod dispatch_service;
pub mod lease_service;
pub mod producer_service;
pub mod retry_service;
pub mod worker_watch;

pub use dependency_checker::{DependencyCheckResult, DependencyCheckService, DependencyChecker};
pub use dispatch_service::{DispatchConfig, TaskDispatchService};
pub use lease_service::{LeaseConfig, TaskLeaseService};
pub use producer_service::TaskProducerService;
pub use retry_service::{RetryConfig, TaskRetryService};
pub use worker_watch::{WorkerFailureDetector, WorkerWatchConfig};

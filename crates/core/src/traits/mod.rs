pub mod repository;
pub mod services;
pub mod task_executor;

pub use repository::{
    ProgressEventRepository, TaskDependencyRepository, TaskRepository, WorkerRepository,
};
pub use services::{
    DispatchService, FailureOutcome, LeaseService, ProducerService, ProgressService, RetryService,
    WorkerWatchService,
};
pub use task_executor::{TaskContext, TaskExecutor, TaskOutcome};

pub mod dependency;
pub mod payload;
pub mod progress;
pub mod task;
pub mod worker;

pub use dependency::{DependencyKind, TaskDependency};
pub use payload::TaskPayload;
pub use progress::{ProgressEvent, StepStatus};
pub use task::{NewTask, Task, TaskFilter, TaskStatus, TaskStatusSummary};
pub use worker::{WorkerInfo, WorkerStatus};

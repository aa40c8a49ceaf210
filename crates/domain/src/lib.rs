pub mod execution;
pub mod ports;
pub mod task;

pub use execution::{ExecutionRecord, ExecutionResult, LoadStats, RunOutput};
pub use ports::{ExecutionContext, KindExecutor, Notifier, TaskStore};
pub use task::{Task, TaskPatch, TaskPriority, TaskStatus, HISTORY_LIMIT};

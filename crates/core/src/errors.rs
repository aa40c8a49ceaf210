use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效的调度表达式: {expr} - {message}")]
    InvalidExpression { expr: String, message: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务执行错误: {0}")]
    ExecutionFailure(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("损坏的任务记录 {file}: {message}")]
    CorruptRecord { file: String, message: String },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
}

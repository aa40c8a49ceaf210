pub mod config;
pub mod errors;
pub mod logging;

pub use config::{AppConfig, LogConfig, NotifierConfig, SchedulerConfig};
pub use errors::SchedulerError;
pub use logging::init_logging;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

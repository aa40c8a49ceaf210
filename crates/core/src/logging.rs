use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::{SchedulerError, SchedulerResult};

/// 初始化全局日志
///
/// 日志级别优先读取 `RUST_LOG` 环境变量，否则使用配置中的级别。
pub fn init_logging(config: &LogConfig) -> SchedulerResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let result = match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        "text" => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        other => {
            return Err(SchedulerError::Configuration(format!(
                "不支持的日志格式: {other}"
            )))
        }
    };

    result.map_err(|e| SchedulerError::Configuration(format!("初始化日志失败: {e}")))
}

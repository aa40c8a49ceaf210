use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 应用配置
///
/// 配置加载顺序: 内置默认值 -> TOML配置文件(可选) -> `CRONBOX_`前缀的环境变量。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 任务数据目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 最大并发任务数
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// 默认任务超时时间（秒）
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// 默认最大重试次数
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// 默认重试间隔（秒）
    #[serde(default = "default_retry_interval_seconds")]
    pub default_retry_interval_seconds: u64,
    /// 达到并发上限时的延迟重试间隔（秒）
    #[serde(default = "default_admission_backoff_seconds")]
    pub admission_backoff_seconds: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 日志格式: "text" 或 "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// 通知配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Webhook通知地址，为空时仅记录日志
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/tasks")
}

fn default_max_concurrent_tasks() -> usize {
    5
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval_seconds() -> u64 {
    60
}

fn default_admission_backoff_seconds() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            default_timeout_seconds: default_timeout_seconds(),
            default_max_retries: default_max_retries(),
            default_retry_interval_seconds: default_retry_interval_seconds(),
            admission_backoff_seconds: default_admission_backoff_seconds(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scheduler: SchedulerConfig::default(),
            log: LogConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载配置
    ///
    /// `path`为None时仅使用默认值和环境变量；配置文件不存在时不报错。
    pub fn load(path: Option<&Path>) -> SchedulerResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).required(false),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("CRONBOX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("构建配置失败: {e}")))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| SchedulerError::Configuration(format!("解析配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置合法性
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.scheduler.max_concurrent_tasks == 0 {
            return Err(SchedulerError::Configuration(
                "max_concurrent_tasks 必须大于0".to_string(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(SchedulerError::Configuration(
                "data_dir 不能为空".to_string(),
            ));
        }
        if self.log.format != "text" && self.log.format != "json" {
            return Err(SchedulerError::Configuration(format!(
                "不支持的日志格式: {}",
                self.log.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.max_concurrent_tasks, 5);
        assert_eq!(config.scheduler.default_timeout_seconds, 3600);
        assert_eq!(config.scheduler.default_max_retries, 3);
        assert_eq!(config.scheduler.default_retry_interval_seconds, 60);
        assert_eq!(config.scheduler.admission_backoff_seconds, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
data_dir = "/tmp/cronbox-test/tasks"

[scheduler]
max_concurrent_tasks = 2
admission_backoff_seconds = 1

[log]
level = "debug"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/cronbox-test/tasks"));
        assert_eq!(config.scheduler.max_concurrent_tasks, 2);
        assert_eq!(config.scheduler.admission_backoff_seconds, 1);
        // 未写的字段保持默认值
        assert_eq!(config.scheduler.default_max_retries, 3);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/cronbox.toml"))).unwrap();
        assert_eq!(config.scheduler.max_concurrent_tasks, 5);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.scheduler.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_log_format() {
        let mut config = AppConfig::default();
        config.log.format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cronbox_core::{SchedulerError, SchedulerResult};
use cronbox_domain::{ExecutionContext, KindExecutor, RunOutput};

use super::parse_params;

/// 系统操作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SystemOperation {
    Shutdown,
    Reboot,
    Sleep,
}

/// 系统操作任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemTaskParams {
    pub operation: SystemOperation,
    /// 执行延迟（分钟，仅关机/重启支持）
    #[serde(default)]
    pub delay_minutes: Option<u32>,
}

/// 系统电源操作执行器
///
/// 通过平台自带的命令行工具触发电源操作，命令本身的权限要求
/// 由运行环境保证。
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }

    /// 构造平台对应的命令及参数
    fn platform_command(params: &SystemTaskParams) -> (String, Vec<String>) {
        let delay = params.delay_minutes.unwrap_or(0);
        #[cfg(unix)]
        {
            match params.operation {
                SystemOperation::Shutdown => (
                    "shutdown".to_string(),
                    vec!["-h".to_string(), format!("+{delay}")],
                ),
                SystemOperation::Reboot => (
                    "shutdown".to_string(),
                    vec!["-r".to_string(), format!("+{delay}")],
                ),
                SystemOperation::Sleep => (
                    "systemctl".to_string(),
                    vec!["suspend".to_string()],
                ),
            }
        }
        #[cfg(windows)]
        {
            let seconds = (delay as u64) * 60;
            match params.operation {
                SystemOperation::Shutdown => (
                    "shutdown".to_string(),
                    vec!["/s".to_string(), "/t".to_string(), seconds.to_string()],
                ),
                SystemOperation::Reboot => (
                    "shutdown".to_string(),
                    vec!["/r".to_string(), "/t".to_string(), seconds.to_string()],
                ),
                SystemOperation::Sleep => (
                    "rundll32.exe".to_string(),
                    vec!["powrprof.dll,SetSuspendState".to_string(), "0,1,0".to_string()],
                ),
            }
        }
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KindExecutor for SystemExecutor {
    fn kind(&self) -> &str {
        "system"
    }

    async fn run(&self, ctx: &ExecutionContext) -> SchedulerResult<RunOutput> {
        let params: SystemTaskParams = parse_params(self.kind(), &ctx.parameters)?;
        let (command, args) = Self::platform_command(&params);

        warn!(
            "执行系统任务: {} [{}], {:?} -> {} {:?}",
            ctx.task_name, ctx.task_id, params.operation, command, args
        );

        let output = tokio::process::Command::new(&command)
            .args(&args)
            .output()
            .await
            .map_err(|e| SchedulerError::ExecutionFailure(format!("启动系统命令失败: {e}")))?;

        let exit_code = output.status.code();
        if output.status.success() {
            info!("系统命令已下发: {command} {args:?}");
            Ok(RunOutput::success(
                exit_code,
                format!("系统命令已下发: {command} {}", args.join(" ")),
            ))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Ok(RunOutput::failure(
                exit_code,
                format!("系统命令失败: {stderr}"),
            ))
        }
    }
}

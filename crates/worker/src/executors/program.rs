use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use cronbox_core::{SchedulerError, SchedulerResult};
use cronbox_domain::{ExecutionContext, KindExecutor, RunOutput};

use super::parse_params;

/// 程序执行任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramTaskParams {
    /// 要执行的命令
    pub command: String,
    /// 命令参数
    #[serde(default)]
    pub args: Vec<String>,
    /// 工作目录
    #[serde(default)]
    pub working_directory: Option<String>,
    /// 附加环境变量
    #[serde(default)]
    pub environment: Option<HashMap<String, String>>,
    /// 是否通过shell执行（此时args被忽略，command整体交给shell）
    #[serde(default)]
    pub shell: bool,
}

/// 程序执行任务执行器
pub struct ProgramExecutor;

impl ProgramExecutor {
    pub fn new() -> Self {
        Self
    }

    fn build_command(params: &ProgramTaskParams) -> Command {
        if params.shell {
            #[cfg(unix)]
            {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(&params.command);
                cmd
            }
            #[cfg(windows)]
            {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(&params.command);
                cmd
            }
        } else {
            let mut cmd = Command::new(&params.command);
            cmd.args(&params.args);
            cmd
        }
    }
}

impl Default for ProgramExecutor {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = Vec::new();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
        lines.push(line.trim_end().to_string());
        line.clear();
    }
    lines.join("\n")
}

#[async_trait]
impl KindExecutor for ProgramExecutor {
    fn kind(&self) -> &str {
        "program"
    }

    async fn run(&self, ctx: &ExecutionContext) -> SchedulerResult<RunOutput> {
        let params: ProgramTaskParams = parse_params(self.kind(), &ctx.parameters)?;

        info!(
            "执行程序任务: {} [{}], command={}",
            ctx.task_name, ctx.task_id, params.command
        );

        let mut cmd = Self::build_command(&params);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());

        if let Some(ref dir) = params.working_directory {
            cmd.current_dir(dir);
        }
        if let Some(ref env) = params.environment {
            for (key, value) in env {
                cmd.env(key, value);
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SchedulerError::ExecutionFailure(format!("启动命令失败: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SchedulerError::ExecutionFailure("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SchedulerError::ExecutionFailure("无法获取stderr".to_string()))?;

        let stdout_handle = tokio::spawn(read_lines(stdout));
        let stderr_handle = tokio::spawn(read_lines(stderr));

        // 子进程可以被直接终止，这是协作取消之上允许的增强
        let exit_status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| SchedulerError::ExecutionFailure(format!("等待进程结束失败: {e}")))?
            }
            _ = ctx.cancel.cancelled() => {
                warn!("程序任务被取消，终止子进程: {} [{}]", ctx.task_name, ctx.task_id);
                let _ = child.kill().await;
                return Ok(RunOutput::failure(None, "任务已取消，子进程被终止"));
            }
        };

        let stdout_text = stdout_handle.await.unwrap_or_default();
        let stderr_text = stderr_handle.await.unwrap_or_default();

        let exit_code = exit_status.code();
        if exit_status.success() {
            Ok(RunOutput::success(exit_code, stdout_text))
        } else {
            let error = if stderr_text.is_empty() {
                format!("命令执行失败，退出码: {exit_code:?}")
            } else {
                stderr_text
            };
            Ok(RunOutput {
                success: false,
                return_code: exit_code,
                output: Some(stdout_text),
                error_message: Some(error),
            })
        }
    }
}

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use cronbox_core::{SchedulerError, SchedulerResult};
use cronbox_domain::{ExecutionContext, KindExecutor, RunOutput};

use super::parse_params;

/// 文件操作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Copy,
    Move,
    Delete,
}

/// 文件操作任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTaskParams {
    pub operation: FileOperation,
    pub source_path: String,
    /// copy/move的目标路径
    #[serde(default)]
    pub target_path: Option<String>,
    /// 目标已存在时是否覆盖
    #[serde(default)]
    pub overwrite: bool,
}

/// 文件操作任务执行器
pub struct FileExecutor;

impl FileExecutor {
    pub fn new() -> Self {
        Self
    }

    fn require_target(params: &FileTaskParams) -> SchedulerResult<&str> {
        params.target_path.as_deref().ok_or_else(|| {
            SchedulerError::InvalidTaskParams("copy/move操作需要target_path".to_string())
        })
    }

    async fn check_overwrite(target: &str, overwrite: bool) -> Option<RunOutput> {
        if !overwrite && Path::new(target).exists() {
            Some(RunOutput::failure(
                Some(-1),
                format!("目标已存在且未允许覆盖: {target}"),
            ))
        } else {
            None
        }
    }
}

impl Default for FileExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KindExecutor for FileExecutor {
    fn kind(&self) -> &str {
        "file"
    }

    async fn run(&self, ctx: &ExecutionContext) -> SchedulerResult<RunOutput> {
        let params: FileTaskParams = parse_params(self.kind(), &ctx.parameters)?;
        let source = params.source_path.clone();

        info!(
            "执行文件任务: {} [{}], {:?} {}",
            ctx.task_name, ctx.task_id, params.operation, source
        );

        let outcome = match params.operation {
            FileOperation::Copy => {
                let target = Self::require_target(&params)?.to_string();
                if let Some(blocked) = Self::check_overwrite(&target, params.overwrite).await {
                    return Ok(blocked);
                }
                tokio::fs::copy(&source, &target)
                    .await
                    .map(|bytes| format!("已复制 {source} -> {target} ({bytes} 字节)"))
            }
            FileOperation::Move => {
                let target = Self::require_target(&params)?.to_string();
                if let Some(blocked) = Self::check_overwrite(&target, params.overwrite).await {
                    return Ok(blocked);
                }
                tokio::fs::rename(&source, &target)
                    .await
                    .map(|_| format!("已移动 {source} -> {target}"))
            }
            FileOperation::Delete => {
                let metadata = tokio::fs::metadata(&source).await;
                match metadata {
                    Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&source)
                        .await
                        .map(|_| format!("已删除目录 {source}")),
                    Ok(_) => tokio::fs::remove_file(&source)
                        .await
                        .map(|_| format!("已删除文件 {source}")),
                    Err(e) => Err(e),
                }
            }
        };

        match outcome {
            Ok(message) => Ok(RunOutput::success(Some(0), message)),
            Err(e) => Ok(RunOutput::failure(Some(-1), format!("文件操作失败: {e}"))),
        }
    }
}

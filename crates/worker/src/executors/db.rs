use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use cronbox_core::{SchedulerError, SchedulerResult};
use cronbox_domain::{ExecutionContext, KindExecutor, RunOutput};

use super::parse_params;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbOperation {
    Backup,
    Execute,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Mysql,
    Postgres,
    Sqlite,
}

/// 数据库任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbTaskParams {
    pub operation: DbOperation,
    pub db_type: DbType,
    pub database: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// execute 操作要执行的 SQL
    #[serde(default)]
    pub query: Option<String>,
    /// backup 操作的输出文件路径
    #[serde(default)]
    pub output_file: Option<PathBuf>,
}

/// 数据库备份与 SQL 执行器
///
/// 通过各数据库自带的命令行客户端（mysqldump/mysql、pg_dump/psql、
/// sqlite3）完成操作，不直接建立数据库连接。
pub struct DbExecutor;

impl DbExecutor {
    pub fn new() -> Self {
        Self
    }

    fn build_command(params: &DbTaskParams) -> SchedulerResult<(String, Vec<String>, Vec<(String, String)>)> {
        let host = params.host.clone().unwrap_or_else(|| "localhost".to_string());
        let mut envs = Vec::new();

        let (program, args) = match (params.db_type, params.operation) {
            (DbType::Mysql, DbOperation::Backup) => {
                let mut args = vec!["-h".to_string(), host];
                if let Some(port) = params.port {
                    args.push("-P".to_string());
                    args.push(port.to_string());
                }
                if let Some(user) = &params.username {
                    args.push("-u".to_string());
                    args.push(user.clone());
                }
                if let Some(password) = &params.password {
                    envs.push(("MYSQL_PWD".to_string(), password.clone()));
                }
                args.push(params.database.clone());
                ("mysqldump".to_string(), args)
            }
            (DbType::Mysql, DbOperation::Execute) => {
                let query = Self::required_query(params)?;
                let mut args = vec!["-h".to_string(), host];
                if let Some(port) = params.port {
                    args.push("-P".to_string());
                    args.push(port.to_string());
                }
                if let Some(user) = &params.username {
                    args.push("-u".to_string());
                    args.push(user.clone());
                }
                if let Some(password) = &params.password {
                    envs.push(("MYSQL_PWD".to_string(), password.clone()));
                }
                args.push(params.database.clone());
                args.push("-e".to_string());
                args.push(query);
                ("mysql".to_string(), args)
            }
            (DbType::Postgres, DbOperation::Backup) => {
                let mut args = vec!["-h".to_string(), host];
                if let Some(port) = params.port {
                    args.push("-p".to_string());
                    args.push(port.to_string());
                }
                if let Some(user) = &params.username {
                    args.push("-U".to_string());
                    args.push(user.clone());
                }
                if let Some(password) = &params.password {
                    envs.push(("PGPASSWORD".to_string(), password.clone()));
                }
                args.push(params.database.clone());
                ("pg_dump".to_string(), args)
            }
            (DbType::Postgres, DbOperation::Execute) => {
                let query = Self::required_query(params)?;
                let mut args = vec!["-h".to_string(), host];
                if let Some(port) = params.port {
                    args.push("-p".to_string());
                    args.push(port.to_string());
                }
                if let Some(user) = &params.username {
                    args.push("-U".to_string());
                    args.push(user.clone());
                }
                if let Some(password) = &params.password {
                    envs.push(("PGPASSWORD".to_string(), password.clone()));
                }
                args.push("-d".to_string());
                args.push(params.database.clone());
                args.push("-c".to_string());
                args.push(query);
                ("psql".to_string(), args)
            }
            (DbType::Sqlite, DbOperation::Backup) => {
                let args = vec![params.database.clone(), ".dump".to_string()];
                ("sqlite3".to_string(), args)
            }
            (DbType::Sqlite, DbOperation::Execute) => {
                let query = Self::required_query(params)?;
                let args = vec![params.database.clone(), query];
                ("sqlite3".to_string(), args)
            }
        };
        Ok((program, args, envs))
    }

    fn required_query(params: &DbTaskParams) -> SchedulerResult<String> {
        params
            .query
            .clone()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| {
                SchedulerError::InvalidTaskParams("execute 操作缺少 query 参数".to_string())
            })
    }
}

impl Default for DbExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KindExecutor for DbExecutor {
    fn kind(&self) -> &str {
        "db"
    }

    async fn run(&self, ctx: &ExecutionContext) -> SchedulerResult<RunOutput> {
        let params: DbTaskParams = parse_params(self.kind(), &ctx.parameters)?;

        if params.operation == DbOperation::Backup && params.output_file.is_none() {
            return Err(SchedulerError::InvalidTaskParams(
                "backup 操作缺少 output_file 参数".to_string(),
            ));
        }

        let (program, args, envs) = Self::build_command(&params)?;
        debug!(
            "执行数据库任务: {} [{}], {} 条参数",
            ctx.task_name,
            ctx.task_id,
            args.len()
        );

        let mut command = tokio::process::Command::new(&program);
        command
            .args(&args)
            .envs(envs)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let run = async {
            let output = command
                .output()
                .await
                .map_err(|e| SchedulerError::ExecutionFailure(format!("启动数据库客户端失败: {e}")))?;

            let exit_code = output.status.code();
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                return Ok(RunOutput::failure(
                    exit_code,
                    format!("数据库命令失败: {stderr}"),
                ));
            }

            if params.operation == DbOperation::Backup {
                let target = params.output_file.as_ref().unwrap();
                if let Some(parent) = target.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let mut file = tokio::fs::File::create(target).await?;
                file.write_all(&output.stdout).await?;
                file.flush().await?;
                info!("数据库备份完成: {}", target.display());
                Ok(RunOutput::success(
                    exit_code,
                    format!("备份完成: {} ({} 字节)", target.display(), output.stdout.len()),
                ))
            } else {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok(RunOutput::success(exit_code, stdout))
            }
        };

        tokio::select! {
            result = run => result,
            _ = ctx.cancel.cancelled() => {
                Ok(RunOutput::failure(None, "任务已取消".to_string()))
            }
        }
    }
}

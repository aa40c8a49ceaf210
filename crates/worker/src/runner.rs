use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use cronbox_domain::{ExecutionContext, ExecutionResult, Task, TaskStatus};

use crate::registry::ExecutorRegistry;

struct RunningTask {
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

/// 任务执行器
///
/// 对调用者而言`execute`是同步的，内部在独立的tokio任务上运行，
/// 超时通过计时竞争实现。取消是协作式的：超时或取消只是触发取消
/// 信号并放弃等待，不保证强制终止不配合的执行逻辑。
pub struct TaskRunner {
    registry: Arc<ExecutorRegistry>,
    running: Arc<RwLock<HashMap<Uuid, RunningTask>>>,
}

impl TaskRunner {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            registry,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 执行一个任务并返回结构化结果
    ///
    /// 执行器抛出的任何错误都会被转换为Failed结果，不会作为Err
    /// 传播给调用者。
    pub async fn execute(&self, task: &Task) -> ExecutionResult {
        let mut result = ExecutionResult::new();

        let Some(executor) = self.registry.get(&task.kind) else {
            result.start();
            result.complete(
                TaskStatus::Failed,
                Some(-1),
                String::new(),
                format!("不支持的任务类型: {}", task.kind),
            );
            return result;
        };

        info!("开始执行任务: {} [{}]", task.name, task.id);

        let cancel = CancellationToken::new();
        {
            let mut running = self.running.write().await;
            running.insert(
                task.id,
                RunningTask {
                    cancel: cancel.clone(),
                    started_at: Utc::now(),
                },
            );
        }

        let ctx = ExecutionContext {
            task_id: task.id,
            task_name: task.name.clone(),
            parameters: task.parameters.clone(),
            timeout_seconds: task.timeout_seconds,
            cancel: cancel.clone(),
        };

        result.start();

        // 在独立任务中运行，避免挂起的执行逻辑阻塞调用者
        let handle = tokio::spawn(async move { executor.run(&ctx).await });

        let joined = if task.timeout_seconds > 0 {
            match tokio::time::timeout(Duration::from_secs(task.timeout_seconds), handle).await {
                Ok(joined) => Some(joined),
                Err(_) => None,
            }
        } else {
            Some(handle.await)
        };

        match joined {
            None => {
                // 超时：发出协作取消信号并放弃执行上下文
                cancel.cancel();
                warn!(
                    "任务超时: {} [{}] (超时: {}秒)",
                    task.name, task.id, task.timeout_seconds
                );
                result.complete(
                    TaskStatus::Timeout,
                    Some(-1),
                    String::new(),
                    format!("任务执行超时: 超过 {} 秒", task.timeout_seconds),
                );
            }
            Some(Ok(Ok(output))) => {
                if cancel.is_cancelled() {
                    result.complete(
                        TaskStatus::Canceled,
                        output.return_code,
                        output.output.unwrap_or_default(),
                        "任务已取消".to_string(),
                    );
                } else if output.success {
                    result.complete(
                        TaskStatus::Success,
                        output.return_code.or(Some(0)),
                        output.output.unwrap_or_default(),
                        String::new(),
                    );
                } else {
                    result.complete(
                        TaskStatus::Failed,
                        output.return_code.or(Some(-1)),
                        output.output.unwrap_or_default(),
                        output.error_message.unwrap_or_default(),
                    );
                }
            }
            Some(Ok(Err(e))) => {
                result.complete(
                    TaskStatus::Failed,
                    Some(-1),
                    String::new(),
                    format!("任务执行异常: {e}"),
                );
            }
            Some(Err(join_err)) => {
                result.complete(
                    TaskStatus::Failed,
                    Some(-1),
                    String::new(),
                    format!("任务执行线程异常: {join_err}"),
                );
            }
        }

        // 所有退出路径都从运行集合移除
        {
            let mut running = self.running.write().await;
            if let Some(entry) = running.remove(&task.id) {
                let elapsed = (Utc::now() - entry.started_at).num_milliseconds() as f64 / 1000.0;
                info!(
                    "任务 {} [{}] 执行完成: {:?}, 耗时: {:.2}秒",
                    task.name, task.id, result.status, elapsed
                );
            }
        }

        result
    }

    /// 取消正在执行的任务
    ///
    /// 仅发送协作取消信号，能否真正停止取决于执行器实现。
    /// 任务不在运行中时返回false。
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        let running = self.running.read().await;
        match running.get(&task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                info!("取消任务: {task_id}");
                true
            }
            None => false,
        }
    }

    /// 当前正在运行的任务ID
    pub async fn running_tasks(&self) -> Vec<Uuid> {
        self.running.read().await.keys().copied().collect()
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    pub async fn is_running(&self, task_id: Uuid) -> bool {
        self.running.read().await.contains_key(&task_id)
    }
}

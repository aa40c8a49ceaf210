use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cronbox_core::SchedulerResult;

use crate::execution::{LoadStats, RunOutput};
use crate::task::Task;

/// 任务持久化存储
///
/// 实现必须保证写入的原子性（临时文件+重命名），并在加载时容忍
/// 单条损坏的记录。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 保存全部任务，并删除不在集合中的陈旧记录
    async fn save_all(&self, tasks: &[Task]) -> SchedulerResult<()>;

    /// 加载全部任务
    ///
    /// 单条记录损坏时跳过并计数，不中断整体加载。
    async fn load_all(&self) -> SchedulerResult<(HashMap<Uuid, Task>, LoadStats)>;
}

/// 通知发送端
///
/// 发送失败由实现自行记录日志，绝不向调度器传播错误。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, task: &Task, subject: &str, body: &str);
}

/// 一次执行的上下文
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub task_name: String,
    /// 类型专有参数，由执行器解析
    pub parameters: serde_json::Value,
    pub timeout_seconds: u64,
    /// 协作式取消信号，长耗时执行器应定期检查
    pub cancel: CancellationToken,
}

/// 任务类型执行器
///
/// 每种任务类型（url、file、program、system、db）各实现一个，
/// 通过类型名注册到执行器注册表。
#[async_trait]
pub trait KindExecutor: Send + Sync {
    /// 类型名，与`Task::kind`对应
    fn kind(&self) -> &str;

    async fn run(&self, ctx: &ExecutionContext) -> SchedulerResult<RunOutput>;
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ExecutionRecord, ExecutionResult};

/// 执行历史记录上限，超出时淘汰最旧的记录
pub const HISTORY_LIMIT: usize = 50;

/// 任务定义
///
/// 表示系统中可调度执行的任务单元。`kind`标识任务类型（"url"、"file"、
/// "program"、"system"、"db"），`parameters`携带该类型的专有参数，
/// 由对应的执行器自行解析，调度核心不感知其内容。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 任务类型名，决定由哪个执行器运行
    pub kind: String,
    /// 类型专有参数，JSON格式
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    /// 调度表达式，None表示仅手动执行
    #[serde(default)]
    pub schedule: Option<String>,
    /// 超时时间（秒），0表示使用调度器默认值
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_interval_seconds: u64,
    /// 当前已重试次数
    #[serde(default)]
    pub retries: u32,
    /// 依赖的任务ID，全部成功后本任务才可执行
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<ExecutionRecord>,
}

fn default_enabled() -> bool {
    true
}

/// 任务状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CANCELED")]
    Canceled,
    #[serde(rename = "PAUSED")]
    Paused,
}

impl TaskStatus {
    /// 单次执行的终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Canceled
        )
    }
}

/// 任务优先级
///
/// 仅作为展示元数据保存，不影响调度顺序和并发准入。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    #[serde(rename = "LOW")]
    Low = 0,
    #[default]
    #[serde(rename = "NORMAL")]
    Normal = 1,
    #[serde(rename = "HIGH")]
    High = 2,
    #[serde(rename = "CRITICAL")]
    Critical = 3,
}

impl Task {
    /// 创建新任务，id自动生成且之后不可变更
    pub fn new(name: impl Into<String>, kind: impl Into<String>, parameters: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            kind: kind.into(),
            parameters,
            status: TaskStatus::Pending,
            priority: TaskPriority::Normal,
            schedule: None,
            timeout_seconds: 0,
            max_retries: 0,
            retry_interval_seconds: 0,
            retries: 0,
            dependencies: Vec::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: None,
            history: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_retry_policy(mut self, max_retries: u32, interval_seconds: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_interval_seconds = interval_seconds;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 记录一次执行结果
    ///
    /// 更新任务状态并追加历史记录，超过上限时淘汰最旧的记录。
    pub fn record_execution(&mut self, result: &ExecutionResult) {
        self.status = result.status;
        self.updated_at = Utc::now();
        self.history.push(ExecutionRecord::from_result(result));

        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }
}

/// 任务字段更新集
///
/// 所有字段均为可选，仅覆盖给出的字段。`schedule`使用双层Option
/// 以区分"不修改"和"清除调度表达式"。
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: Option<serde_json::Value>,
    pub priority: Option<TaskPriority>,
    pub schedule: Option<Option<String>>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_interval_seconds: Option<u64>,
    pub dependencies: Option<Vec<Uuid>>,
    pub enabled: Option<bool>,
}

impl TaskPatch {
    /// 是否修改了会影响触发器的字段
    pub fn touches_trigger(&self) -> bool {
        self.schedule.is_some() || self.enabled.is_some()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

/// 单次执行的结果
///
/// `execution_time_seconds`由`complete()`一次性计算，之后不再重算。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: TaskStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub execution_time_seconds: f64,
    pub return_code: Option<i32>,
    pub output: String,
    pub error: String,
}

impl ExecutionResult {
    pub fn new() -> Self {
        Self {
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
            execution_time_seconds: 0.0,
            return_code: None,
            output: String::new(),
            error: String::new(),
        }
    }

    /// 开始计时，状态转为Running
    pub fn start(&mut self) {
        self.start_time = Some(Utc::now());
        self.status = TaskStatus::Running;
    }

    /// 结束执行并计算耗时
    pub fn complete(
        &mut self,
        status: TaskStatus,
        return_code: Option<i32>,
        output: String,
        error: String,
    ) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.status = status;
        self.return_code = return_code;
        self.output = output;
        self.error = error;

        if let Some(start) = self.start_time {
            self.execution_time_seconds = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self::new()
    }
}

/// 追加到任务历史中的执行快照，写入后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub execution_time_seconds: f64,
    pub return_code: Option<i32>,
    pub output: String,
    pub error: String,
}

impl ExecutionRecord {
    pub fn from_result(result: &ExecutionResult) -> Self {
        Self {
            time: result.start_time,
            status: result.status,
            execution_time_seconds: result.execution_time_seconds,
            return_code: result.return_code,
            output: result.output.clone(),
            error: result.error.clone(),
        }
    }
}

/// 类型执行器的原始返回
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub success: bool,
    pub return_code: Option<i32>,
    pub output: Option<String>,
    pub error_message: Option<String>,
}

impl RunOutput {
    pub fn success(return_code: Option<i32>, output: impl Into<String>) -> Self {
        Self {
            success: true,
            return_code,
            output: Some(output.into()),
            error_message: None,
        }
    }

    pub fn failure(return_code: Option<i32>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            return_code,
            output: None,
            error_message: Some(error.into()),
        }
    }
}

/// 批量加载任务的统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub failed: usize,
}

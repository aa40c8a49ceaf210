mod db;
mod file;
mod mock;
mod program;
mod system;
mod url;

pub use db::{DbExecutor, DbTaskParams};
pub use file::{FileExecutor, FileTaskParams};
pub use mock::MockExecutor;
pub use program::{ProgramExecutor, ProgramTaskParams};
pub use system::{SystemExecutor, SystemTaskParams};
pub use url::{UrlExecutor, UrlTaskParams};

use cronbox_core::{SchedulerError, SchedulerResult};
use serde::de::DeserializeOwned;

/// 从任务参数中解析执行器专有的参数结构
pub(crate) fn parse_params<T: DeserializeOwned>(
    kind: &str,
    parameters: &serde_json::Value,
) -> SchedulerResult<T> {
    serde_json::from_value(parameters.clone())
        .map_err(|e| SchedulerError::InvalidTaskParams(format!("解析{kind}任务参数失败: {e}")))
}

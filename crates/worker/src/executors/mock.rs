use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use cronbox_core::SchedulerResult;
use cronbox_domain::{ExecutionContext, KindExecutor, RunOutput};

use super::parse_params;

#[derive(Debug, Deserialize)]
struct MockTaskParams {
    #[serde(default)]
    sleep_ms: u64,
    #[serde(default = "default_succeed")]
    succeed: bool,
    #[serde(default)]
    panic: bool,
    #[serde(default)]
    output: String,
}

fn default_succeed() -> bool {
    true
}

/// 测试用执行器，行为完全由任务参数驱动
pub struct MockExecutor;

impl MockExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KindExecutor for MockExecutor {
    fn kind(&self) -> &str {
        "mock"
    }

    async fn run(&self, ctx: &ExecutionContext) -> SchedulerResult<RunOutput> {
        let params: MockTaskParams = parse_params(self.kind(), &ctx.parameters)?;

        if params.panic {
            panic!("mock执行器按参数要求panic");
        }

        if params.sleep_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(params.sleep_ms)) => {}
                _ = ctx.cancel.cancelled() => {
                    return Ok(RunOutput::failure(None, "已取消".to_string()));
                }
            }
        }

        if params.succeed {
            Ok(RunOutput::success(Some(0), params.output))
        } else {
            Ok(RunOutput::failure(Some(1), "mock执行失败".to_string()))
        }
    }
}

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use cronbox_core::AppConfig;
use cronbox_dispatcher::TaskScheduler;
use cronbox_domain::Notifier;
use cronbox_infrastructure::{JsonTaskStore, LogNotifier, WebhookNotifier};
use cronbox_worker::{ExecutorRegistry, TaskRunner};

/// 主应用程序，负责组装各组件
pub struct Application {
    scheduler: TaskScheduler,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(ExecutorRegistry::with_builtin());
        info!("已注册任务类型: {:?}", registry.kinds());

        let runner = Arc::new(TaskRunner::new(registry.clone()));
        let store = Arc::new(JsonTaskStore::new(config.data_dir.clone(), registry.kinds()));

        let notifier: Arc<dyn Notifier> = match &config.notifier.webhook_url {
            Some(url) if !url.is_empty() => {
                info!("通知方式: webhook -> {url}");
                Arc::new(WebhookNotifier::new(url.clone()))
            }
            _ => {
                info!("通知方式: 日志");
                Arc::new(LogNotifier::new())
            }
        };

        let scheduler = TaskScheduler::new(runner, store, notifier, config.scheduler.clone());
        Self { scheduler }
    }

    /// 启动调度器并恢复持久化的任务
    pub async fn start(&self) -> Result<()> {
        let stats = self.scheduler.start().await?;
        if stats.failed > 0 {
            tracing::warn!("{} 条任务记录损坏，已跳过", stats.failed);
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    /// 调度器句柄，供内嵌使用方操作任务
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }
}

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use cronbox_domain::{Notifier, Task};

/// 仅写日志的通知实现，未配置webhook时使用
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, task: &Task, subject: &str, body: &str) {
        info!(
            target: "notifier",
            "通知: [{subject}] 任务 {} [{}]: {body}",
            task.name, task.id
        );
    }
}

/// 通过HTTP Webhook发送通知
///
/// 发送失败只记录警告，不影响调度流程。
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, task: &Task, subject: &str, body: &str) {
        let payload = serde_json::json!({
            "task_id": task.id,
            "task_name": task.name,
            "subject": subject,
            "body": body,
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("通知已发送: [{subject}] 任务 {}", task.name);
            }
            Ok(response) => {
                warn!(
                    "通知发送失败: [{subject}] 任务 {}, 状态码 {}",
                    task.name,
                    response.status()
                );
            }
            Err(e) => {
                warn!("通知发送失败: [{subject}] 任务 {}: {e}", task.name);
            }
        }
    }
}

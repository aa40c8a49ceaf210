use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use cronbox_core::{SchedulerError, SchedulerResult};
use cronbox_domain::{ExecutionContext, KindExecutor, RunOutput};

use super::parse_params;

/// URL请求任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlTaskParams {
    pub url: String,
    /// HTTP方法，默认GET
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    /// 期望的响应状态码，默认200
    #[serde(default)]
    pub expected_status: Option<u16>,
    /// 请求级超时（秒），未设置时使用任务超时
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
    /// 是否校验TLS证书，默认校验
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
}

fn default_verify_ssl() -> bool {
    true
}

/// URL请求任务执行器
pub struct UrlExecutor {
    client: reqwest::Client,
}

impl UrlExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for UrlExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KindExecutor for UrlExecutor {
    fn kind(&self) -> &str {
        "url"
    }

    async fn run(&self, ctx: &ExecutionContext) -> SchedulerResult<RunOutput> {
        let params: UrlTaskParams = parse_params(self.kind(), &ctx.parameters)?;

        let method = params.method.unwrap_or_else(|| "GET".to_string());
        let expected = params.expected_status.unwrap_or(200);

        info!(
            "执行URL任务: {} [{}], {} {}",
            ctx.task_name, ctx.task_id, method, params.url
        );

        // 跳过证书校验需要单独构建的client
        let client = if params.verify_ssl {
            self.client.clone()
        } else {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| SchedulerError::ExecutionFailure(format!("构建HTTP客户端失败: {e}")))?
        };

        let mut builder = match method.to_uppercase().as_str() {
            "GET" => client.get(&params.url),
            "POST" => client.post(&params.url),
            "PUT" => client.put(&params.url),
            "DELETE" => client.delete(&params.url),
            "PATCH" => client.patch(&params.url),
            "HEAD" => client.head(&params.url),
            other => {
                return Err(SchedulerError::InvalidTaskParams(format!(
                    "不支持的HTTP方法: {other}"
                )));
            }
        };

        if let Some(headers) = params.headers {
            for (key, value) in headers {
                builder = builder.header(&key, &value);
            }
        }
        if let Some(body) = params.body {
            builder = builder.body(body);
        }
        let request_timeout = params
            .request_timeout_seconds
            .or(if ctx.timeout_seconds > 0 {
                Some(ctx.timeout_seconds)
            } else {
                None
            });
        if let Some(seconds) = request_timeout {
            builder = builder.timeout(Duration::from_secs(seconds));
        }

        let response = tokio::select! {
            response = builder.send() => response,
            _ = ctx.cancel.cancelled() => {
                return Ok(RunOutput::failure(None, "任务已取消"));
            }
        };

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|e| format!("读取响应体失败: {e}"));

                if status == expected {
                    Ok(RunOutput::success(
                        Some(status as i32),
                        format!("HTTP {method} {}\nStatus: {status}\n{body}", params.url),
                    ))
                } else {
                    Ok(RunOutput {
                        success: false,
                        return_code: Some(status as i32),
                        output: Some(body),
                        error_message: Some(format!(
                            "响应状态码 {status} 与期望的 {expected} 不符"
                        )),
                    })
                }
            }
            Err(e) => Ok(RunOutput::failure(None, format!("HTTP请求失败: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn context(parameters: serde_json::Value) -> ExecutionContext {
        ExecutionContext {
            task_id: Uuid::new_v4(),
            task_name: "http测试".to_string(),
            parameters,
            timeout_seconds: 5,
            cancel: CancellationToken::new(),
        }
    }

    /// 起一个只应答一次的HTTP服务
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_expected_status_succeeds() {
        let url = one_shot_server("200 OK", "ok").await;
        let executor = UrlExecutor::new();
        let ctx = context(json!({"url": url}));

        let output = executor.run(&ctx).await.unwrap();
        assert!(output.success);
        assert_eq!(output.return_code, Some(200));
        assert!(output.output.unwrap().contains("ok"));
    }

    #[tokio::test]
    async fn test_unexpected_status_fails() {
        let url = one_shot_server("500 Internal Server Error", "boom").await;
        let executor = UrlExecutor::new();
        let ctx = context(json!({"url": url}));

        let output = executor.run(&ctx).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.return_code, Some(500));
        assert!(output.error_message.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_custom_expected_status() {
        let url = one_shot_server("404 Not Found", "gone").await;
        let executor = UrlExecutor::new();
        let ctx = context(json!({"url": url, "expected_status": 404}));

        let output = executor.run(&ctx).await.unwrap();
        assert!(output.success);
    }

    #[tokio::test]
    async fn test_connection_error_is_failure_not_err() {
        let executor = UrlExecutor::new();
        // 端口0不可连接
        let ctx = context(json!({"url": "http://127.0.0.1:1/", "request_timeout_seconds": 2}));

        let output = executor.run(&ctx).await.unwrap();
        assert!(!output.success);
        assert!(output.error_message.unwrap().contains("HTTP请求失败"));
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let executor = UrlExecutor::new();
        let ctx = context(json!({"url": "http://127.0.0.1/", "method": "BREW"}));

        let err = executor.run(&ctx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTaskParams(_)));
    }

    #[tokio::test]
    async fn test_missing_url_is_invalid_params() {
        let executor = UrlExecutor::new();
        let ctx = context(json!({"method": "GET"}));

        let err = executor.run(&ctx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTaskParams(_)));
    }
}

//! HTTP 客户端模块 - 重放缓存写入的网络协作者
//!
//! 队列只依赖 `NetworkClient` trait；默认实现基于 reqwest，
//! 超时从配置注入，保证重放调用有界，不会无限期挂起清扫周期。

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

use crate::config::HttpClientConfig;
use crate::error::{OffsyncError, Result};

/// 网络协作者抽象
///
/// 队列对每条缓存写入调用一次 send；实现方负责自己的超时策略。
#[async_trait]
pub trait NetworkClient: Send + Sync + std::fmt::Debug {
    async fn send(&self, method: &str, url: &str, body: &serde_json::Value) -> Result<()>;
}

/// 基于 reqwest 的默认网络客户端
#[derive(Debug)]
pub struct HttpNetworkClient {
    client: Client,
    base_url: Option<String>,
}

impl HttpNetworkClient {
    /// 创建新的 HTTP 客户端
    pub fn new(config: &HttpClientConfig, base_url: Option<String>) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| OffsyncError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ HTTP 客户端已创建 (base_url: {:?})", base_url);

        Ok(Self { client, base_url })
    }

    /// 拼接完整 URL：相对路径挂到 base_url 下，绝对 URL 原样使用
    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/')),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl NetworkClient for HttpNetworkClient {
    async fn send(&self, method: &str, url: &str, body: &serde_json::Value) -> Result<()> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| OffsyncError::InvalidArgument(format!("无效的 HTTP 方法: {}", e)))?;
        let url = self.resolve_url(url);

        let response = self
            .client
            .request(method, &url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OffsyncError::Timeout(format!("请求超时: {}", url))
                } else {
                    OffsyncError::Transport(format!("请求失败: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OffsyncError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

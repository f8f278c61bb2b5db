//! SDK 配置模块

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OffsyncError, Result};
use crate::retry::RetryPolicy;

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(30),
            request_timeout_secs: Some(30),
        }
    }
}

/// Offsync SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsyncConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 存储键命名空间前缀，避免与无关持久化状态冲突
    pub storage_prefix: String,
    /// 条目 TTL（秒）。默认 3600 分钟，沿用原始实现的过期窗口
    pub entry_ttl_secs: u64,
    /// 定期清扫间隔（秒）。长时间离线不应无限累积过期条目
    pub sweep_interval_secs: u64,
    /// 单次重放调用的超时上限（秒），防止一条挂起的请求阻塞后续清扫周期
    pub replay_timeout_secs: u64,
    /// 重试策略
    pub retry: RetryPolicy,
    /// HTTP 客户端配置
    pub http: HttpClientConfig,
    /// 请求 API 基础 URL，None 表示缓存请求中的 url 已是完整地址
    pub api_base_url: Option<String>,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
}

impl Default for OffsyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./offsync-data"),
            storage_prefix: "offline".to_string(),
            entry_ttl_secs: 3600 * 60,
            sweep_interval_secs: 300,
            replay_timeout_secs: 30,
            retry: RetryPolicy::default(),
            http: HttpClientConfig::default(),
            api_base_url: None,
            event_buffer_size: 256,
        }
    }
}

impl OffsyncConfig {
    /// 创建配置构建器
    pub fn builder() -> OffsyncConfigBuilder {
        OffsyncConfigBuilder::default()
    }

    /// 条目 TTL
    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    /// 重放超时
    pub fn replay_timeout(&self) -> Duration {
        Duration::from_secs(self.replay_timeout_secs)
    }

    /// 校验配置，初始化前调用
    pub fn validate(&self) -> Result<()> {
        if self.storage_prefix.is_empty() {
            return Err(OffsyncError::Config("storage_prefix 不能为空".to_string()));
        }
        if self.storage_prefix.contains(':') {
            return Err(OffsyncError::Config(
                "storage_prefix 不能包含 ':'（它是键分隔符）".to_string(),
            ));
        }
        if self.entry_ttl_secs == 0 {
            return Err(OffsyncError::Config("entry_ttl_secs 必须大于 0".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(OffsyncError::Config(
                "sweep_interval_secs 必须大于 0".to_string(),
            ));
        }
        if self.replay_timeout_secs == 0 {
            return Err(OffsyncError::Config(
                "replay_timeout_secs 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct OffsyncConfigBuilder {
    config: OffsyncConfig,
}

impl OffsyncConfigBuilder {
    /// 设置数据存储目录
    pub fn data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// 设置存储键前缀
    pub fn storage_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.storage_prefix = prefix.into();
        self
    }

    /// 设置条目 TTL（秒）
    pub fn entry_ttl_secs(mut self, secs: u64) -> Self {
        self.config.entry_ttl_secs = secs;
        self
    }

    /// 设置定期清扫间隔（秒）
    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.sweep_interval_secs = secs;
        self
    }

    /// 设置单次重放超时（秒）
    pub fn replay_timeout_secs(mut self, secs: u64) -> Self {
        self.config.replay_timeout_secs = secs;
        self
    }

    /// 设置重试策略
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// 设置 HTTP 客户端配置
    pub fn http(mut self, http: HttpClientConfig) -> Self {
        self.config.http = http;
        self
    }

    /// 设置 API 基础 URL
    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = Some(url.into());
        self
    }

    /// 设置事件缓冲区大小
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    /// 构建配置
    pub fn build(self) -> OffsyncConfig {
        self.config
    }
}

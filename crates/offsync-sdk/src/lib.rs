//! Offsync SDK - 离线写缓冲队列
//!
//! 在网络断续的环境下保证客户端写入不丢：
//! - 📡 网络状态监控：缓存平台信号，按边沿广播转换事件
//! - 📦 持久化缓冲：离线写入落到本地 sled 存储，进程重启不丢
//! - 🔁 恢复重放：离线→在线时按入队时间重放，失败带退避重试，耗尽进死信
//! - 🧹 过期清扫：状态转换 + 定时双路径清除超过 TTL 的条目
//! - ⚙️ 事件系统：后台重放结果只通过事件流暴露，提交方永不被同步打扰
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use offsync_sdk::{OffsyncConfig, OffsyncSdk, OfflineRequest};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OffsyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .api_base_url("https://api.example.com")
//!         .build();
//!
//!     let sdk = OffsyncSdk::initialize(config).await?;
//!
//!     // 提交写入：在线直发，离线入队（同 id 后写覆盖先写）
//!     sdk.submit("note-42", OfflineRequest {
//!         method: "POST".to_string(),
//!         url: "/save".to_string(),
//!         body: json!({ "text": "draft" }),
//!     }).await?;
//!
//!     // 观察后台重放结果
//!     let mut events = sdk.subscribe_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("queue event: {}", event.event_type());
//!         }
//!     });
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod network;
pub mod queue;
pub mod retry;
pub mod sdk;
pub mod store;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{HttpClientConfig, OffsyncConfig, OffsyncConfigBuilder};
pub use error::{OffsyncError, Result};
pub use events::{EventManager, EventStats, QueueEvent};
pub use http::{HttpNetworkClient, NetworkClient};
pub use network::{
    DefaultNetworkStatusListener, NetworkMonitor, NetworkStatus, NetworkStatusEvent,
    NetworkStatusListener, SyncHook,
};
pub use queue::OfflineQueue;
pub use retry::{ReplayFailureReason, RetryPolicy};
pub use sdk::OffsyncSdk;
pub use store::{OfflineRequest, QueueStore, StoreEntry};

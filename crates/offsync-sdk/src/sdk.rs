//! 统一 SDK 接口 - OffsyncSdk 主入口
//!
//! 分层架构设计：
//! ```text
//! OffsyncSdk (装配层)
//!   ├── OfflineQueue (缓存/过期/重放)
//!   ├── QueueStore (sled 持久化)
//!   ├── NetworkMonitor (网络状态监控)
//!   ├── NetworkClient (网络协作者，默认 reqwest)
//!   └── EventManager (事件广播)
//! ```
//!
//! 生命周期是显式的：owner 决定何时 initialize / shutdown，
//! 不依赖任何框架钩子。依赖通过构造注入，没有进程级单例。

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::OffsyncConfig;
use crate::error::{OffsyncError, Result};
use crate::events::{EventManager, QueueEvent};
use crate::http::{HttpNetworkClient, NetworkClient};
use crate::network::{
    DefaultNetworkStatusListener, NetworkMonitor, NetworkStatusEvent, NetworkStatusListener,
    SyncHook,
};
use crate::queue::OfflineQueue;
use crate::store::{OfflineRequest, QueueStore, StoreEntry};

/// 把队列例行工作挂到网络状态边界上的同步钩子
///
/// 每次转换（两个方向）先清扫过期条目；离线→在线的恢复边沿再触发重放。
struct QueueSyncHook {
    queue: Arc<OfflineQueue>,
    events: Arc<EventManager>,
}

#[async_trait::async_trait]
impl SyncHook for QueueSyncHook {
    async fn on_transition(&self, event: &NetworkStatusEvent) {
        self.events
            .emit(QueueEvent::StatusChanged {
                old_status: event.old_status,
                new_status: event.new_status,
                timestamp: event.timestamp,
            })
            .await;

        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self.queue.sweep_expired(now_ms).await {
            warn!("⚠️ 状态转换清扫失败: {}", e);
        }

        if event.is_reconnect() {
            if let Err(e) = self.queue.drain().await {
                warn!("⚠️ 恢复在线重放失败: {}", e);
            }
        }
    }
}

/// Offsync SDK
pub struct OffsyncSdk {
    config: OffsyncConfig,
    store: Arc<QueueStore>,
    monitor: Arc<NetworkMonitor>,
    queue: Arc<OfflineQueue>,
    events: Arc<EventManager>,
    sweeper: RwLock<Option<tokio::task::JoinHandle<()>>>,
    running: RwLock<bool>,
}

impl OffsyncSdk {
    /// 用默认协作者初始化：fail-open 的网络监听器 + reqwest 网络客户端
    pub async fn initialize(config: OffsyncConfig) -> Result<Arc<Self>> {
        let network: Arc<dyn NetworkClient> = Arc::new(HttpNetworkClient::new(
            &config.http,
            config.api_base_url.clone(),
        )?);
        let listener: Arc<dyn NetworkStatusListener> =
            Arc::new(DefaultNetworkStatusListener::default());
        Self::initialize_with(config, listener, network).await
    }

    /// 注入平台监听器与网络客户端的初始化入口（平台胶水层 / 测试使用）
    pub async fn initialize_with(
        config: OffsyncConfig,
        listener: Arc<dyn NetworkStatusListener>,
        network: Arc<dyn NetworkClient>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        info!(
            "🚀 初始化 Offsync SDK v{} (data_dir: {})",
            crate::version::SDK_VERSION,
            config.data_dir.display()
        );

        let store = Arc::new(QueueStore::open(&config.data_dir, &config.storage_prefix).await?);
        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let monitor = Arc::new(NetworkMonitor::new(listener).await);

        let queue = Arc::new(OfflineQueue::new(
            store.clone(),
            monitor.clone(),
            network,
            events.clone(),
            config.retry.clone(),
            config.entry_ttl(),
            config.replay_timeout(),
        ));

        monitor
            .register_sync_hook(Arc::new(QueueSyncHook {
                queue: queue.clone(),
                events: events.clone(),
            }))
            .await;
        monitor.start().await?;

        let sdk = Arc::new(Self {
            config,
            store,
            monitor,
            queue,
            events,
            sweeper: RwLock::new(None),
            running: RwLock::new(true),
        });

        sdk.start_sweeper().await;

        // 启动即清扫一次，处理上次运行遗留的过期条目
        let now_ms = chrono::Utc::now().timestamp_millis();
        sdk.queue.sweep_expired(now_ms).await?;

        Ok(sdk)
    }

    /// 启动定期维护任务：清扫过期条目；在线时顺带重放退避到期的重试条目，
    /// 否则重试条目要等下一次离线→在线边沿才有机会（网络一直在线就永远等不到）
    async fn start_sweeper(self: &Arc<Self>) {
        let queue = self.queue.clone();
        let monitor = self.monitor.clone();
        let interval_secs = self.config.sweep_interval_secs;

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // 第一个 tick 立即返回，跳过
            interval.tick().await;

            loop {
                interval.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                if let Err(e) = queue.sweep_expired(now_ms).await {
                    warn!("⚠️ 定期清扫失败: {}", e);
                }
                if monitor.is_online().await {
                    if let Err(e) = queue.drain().await {
                        warn!("⚠️ 定期重放失败: {}", e);
                    }
                }
            }
        });

        *self.sweeper.write().await = Some(handle);
    }

    /// 提交一条写入（见 [`OfflineQueue::submit`]）
    pub async fn submit(&self, id: &str, request: OfflineRequest) -> Result<()> {
        if !*self.running.read().await {
            return Err(OffsyncError::ShuttingDown("SDK 已关闭".to_string()));
        }
        self.queue.submit(id, request).await
    }

    /// 当前待发条目快照（诊断用）
    pub async fn list_pending(&self) -> Result<Vec<(String, StoreEntry)>> {
        self.queue.list_pending().await
    }

    /// 订阅队列事件
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// 网络监控器（平台胶水层通过它上报状态）
    pub fn network_monitor(&self) -> Arc<NetworkMonitor> {
        self.monitor.clone()
    }

    /// 离线队列（手动触发 drain / sweep 等）
    pub fn queue(&self) -> Arc<OfflineQueue> {
        self.queue.clone()
    }

    /// 关闭 SDK：停止监控与后台任务，落盘
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        info!("🛑 关闭 Offsync SDK");
        self.monitor.stop().await;
        if let Some(handle) = self.sweeper.write().await.take() {
            handle.abort();
        }
        self.store.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    #[derive(Debug)]
    struct ManualListener {
        status: NetworkStatus,
        sender: Mutex<Option<broadcast::Sender<NetworkStatusEvent>>>,
    }

    impl ManualListener {
        fn new(status: NetworkStatus) -> Self {
            Self {
                status,
                sender: Mutex::new(None),
            }
        }

        fn report(&self, status: NetworkStatus) {
            let guard = self.sender.lock().unwrap();
            if let Some(sender) = guard.as_ref() {
                let _ = sender.send(NetworkStatusEvent {
                    old_status: self.status,
                    new_status: status,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                });
            }
        }
    }

    #[async_trait]
    impl NetworkStatusListener for ManualListener {
        async fn get_current_status(&self) -> NetworkStatus {
            self.status
        }

        async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
            let (tx, rx) = broadcast::channel(16);
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn stop_monitoring(&self) {
            *self.sender.lock().unwrap() = None;
        }
    }

    #[derive(Debug, Default)]
    struct RecordingNetworkClient {
        calls: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    #[async_trait]
    impl NetworkClient for RecordingNetworkClient {
        async fn send(&self, method: &str, url: &str, body: &serde_json::Value) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), url.to_string(), body.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initialize_and_shutdown() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let temp_dir = TempDir::new().unwrap();
        let config = OffsyncConfig::builder().data_dir(temp_dir.path()).build();
        let sdk = OffsyncSdk::initialize(config).await.unwrap();

        // 默认监听器 fail open：在线
        assert!(sdk.network_monitor().is_online().await);

        sdk.shutdown().await.unwrap();
        // 关闭后 submit 被拒绝
        let result = sdk
            .submit(
                "x",
                OfflineRequest {
                    method: "POST".to_string(),
                    url: "/save".to_string(),
                    body: json!({}),
                },
            )
            .await;
        assert!(matches!(result, Err(OffsyncError::ShuttingDown(_))));

        // 重复关闭无害
        sdk.shutdown().await.unwrap();
    }

    /// 退避到期的重试条目由定期任务重放，不依赖离线→在线边沿
    #[tokio::test]
    async fn test_periodic_task_replays_due_retry_while_online() {
        let temp_dir = TempDir::new().unwrap();
        let config = OffsyncConfig::builder()
            .data_dir(temp_dir.path())
            .sweep_interval_secs(1)
            .build();
        let listener = Arc::new(ManualListener::new(NetworkStatus::Online));
        let network = Arc::new(RecordingNetworkClient::default());
        let sdk = OffsyncSdk::initialize_with(config, listener, network.clone())
            .await
            .unwrap();

        let mut rx = sdk.subscribe_events();

        // 一条重放失败过、退避窗口已到期的条目
        let now = chrono::Utc::now();
        sdk.store
            .put(
                "x",
                &StoreEntry {
                    time: now.timestamp_millis(),
                    data: OfflineRequest {
                        method: "POST".to_string(),
                        url: "/save".to_string(),
                        body: json!({"a": 1}),
                    },
                    attempts: 1,
                    next_retry_at: Some(now.timestamp() - 10),
                },
            )
            .await
            .unwrap();

        // 网络全程在线，没有任何状态转换，仍应在下个周期被重放
        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for periodic replay")
                .unwrap();
            if let QueueEvent::ReplaySucceeded { id, .. } = event {
                assert_eq!(id, "x");
                break;
            }
        }

        assert!(sdk.list_pending().await.unwrap().is_empty());
        assert_eq!(network.calls.lock().unwrap().len(), 1);

        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_drains_buffered_writes() {
        let temp_dir = TempDir::new().unwrap();
        let config = OffsyncConfig::builder().data_dir(temp_dir.path()).build();
        let listener = Arc::new(ManualListener::new(NetworkStatus::Offline));
        let network = Arc::new(RecordingNetworkClient::default());
        let sdk = OffsyncSdk::initialize_with(config, listener.clone(), network.clone())
            .await
            .unwrap();

        sdk.submit(
            "x",
            OfflineRequest {
                method: "POST".to_string(),
                url: "/save".to_string(),
                body: json!({"a": 1}),
            },
        )
        .await
        .unwrap();
        assert_eq!(sdk.list_pending().await.unwrap().len(), 1);

        let mut rx = sdk.subscribe_events();
        listener.report(NetworkStatus::Online);

        // 等待恢复边沿驱动的重放完成
        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for replay")
                .unwrap();
            if let QueueEvent::ReplaySucceeded { id, .. } = event {
                assert_eq!(id, "x");
                break;
            }
        }

        assert!(sdk.list_pending().await.unwrap().is_empty());
        assert_eq!(network.calls.lock().unwrap().len(), 1);

        sdk.shutdown().await.unwrap();
    }
}

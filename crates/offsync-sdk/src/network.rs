//! 网络状态监控模块
//!
//! 单一可信的网络可达性来源：
//! - 缓存平台层上报的最新状态，`is_online()` 同步读取，不做实时探测
//! - 状态变化按"边沿"广播：重复上报同一状态会被抑制，订阅者每次转换只收到一次
//! - 每次转换（两个方向都算）都会触发已注册的同步钩子，离线队列用它挂过期清扫

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::error::Result;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Online => write!(f, "online"),
            NetworkStatus::Offline => write!(f, "offline"),
        }
    }
}

/// 网络状态变化事件（仅在状态真正发生转换时发出）
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    /// UTC 毫秒时间戳
    pub timestamp: i64,
}

impl NetworkStatusEvent {
    /// 是否为 离线 → 在线 的恢复边沿（队列重放的触发条件）
    pub fn is_reconnect(&self) -> bool {
        self.old_status == NetworkStatus::Offline && self.new_status == NetworkStatus::Online
    }
}

/// 网络状态监听器 trait（由平台层实现，如 Android/iOS/桌面端）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 默认网络状态监听器：没有平台信号时假设网络始终在线（fail open）
///
/// 不能默认离线：否则在不支持网络事件的环境里，所有写入都会被无限期缓存。
/// 实际应用应该由平台层提供真实的监听器。
#[derive(Debug)]
pub struct DefaultNetworkStatusListener {
    status: Arc<RwLock<NetworkStatus>>,
    sender: Arc<RwLock<Option<broadcast::Sender<NetworkStatusEvent>>>>,
}

impl Default for DefaultNetworkStatusListener {
    fn default() -> Self {
        Self {
            status: Arc::new(RwLock::new(NetworkStatus::Online)),
            sender: Arc::new(RwLock::new(None)),
        }
    }
}

#[async_trait]
impl NetworkStatusListener for DefaultNetworkStatusListener {
    async fn get_current_status(&self) -> NetworkStatus {
        *self.status.read().await
    }

    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>> {
        let (sender, receiver) = broadcast::channel(16);
        *self.sender.write().await = Some(sender);
        Ok(receiver)
    }

    async fn stop_monitoring(&self) {
        *self.sender.write().await = None;
    }
}

/// 状态转换同步钩子
///
/// 每次状态转换（在线→离线、离线→在线）都会被调用，用于在状态边界统一执行
/// 清扫/重放等例行工作。钩子内部的错误自行消化，不会中断其他钩子。
#[async_trait]
pub trait SyncHook: Send + Sync {
    async fn on_transition(&self, event: &NetworkStatusEvent);
}

/// 网络监控管理器
pub struct NetworkMonitor {
    listener: Arc<dyn NetworkStatusListener>,
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<RwLock<NetworkStatus>>,
    hooks: Arc<RwLock<Vec<Arc<dyn SyncHook>>>>,
    task: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("listener", &self.listener)
            .finish()
    }
}

impl NetworkMonitor {
    /// 创建新的监控器，初始状态取自监听器的当前上报
    pub async fn new(listener: Arc<dyn NetworkStatusListener>) -> Self {
        let (status_sender, _) = broadcast::channel(64);
        let initial = listener.get_current_status().await;

        Self {
            listener,
            status_sender,
            current_status: Arc::new(RwLock::new(initial)),
            hooks: Arc::new(RwLock::new(Vec::new())),
            task: RwLock::new(None),
        }
    }

    /// 注册状态转换同步钩子（应在 start 之前完成）
    pub async fn register_sync_hook(&self, hook: Arc<dyn SyncHook>) {
        let mut hooks = self.hooks.write().await;
        hooks.push(hook);
        info!("✅ 同步钩子已注册: 当前共 {} 个", hooks.len());
    }

    /// 启动网络监控：消费平台事件流，维护缓存状态并转发边沿事件
    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.listener.start_monitoring().await?;
        let status_sender = self.status_sender.clone();
        let current_status = self.current_status.clone();
        let hooks = self.hooks.clone();

        let handle = tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                apply_transition(&current_status, &hooks, &status_sender, event.new_status).await;
            }
        });

        *self.task.write().await = Some(handle);
        Ok(())
    }

    /// 停止监控
    pub async fn stop(&self) {
        self.listener.stop_monitoring().await;
        if let Some(handle) = self.task.write().await.take() {
            handle.abort();
        }
    }

    /// 获取当前网络状态（缓存值，非实时探测）
    pub async fn status(&self) -> NetworkStatus {
        *self.current_status.read().await
    }

    /// 当前是否在线
    pub async fn is_online(&self) -> bool {
        self.status().await == NetworkStatus::Online
    }

    /// 手动上报网络状态（平台胶水层或测试使用）
    ///
    /// 与平台事件流走同一条转换路径：重复状态会被抑制。
    pub async fn set_status(&self, new_status: NetworkStatus) {
        apply_transition(
            &self.current_status,
            &self.hooks,
            &self.status_sender,
            new_status,
        )
        .await;
    }

    /// 订阅网络状态转换事件（drop 接收端即取消订阅）
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }
}

/// 统一的状态转换入口：去重、更新缓存、跑钩子、广播
async fn apply_transition(
    current_status: &Arc<RwLock<NetworkStatus>>,
    hooks: &Arc<RwLock<Vec<Arc<dyn SyncHook>>>>,
    status_sender: &broadcast::Sender<NetworkStatusEvent>,
    new_status: NetworkStatus,
) {
    let old_status = {
        let mut status = current_status.write().await;
        let old = *status;
        if old == new_status {
            // 非边沿，抑制
            return;
        }
        *status = new_status;
        old
    };

    let event = NetworkStatusEvent {
        old_status,
        new_status,
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    info!("🔄 网络状态转换: {} -> {}", old_status, new_status);

    // 每次转换（两个方向）都执行同步钩子
    let hooks = hooks.read().await;
    for hook in hooks.iter() {
        hook.on_transition(&event).await;
    }

    // 无订阅者时 send 会失败，属正常场景，仅打 debug
    if let Err(e) = status_sender.send(event) {
        debug!("broadcast transition failed (no active receivers): {}", e);
    }
}

//! 事件系统模块 - 队列后台行为的唯一可观测出口
//!
//! 提交方在 submit 返回后就不再被打扰：后台重放的成功/失败/死信、
//! 过期清扫、网络状态转换，全部通过这里的广播通道对外暴露。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::network::NetworkStatus;

/// 队列事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// 网络状态转换
    StatusChanged {
        old_status: NetworkStatus,
        new_status: NetworkStatus,
        timestamp: i64,
    },
    /// 写入已受理（buffered=true 表示离线入队，false 表示在线直发）
    Submitted {
        id: String,
        buffered: bool,
        timestamp: i64,
    },
    /// 在线直发失败（不入队，仅可观测）
    SendFailed {
        id: String,
        error: String,
        timestamp: i64,
    },
    /// 重放成功，条目已移除
    ReplaySucceeded { id: String, timestamp: i64 },
    /// 重放失败，条目带计数重新入队
    ReplayFailed {
        id: String,
        attempts: u32,
        error: String,
        timestamp: i64,
    },
    /// 重试次数耗尽或不可重试，条目被丢弃
    DeadLettered {
        id: String,
        attempts: u32,
        error: String,
        timestamp: i64,
    },
    /// 条目超过 TTL 被清扫
    EntryExpired { id: String, timestamp: i64 },
}

impl QueueEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::StatusChanged { .. } => "status_changed",
            QueueEvent::Submitted { .. } => "submitted",
            QueueEvent::SendFailed { .. } => "send_failed",
            QueueEvent::ReplaySucceeded { .. } => "replay_succeeded",
            QueueEvent::ReplayFailed { .. } => "replay_failed",
            QueueEvent::DeadLettered { .. } => "dead_lettered",
            QueueEvent::EntryExpired { .. } => "entry_expired",
        }
    }

    /// 获取事件时间戳（UTC 毫秒）
    pub fn timestamp(&self) -> i64 {
        match self {
            QueueEvent::StatusChanged { timestamp, .. } => *timestamp,
            QueueEvent::Submitted { timestamp, .. } => *timestamp,
            QueueEvent::SendFailed { timestamp, .. } => *timestamp,
            QueueEvent::ReplaySucceeded { timestamp, .. } => *timestamp,
            QueueEvent::ReplayFailed { timestamp, .. } => *timestamp,
            QueueEvent::DeadLettered { timestamp, .. } => *timestamp,
            QueueEvent::EntryExpired { timestamp, .. } => *timestamp,
        }
    }

    pub(crate) fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
#[derive(Debug)]
pub struct EventManager {
    sender: broadcast::Sender<QueueEvent>,
    stats: Arc<RwLock<EventStats>>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: QueueEvent) {
        debug!("emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 客户端），仅打 debug
        if let Err(e) = self.sender.send(event) {
            debug!("failed to broadcast event (no active receivers): {}", e);
        }
    }

    /// 订阅事件（drop 接收端即取消订阅）
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// 获取事件统计
    pub async fn stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

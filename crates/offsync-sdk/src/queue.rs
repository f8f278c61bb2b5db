//! 离线队列模块 - 缓存、过期、重放
//!
//! 核心契约：
//! - submit：在线直发（后台派发，不阻塞调用方），离线持久化，同 id 覆盖（last-write-wins）
//! - drain：按入队时间重放全部条目（恢复在线边沿触发，定期任务在线时兜底）；
//!   先乐观删除再发网络请求，防止进程在请求挂起时被杀导致条目永久卡死；
//!   失败按重试策略带计数重新入队（仅当同 id 没有新写入时），耗尽后进入死信事件
//! - sweep_expired：不论在线离线，清除所有超过 TTL 的条目
//!
//! 已知取舍：drain 中"删除"与"网络调用完成"之间没有事务保证，
//! 进程在这个窗口崩溃会丢失该条写入（at-most-once）。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventManager, QueueEvent};
use crate::http::NetworkClient;
use crate::network::NetworkMonitor;
use crate::retry::{ReplayFailureReason, RetryPolicy};
use crate::store::{OfflineRequest, QueueStore, StoreEntry};

/// 离线写缓冲队列
#[derive(Debug)]
pub struct OfflineQueue {
    store: Arc<QueueStore>,
    monitor: Arc<NetworkMonitor>,
    network: Arc<dyn NetworkClient>,
    events: Arc<EventManager>,
    retry: RetryPolicy,
    entry_ttl: Duration,
    replay_timeout: Duration,
}

impl OfflineQueue {
    pub fn new(
        store: Arc<QueueStore>,
        monitor: Arc<NetworkMonitor>,
        network: Arc<dyn NetworkClient>,
        events: Arc<EventManager>,
        retry: RetryPolicy,
        entry_ttl: Duration,
        replay_timeout: Duration,
    ) -> Self {
        Self {
            store,
            monitor,
            network,
            events,
            retry,
            entry_ttl,
            replay_timeout,
        }
    }

    /// 提交一条写入
    ///
    /// 在线：请求交给后台任务直发，调用方立即返回；直发失败只通过
    /// `SendFailed` 事件暴露，不会同步抛回（调用方早已返回）。
    /// 离线：持久化为待发条目，同 id 覆盖旧条目。存储层失败（磁盘满、
    /// 存储不可用、序列化失败）必须返回给调用方，不允许静默丢弃。
    pub async fn submit(&self, id: &str, request: OfflineRequest) -> Result<()> {
        if self.monitor.is_online().await {
            let network = self.network.clone();
            let events = self.events.clone();
            let send_timeout = self.replay_timeout;
            let task_id = id.to_string();

            tokio::spawn(async move {
                let result = timeout(
                    send_timeout,
                    network.send(&request.method, &request.url, &request.body),
                )
                .await;
                let error = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some("send timed out".to_string()),
                };
                if let Some(error) = error {
                    warn!("⚠️ 在线直发失败 id={}: {}", task_id, error);
                    events
                        .emit(QueueEvent::SendFailed {
                            id: task_id,
                            error,
                            timestamp: QueueEvent::now_ms(),
                        })
                        .await;
                }
            });

            self.events
                .emit(QueueEvent::Submitted {
                    id: id.to_string(),
                    buffered: false,
                    timestamp: QueueEvent::now_ms(),
                })
                .await;
            return Ok(());
        }

        self.store.put(id, &StoreEntry::new(request)).await?;
        debug!("条目已入队 id={}", id);

        self.events
            .emit(QueueEvent::Submitted {
                id: id.to_string(),
                buffered: true,
                timestamp: QueueEvent::now_ms(),
            })
            .await;
        Ok(())
    }

    /// 提交一条无调用方标识的写入，返回生成的 id
    ///
    /// 调用方没有稳定标识时使用；注意生成 id 的写入彼此独立，
    /// 享受不到同 id 覆盖（last-write-wins）的去重。
    pub async fn submit_new(&self, request: OfflineRequest) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.submit(&id, request).await?;
        Ok(id)
    }

    /// 重放全部缓存写入（离线→在线恢复边沿与定期维护任务调用）
    ///
    /// 按入队时间升序处理。sled 的枚举顺序是键字典序，与时间无关，
    /// 这里显式排序是对原型"枚举顺序未定义"的刻意收紧。
    pub async fn drain(&self) -> Result<()> {
        let mut entries = self.store.entries().await?;
        if entries.is_empty() {
            return Ok(());
        }
        entries.sort_by_key(|(_, entry)| entry.time);

        info!("🔄 开始重放 {} 条缓存写入", entries.len());
        let now_secs = chrono::Utc::now().timestamp();

        for (id, entry) in entries {
            // 退避窗口未到的条目留给下一轮
            if let Some(at) = entry.next_retry_at {
                if at > now_secs {
                    debug!("条目 id={} 处于退避窗口，跳过", id);
                    continue;
                }
            }

            // 乐观删除：先移除再发请求
            self.store.delete(&id).await?;
            self.replay_entry(id, entry).await;
        }

        Ok(())
    }

    /// 重放单条条目并按结果分派：成功 / 带计数重入队 / 死信
    async fn replay_entry(&self, id: String, entry: StoreEntry) {
        let result = timeout(
            self.replay_timeout,
            self.network
                .send(&entry.data.method, &entry.data.url, &entry.data.body),
        )
        .await;

        let error = match result {
            Ok(Ok(())) => {
                debug!("✅ 重放成功 id={}", id);
                self.events
                    .emit(QueueEvent::ReplaySucceeded {
                        id,
                        timestamp: QueueEvent::now_ms(),
                    })
                    .await;
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => crate::error::OffsyncError::Timeout(format!(
                "重放超时 ({}s)",
                self.replay_timeout.as_secs()
            )),
        };

        let reason = ReplayFailureReason::from(&error);
        let attempts = entry.attempts + 1;
        let now_secs = chrono::Utc::now().timestamp();

        match self.retry.next_retry_at(now_secs, entry.attempts, &reason) {
            Some(next_retry_at) => {
                // 保留原始入队时间：TTL 对重试条目照常生效。
                // 条件写入：若重放挂起期间同 id 来了新写入，新写入保留，
                // 这条失败的旧内容不得覆盖它。
                let retry_entry = StoreEntry {
                    attempts,
                    next_retry_at: Some(next_retry_at),
                    ..entry
                };
                match self.store.put_if_absent(&id, &retry_entry).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("条目 id={} 在重放期间被新提交覆盖，放弃重入队", id);
                    }
                    Err(e) => warn!("⚠️ 重新入队失败 id={}: {}", id, e),
                }
                warn!("⚠️ 重放失败 id={} (第 {} 次): {}", id, attempts, error);
                self.events
                    .emit(QueueEvent::ReplayFailed {
                        id,
                        attempts,
                        error: error.to_string(),
                        timestamp: QueueEvent::now_ms(),
                    })
                    .await;
            }
            None => {
                warn!("💀 条目进入死信 id={} (共 {} 次失败): {}", id, attempts, error);
                self.events
                    .emit(QueueEvent::DeadLettered {
                        id,
                        attempts,
                        error: error.to_string(),
                        timestamp: QueueEvent::now_ms(),
                    })
                    .await;
            }
        }
    }

    /// 清扫过期条目：`now - time > ttl` 的条目被删除，其余不动
    ///
    /// 每次网络状态转换都会跑一次（两个方向），另有定时任务兜底。
    /// 返回清除数量。
    pub async fn sweep_expired(&self, now_ms: i64) -> Result<usize> {
        let ttl_ms = self.entry_ttl.as_millis() as i64;
        let mut removed = 0usize;

        for (id, entry) in self.store.entries().await? {
            if entry.is_expired(now_ms, ttl_ms) {
                self.store.delete(&id).await?;
                removed += 1;
                debug!("🧹 条目已过期被清除 id={}", id);
                self.events
                    .emit(QueueEvent::EntryExpired {
                        id,
                        timestamp: QueueEvent::now_ms(),
                    })
                    .await;
            }
        }

        if removed > 0 {
            info!("🧹 清扫完成，移除 {} 条过期条目", removed);
        }
        Ok(removed)
    }

    /// 只读快照：当前全部待发条目，按入队时间升序
    pub async fn list_pending(&self) -> Result<Vec<(String, StoreEntry)>> {
        let mut entries = self.store.entries().await?;
        entries.sort_by_key(|(_, entry)| entry.time);
        Ok(entries)
    }
}

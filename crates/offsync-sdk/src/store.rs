//! 队列存储模块 - 基于 sled 的持久化待发写入存储
//!
//! 本模块提供：
//! - 以 `"<prefix>:<id>"` 为键的持久化待发写入映射（进程重启后仍然存在）
//! - 同一 id 重复写入即整条替换（last-write-wins），条目从不原地修改
//! - 枚举时跳过并删除损坏条目，单条坏数据不阻塞其余条目

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::Db;
use tracing::{info, warn};

use crate::error::{OffsyncError, Result};

/// 被缓存的网络写入描述（动词、目标、请求体）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRequest {
    pub method: String,
    pub url: String,
    pub body: serde_json::Value,
}

/// 一条待发写入
///
/// 持久化为 JSON：`{ "time": <epoch-ms>, "data": { "method", "url", "body" } }`。
/// `attempts` / `next_retry_at` 是重试加固新增的字段，带默认值，
/// 旧格式（只有 time + data）的条目可以原样反序列化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEntry {
    /// 入队时间，UTC 毫秒时间戳，用于过期计算
    pub time: i64,
    /// 被缓存的请求
    pub data: OfflineRequest,
    /// 已失败的重放次数
    #[serde(default)]
    pub attempts: u32,
    /// 下次允许重放的时间（UTC 秒），None 表示随时可重放
    #[serde(default)]
    pub next_retry_at: Option<i64>,
}

impl StoreEntry {
    /// 以当前时间创建新条目
    pub fn new(data: OfflineRequest) -> Self {
        Self {
            time: chrono::Utc::now().timestamp_millis(),
            data,
            attempts: 0,
            next_retry_at: None,
        }
    }

    /// 是否已过期：严格大于 TTL 才算过期，恰好等于 TTL 的条目保留
    pub fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.time > ttl_ms
    }
}

/// 队列存储组件
#[derive(Debug)]
pub struct QueueStore {
    db: Arc<Db>,
    prefix: String,
    #[cfg(test)]
    fail_puts: std::sync::atomic::AtomicBool,
}

impl QueueStore {
    /// 打开队列存储
    ///
    /// 旧实例可能刚释放文件锁（例如快速重启），带退避重试多次。
    pub async fn open(path: &Path, prefix: &str) -> Result<Self> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| OffsyncError::IO(format!("创建存储目录失败: {}", e)))?;

        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            OffsyncError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        info!("✅ 队列存储已打开: {} (prefix: {})", path.display(), prefix);

        Ok(Self {
            db: Arc::new(db),
            prefix: prefix.to_string(),
            #[cfg(test)]
            fail_puts: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// 生成带命名空间前缀的存储键
    pub fn storage_key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn key_prefix(&self) -> String {
        format!("{}:", self.prefix)
    }

    /// 写入条目（同一 id 整条替换）
    pub async fn put(&self, id: &str, entry: &StoreEntry) -> Result<()> {
        #[cfg(test)]
        if self.fail_puts.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(OffsyncError::KvStore("写入条目失败: 存储不可用".to_string()));
        }

        let value = serde_json::to_vec(entry)
            .map_err(|e| OffsyncError::Serialization(format!("序列化条目失败: {}", e)))?;

        self.db
            .insert(self.storage_key(id).as_bytes(), value)
            .map_err(|e| OffsyncError::KvStore(format!("写入条目失败: {}", e)))?;

        Ok(())
    }

    /// 仅当 id 不存在时写入，返回是否实际写入
    ///
    /// 给失败重放的重入队用：条目被乐观删除后、网络请求挂起期间，
    /// 同 id 可能到达了新写入，此时旧内容直接放弃。
    pub async fn put_if_absent(&self, id: &str, entry: &StoreEntry) -> Result<bool> {
        let value = serde_json::to_vec(entry)
            .map_err(|e| OffsyncError::Serialization(format!("序列化条目失败: {}", e)))?;

        let swap = self
            .db
            .compare_and_swap(
                self.storage_key(id).as_bytes(),
                None as Option<&[u8]>,
                Some(value),
            )
            .map_err(|e| OffsyncError::KvStore(format!("写入条目失败: {}", e)))?;

        Ok(swap.is_ok())
    }

    /// 读取条目
    pub async fn get(&self, id: &str) -> Result<Option<StoreEntry>> {
        let result = self
            .db
            .get(self.storage_key(id).as_bytes())
            .map_err(|e| OffsyncError::KvStore(format!("读取条目失败: {}", e)))?;

        match result {
            Some(bytes) => {
                let entry = serde_json::from_slice(&bytes)
                    .map_err(|e| OffsyncError::Serialization(format!("反序列化条目失败: {}", e)))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// 删除条目
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.db
            .remove(self.storage_key(id).as_bytes())
            .map_err(|e| OffsyncError::KvStore(format!("删除条目失败: {}", e)))?;
        Ok(())
    }

    /// 枚举命名空间下的全部条目，返回 (id, 条目)
    ///
    /// 损坏条目（键不是 UTF-8 或值无法反序列化）当场删除并跳过。
    /// 枚举顺序是 sled 的键字典序，不是时间序，排序由调用方负责。
    pub async fn entries(&self) -> Result<Vec<(String, StoreEntry)>> {
        let prefix = self.key_prefix();
        let mut results = Vec::new();
        let mut corrupt_keys: Vec<Vec<u8>> = Vec::new();

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) =
                item.map_err(|e| OffsyncError::KvStore(format!("扫描前缀失败: {}", e)))?;

            let id = match std::str::from_utf8(&key) {
                Ok(k) => k[prefix.len()..].to_string(),
                Err(_) => {
                    corrupt_keys.push(key.to_vec());
                    continue;
                }
            };

            match serde_json::from_slice::<StoreEntry>(&value) {
                Ok(entry) => results.push((id, entry)),
                Err(e) => {
                    warn!("⚠️ 跳过损坏条目 id={}: {}", id, e);
                    corrupt_keys.push(key.to_vec());
                }
            }
        }

        for key in corrupt_keys {
            self.db
                .remove(&key)
                .map_err(|e| OffsyncError::KvStore(format!("删除损坏条目失败: {}", e)))?;
        }

        Ok(results)
    }

    /// 命名空间下的条目数量
    pub async fn len(&self) -> Result<usize> {
        let prefix = self.key_prefix();
        let mut count = 0usize;
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            item.map_err(|e| OffsyncError::KvStore(format!("扫描前缀失败: {}", e)))?;
            count += 1;
        }
        Ok(count)
    }

    /// 是否为空
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// 落盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| OffsyncError::KvStore(format!("落盘失败: {}", e)))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn raw_insert(&self, key: &str, value: &[u8]) {
        self.db.insert(key.as_bytes(), value).unwrap();
    }

    /// 测试用：让后续 put 返回存储错误，模拟磁盘满 / 存储不可用
    #[cfg(test)]
    pub(crate) fn fail_puts(&self, fail: bool) {
        self.fail_puts
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn request(body: serde_json::Value) -> OfflineRequest {
        OfflineRequest {
            method: "POST".to_string(),
            url: "/save".to_string(),
            body,
        }
    }

    #[tokio::test]
    async fn test_store_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::open(temp_dir.path(), "offline").await.unwrap();

        let entry = StoreEntry::new(request(json!({"a": 1})));
        store.put("x", &entry).await.unwrap();

        assert_eq!(store.storage_key("x"), "offline:x");

        let loaded = store.get("x").await.unwrap().unwrap();
        assert_eq!(loaded.data, entry.data);
        assert_eq!(loaded.attempts, 0);

        store.delete("x").await.unwrap();
        assert!(store.get("x").await.unwrap().is_none());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_put_same_id_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::open(temp_dir.path(), "offline").await.unwrap();

        store
            .put("x", &StoreEntry::new(request(json!({"v": 1}))))
            .await
            .unwrap();
        store
            .put("x", &StoreEntry::new(request(json!({"v": 2}))))
            .await
            .unwrap();

        assert_eq!(store.len().await.unwrap(), 1);
        let loaded = store.get("x").await.unwrap().unwrap();
        assert_eq!(loaded.data.body, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_existing_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::open(temp_dir.path(), "offline").await.unwrap();

        let inserted = store
            .put_if_absent("x", &StoreEntry::new(request(json!({"v": 1}))))
            .await
            .unwrap();
        assert!(inserted);

        let inserted = store
            .put_if_absent("x", &StoreEntry::new(request(json!({"v": 2}))))
            .await
            .unwrap();
        assert!(!inserted);

        let loaded = store.get("x").await.unwrap().unwrap();
        assert_eq!(loaded.data.body, json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_baseline_shape_deserializes() {
        // 旧格式没有 attempts / next_retry_at 字段
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::open(temp_dir.path(), "offline").await.unwrap();

        let raw = json!({
            "time": 1700000000000i64,
            "data": { "method": "POST", "url": "/save", "body": {"a": 1} }
        });
        store.raw_insert("offline:legacy", &serde_json::to_vec(&raw).unwrap());

        let entry = store.get("legacy").await.unwrap().unwrap();
        assert_eq!(entry.time, 1700000000000i64);
        assert_eq!(entry.attempts, 0);
        assert!(entry.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_skipped_and_removed() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::open(temp_dir.path(), "offline").await.unwrap();

        store
            .put("good", &StoreEntry::new(request(json!({"a": 1}))))
            .await
            .unwrap();
        store.raw_insert("offline:bad", b"not json at all");

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "good");

        // 损坏条目已被清除
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entries_ignore_foreign_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let store = QueueStore::open(temp_dir.path(), "offline").await.unwrap();

        store
            .put("x", &StoreEntry::new(request(json!({"a": 1}))))
            .await
            .unwrap();
        store.raw_insert("other:y", b"{}");

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "x");
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = QueueStore::open(temp_dir.path(), "offline").await.unwrap();
            store
                .put("x", &StoreEntry::new(request(json!({"a": 1}))))
                .await
                .unwrap();
            store.flush().await.unwrap();
        }

        let store = QueueStore::open(temp_dir.path(), "offline").await.unwrap();
        let entry = store.get("x").await.unwrap().unwrap();
        assert_eq!(entry.data.body, json!({"a": 1}));
    }

    #[test]
    fn test_expiry_boundary_is_strict() {
        let entry = StoreEntry {
            time: 1_000_000,
            data: request(json!({})),
            attempts: 0,
            next_retry_at: None,
        };
        let ttl_ms = 3_600_000;

        // 恰好等于 TTL：保留
        assert!(!entry.is_expired(1_000_000 + ttl_ms, ttl_ms));
        // 超过 TTL 一毫秒：过期
        assert!(entry.is_expired(1_000_000 + ttl_ms + 1, ttl_ms));
    }
}

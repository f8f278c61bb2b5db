use thiserror::Error;

/// SDK 统一错误类型
///
/// 约定：
/// - 提交阶段的存储错误（KvStore / Serialization / IO）必须返回给调用方，不允许静默吞掉
/// - 后台重放阶段的网络错误只通过事件流暴露，不会同步抛给原始调用方
#[derive(Debug, Error)]
pub enum OffsyncError {
    /// KV 存储错误（sled 打开/读写失败、存储不可用）
    #[error("KV store error: {0}")]
    KvStore(String),
    /// 序列化/反序列化错误（持久化条目损坏也走这里）
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// IO 错误
    #[error("IO error: {0}")]
    IO(String),
    /// 传输层错误（连接失败、DNS 失败等）
    #[error("Transport error: {0}")]
    Transport(String),
    /// 超时
    #[error("Timeout: {0}")]
    Timeout(String),
    /// 服务端返回非 2xx 状态
    #[error("Server error [{status}]: {message}")]
    Server { status: u16, message: String },
    /// 无效参数
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),
    /// 未初始化
    #[error("Not initialized: {0}")]
    NotInitialized(String),
    /// 正在关闭
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for OffsyncError {
    fn from(error: serde_json::Error) -> Self {
        OffsyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for OffsyncError {
    fn from(error: std::io::Error) -> Self {
        OffsyncError::IO(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OffsyncError>;

//! 重放失败分类与重试策略
//!
//! 基线设计在重放失败时直接丢弃（乐观删除、无重试），这是原型遗留的可靠性缺口。
//! 加固设计：按失败原因分类，可重试的带退避重新入队，超过上限进入死信事件。

use serde::{Deserialize, Serialize};

use crate::error::OffsyncError;

/// 重放失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ReplayFailureReason {
    /// 网络超时 - 可重试
    NetworkTimeout,
    /// 网络不可用 - 等待恢复后重试
    NetworkUnavailable,
    /// 服务端错误 - 根据状态码决定
    ServerError(u16),
    /// 请求体过大 - 不重试
    PayloadTooLarge,
    /// 服务端明确拒绝（4xx）- 不重试
    Rejected,
    /// 未知错误
    Unknown(String),
}

impl ReplayFailureReason {
    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplayFailureReason::NetworkTimeout => true,
            ReplayFailureReason::NetworkUnavailable => true,
            ReplayFailureReason::ServerError(code) => {
                // 5xx 服务端错误可重试，4xx 客户端错误不重试
                *code >= 500 && *code < 600
            }
            ReplayFailureReason::PayloadTooLarge => false,
            ReplayFailureReason::Rejected => false,
            // 保守策略：未知错误可重试
            ReplayFailureReason::Unknown(_) => true,
        }
    }

    /// 获取重试延迟倍数
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            ReplayFailureReason::NetworkTimeout => 1.0,
            ReplayFailureReason::NetworkUnavailable => 2.0,
            ReplayFailureReason::ServerError(_) => 1.5,
            _ => 1.0,
        }
    }
}

impl From<&OffsyncError> for ReplayFailureReason {
    fn from(error: &OffsyncError) -> Self {
        match error {
            OffsyncError::Timeout(_) => ReplayFailureReason::NetworkTimeout,
            OffsyncError::Transport(_) => ReplayFailureReason::NetworkUnavailable,
            OffsyncError::Server { status, .. } if *status == 413 => {
                ReplayFailureReason::PayloadTooLarge
            }
            OffsyncError::Server { status, .. } if *status >= 400 && *status < 500 => {
                ReplayFailureReason::Rejected
            }
            OffsyncError::Server { status, .. } => ReplayFailureReason::ServerError(*status),
            other => ReplayFailureReason::Unknown(other.to_string()),
        }
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础延迟时间（秒）
    pub base_delay_seconds: u64,
    /// 最大延迟时间（秒）
    pub max_delay_seconds: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_seconds: 1,
            max_delay_seconds: 300, // 5分钟
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 检查是否应该重试
    pub fn should_retry(&self, attempts: u32, reason: &ReplayFailureReason) -> bool {
        attempts < self.max_retries && reason.is_retryable()
    }

    /// 计算下次重试时间（UTC 秒时间戳）
    ///
    /// 不应重试时返回 None。
    pub fn next_retry_at(
        &self,
        now_secs: i64,
        attempts: u32,
        reason: &ReplayFailureReason,
    ) -> Option<i64> {
        if !self.should_retry(attempts, reason) {
            return None;
        }

        // 基础延迟 = base_delay * (backoff_factor ^ attempts)
        let base_delay = self.base_delay_seconds as f64 * self.backoff_factor.powf(attempts as f64);
        let adjusted = base_delay * reason.delay_multiplier();
        let capped = adjusted.min(self.max_delay_seconds as f64);

        // 随机抖动，避免同批条目齐步重试
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped + jitter).max(0.0);

        Some(now_secs + final_delay as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_retryable() {
        assert!(ReplayFailureReason::NetworkTimeout.is_retryable());
        assert!(ReplayFailureReason::NetworkUnavailable.is_retryable());
        assert!(ReplayFailureReason::ServerError(500).is_retryable());
        assert!(!ReplayFailureReason::ServerError(404).is_retryable());
        assert!(!ReplayFailureReason::PayloadTooLarge.is_retryable());
        assert!(!ReplayFailureReason::Rejected.is_retryable());
        assert!(ReplayFailureReason::Unknown("?".to_string()).is_retryable());
    }

    #[test]
    fn test_error_classification() {
        let timeout = OffsyncError::Timeout("replay".to_string());
        assert_eq!(
            ReplayFailureReason::from(&timeout),
            ReplayFailureReason::NetworkTimeout
        );

        let forbidden = OffsyncError::Server {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert_eq!(
            ReplayFailureReason::from(&forbidden),
            ReplayFailureReason::Rejected
        );

        let unavailable = OffsyncError::Server {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(
            ReplayFailureReason::from(&unavailable),
            ReplayFailureReason::ServerError(503)
        );

        let too_large = OffsyncError::Server {
            status: 413,
            message: "too large".to_string(),
        };
        assert_eq!(
            ReplayFailureReason::from(&too_large),
            ReplayFailureReason::PayloadTooLarge
        );
    }

    #[test]
    fn test_retry_policy_limits() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0, &ReplayFailureReason::NetworkTimeout));
        assert!(!policy.should_retry(10, &ReplayFailureReason::NetworkTimeout));
        assert!(!policy.should_retry(0, &ReplayFailureReason::Rejected));

        let next = policy.next_retry_at(1000, 0, &ReplayFailureReason::NetworkTimeout);
        assert!(next.is_some());
        assert!(next.unwrap() >= 1000);

        assert!(policy
            .next_retry_at(1000, 10, &ReplayFailureReason::NetworkTimeout)
            .is_none());
        assert!(policy
            .next_retry_at(1000, 0, &ReplayFailureReason::PayloadTooLarge)
            .is_none());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };

        // attempts=4 → 1 * 2^4 * 2.0 = 32 秒（NetworkUnavailable 倍数 2.0）
        let next = policy
            .next_retry_at(0, 4, &ReplayFailureReason::NetworkUnavailable)
            .unwrap();
        assert_eq!(next, 32);

        // 延迟上限 max_delay_seconds
        let policy = RetryPolicy {
            max_retries: 100,
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        let next = policy
            .next_retry_at(0, 50, &ReplayFailureReason::NetworkTimeout)
            .unwrap();
        assert_eq!(next, policy.max_delay_seconds as i64);
    }
}

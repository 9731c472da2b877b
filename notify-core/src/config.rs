//! 引擎配置
//!
//! 与事件引擎配置同形：普通结构体 + `Default`，交给 builder 注入。
//! 支持 serde 反序列化，缺省字段回落到默认值。
//!
use crate::error::{NotifyError, NotifyResult};
use crate::model::Channel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 通道重试策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次），至少为 1
    pub max_attempts: u32,
    /// 两次尝试之间的等待
    pub backoff: Duration,
}

impl RetryPolicy {
    /// 只尝试一次，失败即定案
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub const fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// 模拟传输的延迟与失败率
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationProfile {
    pub latency: Duration,
    /// 取值 [0, 1]
    pub failure_rate: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub profile: SimulationProfile,
    pub retry: RetryPolicy,
}

impl ChannelConfig {
    pub fn chat() -> Self {
        Self {
            profile: SimulationProfile {
                latency: Duration::from_millis(150),
                failure_rate: 0.10,
            },
            retry: RetryPolicy::none(),
        }
    }

    pub fn email() -> Self {
        Self {
            profile: SimulationProfile {
                latency: Duration::from_millis(300),
                failure_rate: 0.15,
            },
            retry: RetryPolicy::none(),
        }
    }

    pub fn phone_call() -> Self {
        Self {
            profile: SimulationProfile {
                latency: Duration::from_millis(1000),
                failure_rate: 0.20,
            },
            retry: RetryPolicy::attempts(3),
        }
    }

    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Chat => Self::chat(),
            Channel::Email => Self::email(),
            Channel::PhoneCall => Self::phone_call(),
        }
    }
}

/// 通知引擎配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// 历史缓冲容量
    pub history_capacity: usize,
    /// 投递 worker 池大小（所有通道共享）
    pub worker_pool_size: usize,
    pub chat: ChannelConfig,
    pub email: ChannelConfig,
    pub phone_call: ChannelConfig,
    /// 终态条目在缓存中的保留时长；`None` 表示永不淘汰
    pub cache_ttl: Option<Duration>,
    /// 淘汰扫描间隔
    pub eviction_interval: Duration,
    /// 自动重投失败事件的间隔；`None` 表示只允许手动重投
    pub retry_interval: Option<Duration>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            worker_pool_size: 16,
            chat: ChannelConfig::chat(),
            email: ChannelConfig::email(),
            phone_call: ChannelConfig::phone_call(),
            cache_ttl: None,
            eviction_interval: Duration::from_secs(30),
            retry_interval: None,
        }
    }
}

impl NotificationConfig {
    pub fn channel(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Chat => &self.chat,
            Channel::Email => &self.email,
            Channel::PhoneCall => &self.phone_call,
        }
    }

    pub fn validate(&self) -> NotifyResult<()> {
        if self.history_capacity == 0 {
            return Err(NotifyError::invalid_config("history_capacity must be > 0"));
        }
        if self.worker_pool_size == 0 {
            return Err(NotifyError::invalid_config("worker_pool_size must be > 0"));
        }
        if self.eviction_interval.is_zero() {
            return Err(NotifyError::invalid_config("eviction_interval must be > 0"));
        }
        if self.retry_interval.is_some_and(|d| d.is_zero()) {
            return Err(NotifyError::invalid_config("retry_interval must be > 0"));
        }
        for channel in Channel::ALL {
            let cfg = self.channel(channel);
            if cfg.retry.max_attempts == 0 {
                return Err(NotifyError::invalid_config(format!(
                    "{channel}: max_attempts must be >= 1"
                )));
            }
            if !(0.0..=1.0).contains(&cfg.profile.failure_rate) {
                return Err(NotifyError::invalid_config(format!(
                    "{channel}: failure_rate must be within [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_channel_profiles() {
        let cfg = NotificationConfig::default();
        assert_eq!(cfg.history_capacity, 50);
        assert_eq!(cfg.chat.retry.max_attempts, 1);
        assert_eq!(cfg.email.retry.max_attempts, 1);
        assert_eq!(cfg.phone_call.retry.max_attempts, 3);
        assert_eq!(cfg.phone_call.profile.latency, Duration::from_millis(1000));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut cfg = NotificationConfig::default();
        cfg.email.retry.max_attempts = 0;
        match cfg.validate() {
            Err(NotifyError::InvalidConfig { reason }) => assert!(reason.starts_with("email")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_out_of_range_failure_rate() {
        let mut cfg = NotificationConfig::default();
        cfg.chat.profile.failure_rate = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let cfg: NotificationConfig =
            serde_json::from_value(serde_json::json!({ "history_capacity": 10 })).unwrap();
        assert_eq!(cfg.history_capacity, 10);
        assert_eq!(cfg.worker_pool_size, 16);
        assert_eq!(cfg.phone_call.retry.max_attempts, 3);
    }
}

//! 引擎统一错误定义
//!
//! 投递失败在通道边界被吸收并转换为可观测状态（缓存 + 历史），
//! 这里的错误类型用于日志、配置校验与引擎生命周期。
//!
use crate::model::Channel;
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: channel={channel}, attempts={attempts}, reason={reason}")]
    Delivery {
        channel: Channel,
        attempts: u32,
        reason: String,
    },

    #[error("notification engine stopped")]
    EngineStopped,

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

impl NotifyError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type NotifyResult<T> = Result<T, NotifyError>;

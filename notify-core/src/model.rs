//! 通知数据模型
//!
//! `NotificationEvent` 为在管道、缓存与历史之间流转的事件记录：
//! - `id` 为空时由摄入管道生成，之后不可变；
//! - `priority` 与 `timestamp` 由生产者设置，管道不会改写；
//! - `status` 为 `None` 表示未设置，首次摄入时补全为 `Pending`。
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// 事件优先级：决定扇出到哪些通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// 事件生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

/// 投递通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Chat,
    Email,
    PhoneCall,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Chat, Channel::Email, Channel::PhoneCall];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Chat => "chat",
            Channel::Email => "email",
            Channel::PhoneCall => "phone_call",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个（事件, 通道）的投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelOutcome {
    Pending,
    Delivered,
    Failed { reason: String },
}

impl ChannelOutcome {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// 事件唯一标识；为空时由管道生成
    #[builder(default, into)]
    #[serde(default)]
    id: String,
    /// 事件来源标签
    #[builder(into)]
    source: String,
    /// 通知内容
    #[builder(into)]
    message: String,
    priority: Priority,
    /// 生产者设置的创建时间
    #[builder(default = Utc::now())]
    timestamp: DateTime<Utc>,
    status: Option<NotificationStatus>,
}

impl NotificationEvent {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> Option<NotificationStatus> {
        self.status
    }

    pub(crate) fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        debug_assert!(self.id.is_empty(), "event id is immutable once assigned");
        self.id = id;
    }

    pub(crate) fn set_status(&mut self, status: NotificationStatus) {
        self.status = Some(status);
    }
}

//! 通道传输（ChannelTransport）
//!
//! 真实的投递实现（聊天、邮件、电话）属于外部协作方，这里只定义协议：
//! 一次 `attempt` 要么成功，要么以人类可读的原因失败。
//! `SimulatedTransport` 按延迟与失败率模拟投递，用于演示与压测。
//!
use crate::config::{ChannelConfig, SimulationProfile};
use crate::model::{Channel, NotificationEvent};
use async_trait::async_trait;
use rand::Rng;
use tracing::info;

/// 通道传输：尝试把事件投递到具体通道
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// 该传输服务的通道
    fn channel(&self) -> Channel;
    /// 尝试投递一次；可能阻塞调用方达通道延迟
    async fn attempt(&self, event: &NotificationEvent) -> anyhow::Result<()>;
}

/// 模拟传输：固定延迟 + 概率失败
#[derive(Clone, Debug)]
pub struct SimulatedTransport {
    channel: Channel,
    profile: SimulationProfile,
}

impl SimulatedTransport {
    pub fn new(channel: Channel, profile: SimulationProfile) -> Self {
        Self { channel, profile }
    }

    pub fn chat() -> Self {
        Self::new(Channel::Chat, ChannelConfig::chat().profile)
    }

    pub fn email() -> Self {
        Self::new(Channel::Email, ChannelConfig::email().profile)
    }

    pub fn phone_call() -> Self {
        Self::new(Channel::PhoneCall, ChannelConfig::phone_call().profile)
    }

    pub fn profile(&self) -> &SimulationProfile {
        &self.profile
    }
}

#[async_trait]
impl ChannelTransport for SimulatedTransport {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn attempt(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        tokio::time::sleep(self.profile.latency).await;

        let failed = rand::rng().random_bool(self.profile.failure_rate.clamp(0.0, 1.0));
        if failed {
            anyhow::bail!("error sending {} notification", self.channel);
        }
        info!(event_id = event.id(), channel = %self.channel, "notification sent");
        Ok(())
    }
}

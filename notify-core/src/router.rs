//! 优先级路由（PriorityRouter）
//!
//! 纯分发决策：所有事件进入聊天通道；MEDIUM 及以上追加邮件；HIGH 追加电话。
//! 路由只负责入队，不做任何阻塞工作，各通道独立并发完成。
//!
use crate::cache::Round;
use crate::dispatcher::ChannelDispatcher;
use crate::model::{Channel, NotificationEvent, Priority};
use tracing::warn;

const LOW_CHANNELS: &[Channel] = &[Channel::Chat];
const MEDIUM_CHANNELS: &[Channel] = &[Channel::Chat, Channel::Email];
const HIGH_CHANNELS: &[Channel] = &[Channel::Chat, Channel::Email, Channel::PhoneCall];

/// 优先级对应的投递通道
pub fn channels_for(priority: Priority) -> &'static [Channel] {
    match priority {
        Priority::Low => LOW_CHANNELS,
        Priority::Medium => MEDIUM_CHANNELS,
        Priority::High => HIGH_CHANNELS,
    }
}

#[derive(Clone, Debug)]
pub struct PriorityRouter {
    chat: ChannelDispatcher,
    email: ChannelDispatcher,
    phone_call: ChannelDispatcher,
}

impl PriorityRouter {
    pub(crate) fn new(
        chat: ChannelDispatcher,
        email: ChannelDispatcher,
        phone_call: ChannelDispatcher,
    ) -> Self {
        Self {
            chat,
            email,
            phone_call,
        }
    }

    fn dispatcher(&self, channel: Channel) -> &ChannelDispatcher {
        match channel {
            Channel::Chat => &self.chat,
            Channel::Email => &self.email,
            Channel::PhoneCall => &self.phone_call,
        }
    }

    /// 把事件分发到其优先级对应的通道
    pub(crate) fn route(&self, event: &NotificationEvent, round: Round) {
        for channel in channels_for(event.priority()) {
            if let Err(err) = self.dispatcher(*channel).deliver(event.clone(), round) {
                warn!(event_id = event.id(), channel = %channel, error = %err, "dispatch dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_grows_with_priority() {
        assert_eq!(channels_for(Priority::Low), &[Channel::Chat]);
        assert_eq!(
            channels_for(Priority::Medium),
            &[Channel::Chat, Channel::Email]
        );
        assert_eq!(channels_for(Priority::High), &Channel::ALL);
    }

    #[test]
    fn every_priority_reaches_chat() {
        for p in [Priority::Low, Priority::Medium, Priority::High] {
            assert!(channels_for(p).contains(&Channel::Chat));
        }
    }
}

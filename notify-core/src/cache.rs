//! 状态缓存（StatusCache）
//!
//! 以事件 ID 为键保存最新事件记录，并按“投递轮次”记录每个通道的结果：
//! - 每次摄入同一 ID 都会开启新的一轮，旧轮次迟到的结果被丢弃；
//! - 事件状态由本轮各通道结果聚合得出，而不是被最后写入的通道覆盖；
//! - 同一条目的更新由 `DashMap` 分片锁串行化。
//!
use crate::model::{Channel, ChannelOutcome, NotificationEvent, NotificationStatus};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 投递轮次编号，单条目内单调递增
pub type Round = u64;

#[derive(Debug, Clone)]
struct CacheEntry {
    event: NotificationEvent,
    round: Round,
    outcomes: BTreeMap<Channel, ChannelOutcome>,
    /// 本轮所有通道均已出结果的时间
    settled_at: Option<Instant>,
}

impl CacheEntry {
    fn aggregate_status(&self) -> NotificationStatus {
        let mut all_delivered = true;
        for outcome in self.outcomes.values() {
            match outcome {
                ChannelOutcome::Failed { .. } => return NotificationStatus::Failed,
                ChannelOutcome::Pending => all_delivered = false,
                ChannelOutcome::Delivered => {}
            }
        }
        if all_delivered {
            NotificationStatus::Delivered
        } else {
            NotificationStatus::Pending
        }
    }

    fn all_settled(&self) -> bool {
        self.outcomes.values().all(ChannelOutcome::is_settled)
    }
}

/// 一次失败重投的领取结果
#[derive(Debug, Clone)]
pub struct Resubmission {
    /// 扫描时的 FAILED 副本
    pub failed: NotificationEvent,
    /// 已重置为 PENDING 的事件
    pub pending: NotificationEvent,
    pub round: Round,
}

fn pending_outcomes(channels: &[Channel]) -> BTreeMap<Channel, ChannelOutcome> {
    channels
        .iter()
        .map(|c| (*c, ChannelOutcome::Pending))
        .collect()
}

#[derive(Debug, Default)]
pub struct StatusCache {
    entries: DashMap<String, CacheEntry>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入（或覆盖）事件并开启新的投递轮次，`channels` 为本轮需要投递的通道。
    ///
    /// 事件必须已具备 ID 与状态。
    pub fn upsert(&self, event: NotificationEvent, channels: &[Channel]) -> Round {
        self.upsert_with(event, channels, |_| {})
    }

    /// 同 `upsert`，`on_write` 在条目锁内以写入后的事件调用
    pub fn upsert_with(
        &self,
        event: NotificationEvent,
        channels: &[Channel],
        on_write: impl FnOnce(&NotificationEvent),
    ) -> Round {
        let outcomes = pending_outcomes(channels);

        let mut entry = self
            .entries
            .entry(event.id().to_string())
            .and_modify(|e| {
                e.round += 1;
                e.outcomes = outcomes.clone();
                e.settled_at = None;
            })
            .or_insert_with(|| CacheEntry {
                event: event.clone(),
                round: 1,
                outcomes: outcomes.clone(),
                settled_at: None,
            });
        entry.event = event;
        on_write(&entry.event);
        entry.round
    }

    pub fn get(&self, id: &str) -> Option<NotificationEvent> {
        self.entries.get(id).map(|e| e.event.clone())
    }

    pub fn status_of(&self, id: &str) -> Option<NotificationStatus> {
        self.entries.get(id).and_then(|e| e.event.status())
    }

    /// 当前处于 `status` 的全部事件（按时间戳、ID 排序的快照）
    pub fn all_with_status(&self, status: NotificationStatus) -> Vec<NotificationEvent> {
        let mut events: Vec<NotificationEvent> = self
            .entries
            .iter()
            .filter(|e| e.event.status() == Some(status))
            .map(|e| e.event.clone())
            .collect();
        events.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.id().cmp(b.id()))
        });
        events
    }

    /// 记录某通道在 `round` 轮的投递结果，返回聚合状态后的事件副本。
    ///
    /// 条目不存在、轮次已过期或该通道不在本轮时返回 `None`。
    pub fn record_outcome(
        &self,
        id: &str,
        round: Round,
        channel: Channel,
        outcome: ChannelOutcome,
    ) -> Option<NotificationEvent> {
        self.record_outcome_with(id, round, channel, outcome, |_| {})
    }

    /// 同 `record_outcome`，`on_write` 在条目锁内以更新后的事件调用，
    /// 因此观察者看到的更新顺序与缓存一致
    pub fn record_outcome_with(
        &self,
        id: &str,
        round: Round,
        channel: Channel,
        outcome: ChannelOutcome,
        on_write: impl FnOnce(&NotificationEvent),
    ) -> Option<NotificationEvent> {
        let mut entry = self.entries.get_mut(id)?;
        if entry.round != round {
            debug!(event_id = id, channel = %channel, round, current = entry.round, "discarding stale outcome");
            return None;
        }
        let slot = entry.outcomes.get_mut(&channel)?;
        *slot = outcome;

        let status = entry.aggregate_status();
        entry.event.set_status(status);
        if entry.settled_at.is_none() && entry.all_settled() {
            entry.settled_at = Some(Instant::now());
        }
        on_write(&entry.event);
        Some(entry.event.clone())
    }

    /// 若条目当前为 FAILED，则在同一把锁内重置为 PENDING 并开启新一轮。
    ///
    /// 返回重置前的 FAILED 副本、重置后的事件与新轮次；条目不存在或已不是
    /// FAILED（例如已被另一次扫描领走）时返回 `None`。
    pub fn reset_failed_with(
        &self,
        id: &str,
        channels: &[Channel],
        on_write: impl FnOnce(&NotificationEvent),
    ) -> Option<Resubmission> {
        let mut entry = self.entries.get_mut(id)?;
        if entry.event.status() != Some(NotificationStatus::Failed) {
            return None;
        }
        let failed = entry.event.clone();
        entry.round += 1;
        entry.outcomes = pending_outcomes(channels);
        entry.settled_at = None;
        entry.event.set_status(NotificationStatus::Pending);
        on_write(&entry.event);
        Some(Resubmission {
            failed,
            pending: entry.event.clone(),
            round: entry.round,
        })
    }

    /// 本轮各通道的投递结果
    pub fn channel_outcomes(&self, id: &str) -> Option<Vec<(Channel, ChannelOutcome)>> {
        self.entries.get(id).map(|e| {
            e.outcomes
                .iter()
                .map(|(c, o)| (*c, o.clone()))
                .collect()
        })
    }

    /// 淘汰已定案且超过 `ttl` 的条目，返回淘汰数量
    pub fn evict_settled(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.entries.retain(|_, e| {
            let expired = e.event.status().is_some_and(|s| s.is_terminal())
                && e.settled_at.is_some_and(|at| now.duration_since(at) >= ttl);
            if expired {
                evicted += 1;
            }
            !expired
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

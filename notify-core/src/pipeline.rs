//! 摄入管道（EventIngestionPipeline）
//!
//! 唯一入口。所有事件经同一条有序、无界的摄入通道串行处理，
//! 因此缓存写入与历史追加的顺序与发布顺序一致；慢消费时事件被缓冲而非丢弃。
//!
//! 每个事件依次：补全 ID → 补全状态 → 写入缓存（开启新投递轮次）并在同一把
//! 条目锁内追加历史 → 交给优先级路由。下游错误不会回传给发布方。
//!
//! 重投扫描领取的事件在缓存中已重置为 PENDING 并开启新轮次，
//! 经由同一通道只做路由。
//!
use crate::cache::{Round, StatusCache};
use crate::history::HistoryBuffer;
use crate::model::{NotificationEvent, NotificationStatus};
use crate::router::{PriorityRouter, channels_for};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
enum Ingest {
    /// 生产者发布
    Publish(NotificationEvent),
    /// 重投扫描已领取的事件：缓存已重置，仅需路由
    Resubmit {
        event: NotificationEvent,
        round: Round,
    },
}

/// 摄入管道句柄
#[derive(Clone, Debug)]
pub struct EventIngestionPipeline {
    tx: mpsc::UnboundedSender<Ingest>,
}

impl EventIngestionPipeline {
    pub(crate) fn spawn(
        cache: Arc<StatusCache>,
        history: Arc<HistoryBuffer>,
        router: PriorityRouter,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let lane = Lane {
            cache,
            history,
            router,
        };
        let task = tokio::spawn(lane.run(rx, token));
        (Self { tx }, task)
    }

    /// 发布事件（fire-and-forget）
    pub fn publish(&self, event: NotificationEvent) {
        self.send(Ingest::Publish(event));
    }

    pub(crate) fn resubmit(&self, event: NotificationEvent, round: Round) {
        self.send(Ingest::Resubmit { event, round });
    }

    fn send(&self, ingest: Ingest) {
        if let Err(mpsc::error::SendError(dropped)) = self.tx.send(ingest) {
            warn!(?dropped, "notification engine stopped, event dropped");
        }
    }
}

struct Lane {
    cache: Arc<StatusCache>,
    history: Arc<HistoryBuffer>,
    router: PriorityRouter,
}

impl Lane {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Ingest>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(ingest) => self.ingest(ingest),
                    None => break,
                },
            }
        }
        debug!("ingestion lane stopped");
    }

    fn ingest(&self, ingest: Ingest) {
        match ingest {
            Ingest::Publish(event) => self.publish(event),
            Ingest::Resubmit { event, round } => {
                info!(event_id = event.id(), round, "routing resubmitted event");
                self.router.route(&event, round);
            }
        }
    }

    fn publish(&self, mut event: NotificationEvent) {
        if !event.has_id() {
            event.assign_id(Uuid::new_v4().to_string());
        }
        if event.status().is_none() {
            // 已知 ID 沿用缓存中的状态，首次摄入则为 PENDING
            let status = self
                .cache
                .status_of(event.id())
                .unwrap_or(NotificationStatus::Pending);
            event.set_status(status);
        }

        let round = self.cache.upsert_with(
            event.clone(),
            channels_for(event.priority()),
            |written| self.history.append(written.clone()),
        );
        info!(
            event_id = event.id(),
            source = event.source(),
            priority = ?event.priority(),
            round,
            "routing event"
        );
        self.router.route(&event, round);
    }
}

//! 失败重投（RetryScanner）
//!
//! 对状态缓存做快照扫描，取出当前为 FAILED 的事件并经摄入管道重新提交。
//! 扫描开始后才变为 FAILED 的事件不在本次结果内。
//!
//! 每个条目的“仍为 FAILED → 重置为 PENDING 并开启新轮次”在同一把条目锁内完成，
//! 并发或连续的扫描不会重复领取同一事件。
//!
use crate::cache::StatusCache;
use crate::history::HistoryBuffer;
use crate::model::{NotificationEvent, NotificationStatus};
use crate::pipeline::EventIngestionPipeline;
use crate::router::channels_for;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone, Debug)]
pub struct RetryScanner {
    cache: Arc<StatusCache>,
    history: Arc<HistoryBuffer>,
    pipeline: EventIngestionPipeline,
}

impl RetryScanner {
    pub(crate) fn new(
        cache: Arc<StatusCache>,
        history: Arc<HistoryBuffer>,
        pipeline: EventIngestionPipeline,
    ) -> Self {
        Self {
            cache,
            history,
            pipeline,
        }
    }

    /// 重投全部 FAILED 事件，返回扫描时的快照（仍带 FAILED 标记）
    #[instrument(skip(self))]
    pub fn retry_failed(&self) -> Vec<NotificationEvent> {
        let mut resubmitted = Vec::new();
        for candidate in self.cache.all_with_status(NotificationStatus::Failed) {
            let claimed = self.cache.reset_failed_with(
                candidate.id(),
                channels_for(candidate.priority()),
                |pending| self.history.append(pending.clone()),
            );
            if let Some(claimed) = claimed {
                self.pipeline.resubmit(claimed.pending, claimed.round);
                resubmitted.push(claimed.failed);
            }
        }
        if !resubmitted.is_empty() {
            info!(count = resubmitted.len(), "resubmitted failed notifications");
        }
        resubmitted
    }
}

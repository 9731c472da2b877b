//! 通道投递器（ChannelDispatcher）
//!
//! 每个通道一个常驻 worker：无界输入队列 + 处理循环，生命周期与引擎一致。
//! 队列中的投递按先进先出顺序向共享 worker 池申请许可，拿到许可后脱离摄入
//! 管道并发执行；同一通道的多个事件、同一事件的多个通道都可以并行。
//!
//! 投递结果写回状态缓存并追加到历史；失败在此处被记录并吞掉，
//! 不会传回路由器或生产者。
//!
use crate::cache::{Round, StatusCache};
use crate::config::RetryPolicy;
use crate::error::{NotifyError, NotifyResult};
use crate::history::HistoryBuffer;
use crate::model::{Channel, ChannelOutcome, NotificationEvent};
use crate::transport::ChannelTransport;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 一次待投递的请求
#[derive(Debug, Clone)]
pub(crate) struct Dispatch {
    pub(crate) event: NotificationEvent,
    pub(crate) round: Round,
}

/// 投递结果的落点：缓存 + 历史
#[derive(Clone)]
pub(crate) struct DeliverySink {
    pub(crate) cache: Arc<StatusCache>,
    pub(crate) history: Arc<HistoryBuffer>,
}

impl DeliverySink {
    /// 历史追加在缓存条目锁内完成，两者的更新顺序保持一致
    fn record(&self, dispatch: &Dispatch, channel: Channel, outcome: ChannelOutcome) {
        let recorded = self.cache.record_outcome_with(
            dispatch.event.id(),
            dispatch.round,
            channel,
            outcome,
            |updated| self.history.append(updated.clone()),
        );
        if recorded.is_none() {
            debug!(
                event_id = dispatch.event.id(),
                channel = %channel,
                "outcome not recorded: entry evicted or round superseded"
            );
        }
    }
}

/// 投递器句柄：向通道 worker 的队列提交事件
#[derive(Clone, Debug)]
pub struct ChannelDispatcher {
    channel: Channel,
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl ChannelDispatcher {
    /// 启动通道 worker，返回句柄与处理循环任务
    pub(crate) fn spawn(
        transport: Arc<dyn ChannelTransport>,
        retry: RetryPolicy,
        sink: DeliverySink,
        pool: Arc<Semaphore>,
        tracker: TaskTracker,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let channel = transport.channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            channel,
            transport,
            retry,
            sink,
        };
        let task = tokio::spawn(worker.run(rx, pool, tracker, token));
        (Self { channel, tx }, task)
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// 提交一次投递；worker 已停止时返回 `EngineStopped`
    pub(crate) fn deliver(&self, event: NotificationEvent, round: Round) -> NotifyResult<()> {
        self.tx
            .send(Dispatch { event, round })
            .map_err(|_| NotifyError::EngineStopped)
    }
}

struct Worker {
    channel: Channel,
    transport: Arc<dyn ChannelTransport>,
    retry: RetryPolicy,
    sink: DeliverySink,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<Dispatch>,
        pool: Arc<Semaphore>,
        tracker: TaskTracker,
        token: CancellationToken,
    ) {
        let worker = Arc::new(self);

        loop {
            let dispatch = tokio::select! {
                _ = token.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(d) => d,
                    None => break,
                },
            };

            // 按入队顺序申请许可，保证同一通道内先到先调度
            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = pool.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let worker = worker.clone();
            let token = token.clone();
            tracker.spawn(async move {
                let _permit = permit;
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = worker.deliver(dispatch) => {}
                }
            });
        }

        debug!(channel = %worker.channel, "dispatcher loop stopped");
    }

    async fn deliver(&self, dispatch: Dispatch) {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            match self.transport.attempt(&dispatch.event).await {
                Ok(()) => {
                    info!(
                        event_id = dispatch.event.id(),
                        channel = %self.channel,
                        attempt,
                        "delivery succeeded"
                    );
                    self.sink
                        .record(&dispatch, self.channel, ChannelOutcome::Delivered);
                    return;
                }
                Err(err) => {
                    last_reason = err.to_string();
                    warn!(
                        event_id = dispatch.event.id(),
                        channel = %self.channel,
                        attempt,
                        max_attempts,
                        reason = %last_reason,
                        "delivery attempt failed"
                    );
                    if attempt < max_attempts && !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }

        let err = NotifyError::Delivery {
            channel: self.channel,
            attempts: max_attempts,
            reason: last_reason.clone(),
        };
        warn!(event_id = dispatch.event.id(), error = %err, "delivery settled as failed");
        self.sink.record(
            &dispatch,
            self.channel,
            ChannelOutcome::Failed {
                reason: last_reason,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotificationStatus, Priority};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 前 `fail_first` 次失败，之后成功
    struct FlakyTransport {
        channel: Channel,
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChannelTransport for FlakyTransport {
        fn channel(&self) -> Channel {
            self.channel
        }
        async fn attempt(&self, _event: &NotificationEvent) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("flaky failure #{}", n + 1);
            }
            Ok(())
        }
    }

    struct Harness {
        dispatcher: ChannelDispatcher,
        transport: Arc<FlakyTransport>,
        sink: DeliverySink,
        token: CancellationToken,
    }

    fn harness(channel: Channel, fail_first: usize, retry: RetryPolicy) -> Harness {
        let transport = Arc::new(FlakyTransport {
            channel,
            fail_first,
            calls: AtomicUsize::new(0),
        });
        let sink = DeliverySink {
            cache: Arc::new(StatusCache::new()),
            history: Arc::new(HistoryBuffer::default()),
        };
        let token = CancellationToken::new();
        let (dispatcher, _task) = ChannelDispatcher::spawn(
            transport.clone(),
            retry,
            sink.clone(),
            Arc::new(Semaphore::new(4)),
            TaskTracker::new(),
            token.clone(),
        );
        Harness {
            dispatcher,
            transport,
            sink,
            token,
        }
    }

    fn submit(h: &Harness, id: &str) {
        let ev = NotificationEvent::builder()
            .id(id)
            .source("TEST")
            .message("msg")
            .priority(Priority::High)
            .status(NotificationStatus::Pending)
            .build();
        let round = h.sink.cache.upsert(ev.clone(), &[h.dispatcher.channel()]);
        h.dispatcher.deliver(ev, round).unwrap();
    }

    async fn wait_settled(h: &Harness, id: &str) -> NotificationStatus {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match h.sink.cache.status_of(id) {
                    Some(s) if s.is_terminal() => return s,
                    _ => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
        })
        .await
        .expect("event did not settle")
    }

    #[tokio::test]
    async fn single_attempt_channel_settles_failed_on_first_error() {
        let h = harness(Channel::Email, 1, RetryPolicy::none());
        submit(&h, "e-1");

        assert_eq!(wait_settled(&h, "e-1").await, NotificationStatus::Failed);
        assert_eq!(h.transport.calls.load(Ordering::SeqCst), 1);

        let last = h.sink.history.snapshot().pop().unwrap();
        assert_eq!(last.status(), Some(NotificationStatus::Failed));
        h.token.cancel();
    }

    #[tokio::test]
    async fn retrying_channel_recovers_within_attempt_budget() {
        let h = harness(Channel::PhoneCall, 2, RetryPolicy::attempts(3));
        submit(&h, "p-1");

        assert_eq!(wait_settled(&h, "p-1").await, NotificationStatus::Delivered);
        assert_eq!(h.transport.calls.load(Ordering::SeqCst), 3);
        h.token.cancel();
    }

    #[tokio::test]
    async fn retrying_channel_gives_up_after_budget() {
        let h = harness(Channel::PhoneCall, usize::MAX, RetryPolicy::attempts(3));
        submit(&h, "p-2");

        assert_eq!(wait_settled(&h, "p-2").await, NotificationStatus::Failed);
        assert_eq!(h.transport.calls.load(Ordering::SeqCst), 3);
        match h.sink.cache.channel_outcomes("p-2").unwrap().as_slice() {
            [(Channel::PhoneCall, ChannelOutcome::Failed { reason })] => {
                assert_eq!(reason, "flaky failure #3")
            }
            other => panic!("unexpected {other:?}"),
        }
        h.token.cancel();
    }

    #[tokio::test]
    async fn worker_processes_an_unbounded_sequence() {
        let h = harness(Channel::Chat, 0, RetryPolicy::none());
        for i in 0..20 {
            submit(&h, &format!("c-{i}"));
        }
        for i in 0..20 {
            assert_eq!(
                wait_settled(&h, &format!("c-{i}")).await,
                NotificationStatus::Delivered
            );
        }
        assert_eq!(h.transport.calls.load(Ordering::SeqCst), 20);
        h.token.cancel();
    }

    #[tokio::test]
    async fn deliver_after_shutdown_reports_engine_stopped() {
        let transport = Arc::new(FlakyTransport {
            channel: Channel::Chat,
            fail_first: 0,
            calls: AtomicUsize::new(0),
        });
        let token = CancellationToken::new();
        let (dispatcher, task) = ChannelDispatcher::spawn(
            transport,
            RetryPolicy::none(),
            DeliverySink {
                cache: Arc::new(StatusCache::new()),
                history: Arc::new(HistoryBuffer::default()),
            },
            Arc::new(Semaphore::new(1)),
            TaskTracker::new(),
            token.clone(),
        );
        token.cancel();
        task.await.unwrap();

        let ev = NotificationEvent::builder()
            .id("late")
            .source("TEST")
            .message("msg")
            .priority(Priority::Low)
            .build();
        assert!(matches!(
            dispatcher.deliver(ev, 1),
            Err(NotifyError::EngineStopped)
        ));
    }
}

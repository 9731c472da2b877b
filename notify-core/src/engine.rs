//! 通知引擎（NotificationEngine）
//!
//! 装配并启动所有长驻任务：
//! - 三个通道投递 worker（共享一个有界 worker 池）；
//! - 串行摄入通道；
//! - 可选的周期任务：缓存淘汰、自动重投；
//! - 返回 `NotificationSystem` 作为对外 API，并负责关闭与等待。
//!
use crate::cache::StatusCache;
use crate::config::NotificationConfig;
use crate::dispatcher::{ChannelDispatcher, DeliverySink};
use crate::error::{NotifyError, NotifyResult};
use crate::history::HistoryBuffer;
use crate::model::{Channel, ChannelOutcome, NotificationEvent};
use crate::pipeline::EventIngestionPipeline;
use crate::retry::RetryScanner;
use crate::router::PriorityRouter;
use crate::transport::{ChannelTransport, SimulatedTransport};
use bon::Builder;
use futures_core::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// NotificationEngine：
/// - 每个通道注入一个 `ChannelTransport`
/// - `start` 后返回运行中的 `NotificationSystem`
#[derive(Builder)]
pub struct NotificationEngine {
    chat: Arc<dyn ChannelTransport>,
    email: Arc<dyn ChannelTransport>,
    phone_call: Arc<dyn ChannelTransport>,
    #[builder(default)]
    config: NotificationConfig,
}

impl NotificationEngine {
    /// 使用模拟传输装配引擎，延迟与失败率取自配置
    pub fn simulated(config: NotificationConfig) -> Self {
        Self {
            chat: Arc::new(SimulatedTransport::new(Channel::Chat, config.chat.profile)),
            email: Arc::new(SimulatedTransport::new(Channel::Email, config.email.profile)),
            phone_call: Arc::new(SimulatedTransport::new(
                Channel::PhoneCall,
                config.phone_call.profile,
            )),
            config,
        }
    }

    /// 启动引擎；需在 tokio 运行时内调用
    pub fn start(self) -> NotifyResult<NotificationSystem> {
        self.config.validate()?;
        for (slot, transport) in [
            (Channel::Chat, &self.chat),
            (Channel::Email, &self.email),
            (Channel::PhoneCall, &self.phone_call),
        ] {
            if transport.channel() != slot {
                return Err(NotifyError::invalid_config(format!(
                    "transport for {} is bound to {}",
                    slot,
                    transport.channel()
                )));
            }
        }

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let cache = Arc::new(StatusCache::new());
        let history = Arc::new(HistoryBuffer::new(self.config.history_capacity));
        let pool = Arc::new(Semaphore::new(self.config.worker_pool_size));
        let sink = DeliverySink {
            cache: cache.clone(),
            history: history.clone(),
        };
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(6);

        let mut spawn_dispatcher = |transport: Arc<dyn ChannelTransport>| {
            let retry = self.config.channel(transport.channel()).retry;
            let (dispatcher, task) = ChannelDispatcher::spawn(
                transport,
                retry,
                sink.clone(),
                pool.clone(),
                tracker.clone(),
                token.clone(),
            );
            tasks.push(task);
            dispatcher
        };
        let chat = spawn_dispatcher(self.chat.clone());
        let email = spawn_dispatcher(self.email.clone());
        let phone_call = spawn_dispatcher(self.phone_call.clone());
        let router = PriorityRouter::new(chat, email, phone_call);

        let (pipeline, lane) =
            EventIngestionPipeline::spawn(cache.clone(), history.clone(), router, token.clone());
        tasks.push(lane);

        let scanner = RetryScanner::new(cache.clone(), history.clone(), pipeline.clone());

        // evict worker（周期任务）
        if let Some(ttl) = self.config.cache_ttl {
            let cache = cache.clone();
            tasks.push(spawn_periodic(
                token.clone(),
                self.config.eviction_interval,
                move || {
                    let cache = cache.clone();
                    async move {
                        let evicted = cache.evict_settled(ttl);
                        if evicted > 0 {
                            debug!(evicted, remaining = cache.len(), "evicted settled entries");
                        }
                    }
                },
            ));
        }

        // retry worker（周期任务）
        if let Some(interval) = self.config.retry_interval {
            let scanner = scanner.clone();
            tasks.push(spawn_periodic(token.clone(), interval, move || {
                let scanner = scanner.clone();
                async move {
                    scanner.retry_failed();
                }
            }));
        }

        info!(
            worker_pool_size = self.config.worker_pool_size,
            history_capacity = self.config.history_capacity,
            "notification engine started"
        );

        Ok(NotificationSystem {
            cache,
            history,
            pipeline,
            scanner,
            token,
            tracker,
            tasks,
        })
    }
}

/// 首次触发延后一个周期，之后按固定间隔执行
fn spawn_periodic<F, Fut>(token: CancellationToken, interval: Duration, mut f: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
    })
}

/// 运行中的通知系统：对外 API 与生命周期句柄
///
/// 被丢弃时会取消全部后台任务。
pub struct NotificationSystem {
    cache: Arc<StatusCache>,
    history: Arc<HistoryBuffer>,
    pipeline: EventIngestionPipeline,
    scanner: RetryScanner,
    token: CancellationToken,
    tracker: TaskTracker,
    tasks: Vec<JoinHandle<()>>,
}

impl NotificationSystem {
    /// 发布事件（fire-and-forget）
    pub fn publish(&self, event: NotificationEvent) {
        self.pipeline.publish(event);
    }

    /// 最近的历史回放 + 实时更新
    pub fn subscribe_history(&self) -> BoxStream<'static, NotificationEvent> {
        self.history.subscribe()
    }

    pub fn history_snapshot(&self) -> Vec<NotificationEvent> {
        self.history.snapshot()
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<NotificationEvent> {
        self.cache.get(id)
    }

    pub fn channel_outcomes(&self, id: &str) -> Option<Vec<(Channel, ChannelOutcome)>> {
        self.cache.channel_outcomes(id)
    }

    /// 重投当前全部 FAILED 事件，返回被重投事件的快照
    pub fn retry_failed(&self) -> Vec<NotificationEvent> {
        self.scanner.retry_failed()
    }

    /// 可克隆的发布/重投句柄，便于在其它任务中使用
    pub fn pipeline(&self) -> EventIngestionPipeline {
        self.pipeline.clone()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
    }

    /// 等待后台任务与在途投递全部结束
    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for t in tasks {
            let _ = t.await;
        }
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Drop for NotificationSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

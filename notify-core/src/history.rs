//! 历史缓冲（HistoryBuffer）
//!
//! 有界、只追加、满则丢弃最旧的事件日志：
//! - `append`：写入并推送给所有订阅者；
//! - `subscribe`：先回放当前缓冲（按写入顺序），再接续实时追加；
//! - 回放与实时尾部在同一把锁下衔接，不会出现缺口或重复。
//!
//! 每个订阅者拥有独立的无界尾部，慢消费者不会丢事件，也不会拖慢写入方；
//! 订阅流被丢弃后，对应发送端在下一次追加时被清理。
//!
use crate::model::NotificationEvent;
use futures_core::stream::BoxStream;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug)]
struct HistoryState {
    entries: VecDeque<NotificationEvent>,
    subscribers: Vec<mpsc::UnboundedSender<NotificationEvent>>,
}

#[derive(Debug)]
pub struct HistoryBuffer {
    capacity: usize,
    state: Mutex<HistoryState>,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// 创建历史缓冲，`capacity` 至少为 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(HistoryState {
                entries: VecDeque::with_capacity(capacity),
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, event: NotificationEvent) {
        let mut state = self.lock();
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        state.entries.push_back(event);
        while state.entries.len() > self.capacity {
            state.entries.pop_front();
        }
    }

    /// 回放缓冲 + 实时尾部；返回 'static 流，便于在 tokio::spawn 中消费
    pub fn subscribe(&self) -> BoxStream<'static, NotificationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for event in &state.entries {
            // 接收端尚在本函数内，不会失败
            let _ = tx.send(event.clone());
        }
        state.subscribers.push(tx);
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// 当前缓冲内容（按写入顺序）
    pub fn snapshot(&self) -> Vec<NotificationEvent> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use futures_util::StreamExt;

    fn mk_event(id: usize) -> NotificationEvent {
        NotificationEvent::builder()
            .id(format!("e-{id}"))
            .source("TEST")
            .message("msg")
            .priority(Priority::Low)
            .build()
    }

    fn ids(events: &[NotificationEvent]) -> Vec<String> {
        events.iter().map(|e| e.id().to_string()).collect()
    }

    #[test]
    fn drops_oldest_beyond_capacity() {
        let history = HistoryBuffer::default();
        for i in 0..60 {
            history.append(mk_event(i));
        }
        assert_eq!(history.len(), 50);

        let snap = history.snapshot();
        assert_eq!(snap.first().unwrap().id(), "e-10");
        assert_eq!(snap.last().unwrap().id(), "e-59");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let history = HistoryBuffer::new(0);
        history.append(mk_event(1));
        history.append(mk_event(2));
        assert_eq!(history.capacity(), 1);
        assert_eq!(ids(&history.snapshot()), vec!["e-2"]);
    }

    #[tokio::test]
    async fn late_subscriber_gets_backlog_then_live_tail() {
        let history = HistoryBuffer::new(3);
        for i in 0..5 {
            history.append(mk_event(i));
        }

        let stream = history.subscribe();
        history.append(mk_event(5));
        history.append(mk_event(6));

        let got: Vec<NotificationEvent> = stream.take(5).collect().await;
        assert_eq!(ids(&got), vec!["e-2", "e-3", "e-4", "e-5", "e-6"]);
    }

    #[tokio::test]
    async fn subscribers_have_independent_tails() {
        let history = HistoryBuffer::new(10);
        history.append(mk_event(0));

        let first = history.subscribe();
        history.append(mk_event(1));
        let second = history.subscribe();
        history.append(mk_event(2));

        let a: Vec<NotificationEvent> = first.take(3).collect().await;
        let b: Vec<NotificationEvent> = second.take(3).collect().await;
        assert_eq!(ids(&a), vec!["e-0", "e-1", "e-2"]);
        assert_eq!(ids(&b), vec!["e-0", "e-1", "e-2"]);
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_append() {
        let history = HistoryBuffer::new(10);
        let stream = history.subscribe();
        assert_eq!(history.subscriber_count(), 1);

        drop(stream);
        history.append(mk_event(0));
        assert_eq!(history.subscriber_count(), 0);
    }
}

//! 单个会话的事件总线
//!
//! - publish 从不等待读者：有订阅者时逐个投递，无订阅者时缓存到 backlog
//! - 第一个订阅者先拿到 backlog，之后与其他订阅者按发布顺序收到新事件
//! - close 之后所有读者在读完已排队事件后结束，后续发布被丢弃

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use super::event::ProgressEvent;

#[derive(Default)]
struct BusState {
    /// 无人订阅期间缓存的事件
    backlog: VecDeque<ProgressEvent>,
    subscribers: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    closed: bool,
}

/// 会话级事件总线（多生产者、多订阅者）
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 发布事件，返回实际投递到的订阅者数量（0 表示已缓存或已关闭）
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let mut state = self.lock();
        if state.closed {
            tracing::debug!(kind = event.kind(), "Dropping event published to closed bus");
            return 0;
        }

        state.subscribers.retain(|tx| !tx.is_closed());
        if state.subscribers.is_empty() {
            state.backlog.push_back(event);
            return 0;
        }

        state
            .subscribers
            .iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// 订阅：返回的句柄按发布顺序产出事件，不回放已被消费的事件
    pub fn subscribe(&self) -> Subscription {
        let mut state = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        for event in state.backlog.drain(..) {
            let _ = tx.send(event);
        }
        if !state.closed {
            state.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// 结束所有读者并释放队列
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
        state.backlog.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// 当前仍连接的订阅者数量
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// 缓存中尚未被读取的事件数量
    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }
}

/// 一次带超时等待的读取结果
#[derive(Debug, PartialEq)]
pub enum Delivery {
    Event(ProgressEvent),
    /// 等待窗口内没有事件，流仍然有效
    Idle,
    /// 总线已关闭且事件已读完
    Closed,
}

/// 订阅句柄；drop 即退订
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    /// 等待下一个事件；总线关闭后返回 None
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// 最多等待 idle，供调用方实现保活
    pub async fn recv_timeout(&mut self, idle: Duration) -> Delivery {
        match tokio::time::timeout(idle, self.rx.recv()).await {
            Ok(Some(event)) => Delivery::Event(event),
            Ok(None) => Delivery::Closed,
            Err(_) => Delivery::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> ProgressEvent {
        ProgressEvent::InterviewProgress {
            message: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_buffers_until_first_subscriber() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(msg("a")), 0);
        assert_eq!(bus.publish(msg("b")), 0);
        assert_eq!(bus.backlog_len(), 2);

        let mut sub = bus.subscribe();
        assert_eq!(bus.backlog_len(), 0);
        assert_eq!(sub.recv().await, Some(msg("a")));
        assert_eq!(sub.recv().await, Some(msg("b")));
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        for i in 0..5 {
            assert_eq!(bus.publish(msg(&i.to_string())), 2);
        }
        bus.close();

        let mut got_first = Vec::new();
        while let Some(ev) = first.recv().await {
            got_first.push(ev);
        }
        let mut got_second = Vec::new();
        while let Some(ev) = second.recv().await {
            got_second.push(ev);
        }
        assert_eq!(got_first.len(), 5);
        assert_eq!(got_first, got_second);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(msg("last"));
        bus.close();
        assert_eq!(bus.publish(msg("after")), 0);
        assert_eq!(sub.recv().await, Some(msg("last")));
        assert_eq!(sub.recv().await, None);

        let mut late = bus.subscribe();
        assert_eq!(late.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(sub);
        assert_eq!(bus.publish(msg("x")), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.recv().await, Some(msg("x")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout_reports_idle() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        assert_eq!(sub.recv_timeout(Duration::from_secs(30)).await, Delivery::Idle);
        bus.publish(msg("y"));
        assert_eq!(
            sub.recv_timeout(Duration::from_secs(30)).await,
            Delivery::Event(msg("y"))
        );
        bus.close();
        assert_eq!(sub.recv_timeout(Duration::from_secs(30)).await, Delivery::Closed);
    }
}

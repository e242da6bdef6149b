//! 通知中心
//!
//! 单个广播通道，把编排、入库等事件推送给所有 SSE 订阅者

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::Event;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 事件中心
pub struct EventHub {
    sender: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// 发布事件；没有订阅者时事件被丢弃
    pub fn publish(&self, event: Event) {
        if event.is_error() {
            warn!(value = %event.value, identifier = %event.context.identifier, "Error event");
        }
        if self.sender.send(event).is_err() {
            debug!("No event subscribers, event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

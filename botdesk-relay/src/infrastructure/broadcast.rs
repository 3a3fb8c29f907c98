//! 看板推送通道
//!
//! 基于 `tokio::sync::broadcast` 的扇出：每个看板连接持有一个订阅者，
//! 处理过慢的订阅者会丢失最旧的事件。

use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::model::NewMessageEvent;
use crate::domain::repository::DashboardNotifier;

pub struct BroadcastHub {
    sender: broadcast::Sender<NewMessageEvent>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 新建一个订阅者（看板连接建立时调用）
    pub fn subscribe(&self) -> broadcast::Receiver<NewMessageEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl DashboardNotifier for BroadcastHub {
    fn publish(&self, event: NewMessageEvent) -> usize {
        // 没有订阅者时 send 返回错误，这里视为 0 个接收方
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No dashboard subscribers, event dropped");
                0
            }
        }
    }
}

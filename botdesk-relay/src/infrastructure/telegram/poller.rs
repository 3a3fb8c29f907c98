//! 长轮询拉取 Bot 更新

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::bot_api::TelegramBotApi;
use super::updates::{RawUpdate, parse_update};
use crate::application::handlers::InboundUpdateHandler;

/// 更新来源
#[async_trait]
pub trait UpdateFeed: Send + Sync {
    async fn fetch(&self, offset: Option<i64>) -> Result<Vec<RawUpdate>>;
}

#[async_trait]
impl UpdateFeed for TelegramBotApi {
    async fn fetch(&self, offset: Option<i64>) -> Result<Vec<RawUpdate>> {
        self.get_updates(offset).await
    }
}

pub struct UpdatePoller {
    feed: Arc<dyn UpdateFeed>,
    handler: Arc<InboundUpdateHandler>,
    backoff: Duration,
}

impl UpdatePoller {
    pub fn new(feed: Arc<dyn UpdateFeed>, handler: Arc<InboundUpdateHandler>, backoff: Duration) -> Self {
        Self {
            feed,
            handler,
            backoff,
        }
    }

    /// 轮询循环，出错后退避重试，不会主动退出
    pub async fn run(self) {
        info!("Starting bot update poller");
        let mut offset: Option<i64> = None;

        loop {
            let updates = match self.feed.fetch(offset).await {
                Ok(updates) => updates,
                Err(err) => {
                    warn!(
                        error = %err,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Failed to fetch bot updates"
                    );
                    tokio::time::sleep(self.backoff).await;
                    continue;
                }
            };

            for raw in updates {
                // 先推进 offset，单条更新处理失败不会被重复投递
                offset = Some(raw.update_id + 1);
                let update_id = raw.update_id;

                match parse_update(raw) {
                    Some(update) => {
                        if let Err(err) = self.handler.on_update(update).await {
                            warn!(update_id, error = %format!("{err:#}"), "Failed to handle bot update");
                        }
                    }
                    None => debug!(update_id, "Skipping update without a user message"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use botdesk_core::metrics::{MediaGroupMetrics, RelayMetrics};
    use prometheus::Registry;
    use serde_json::json;

    use super::*;
    use crate::application::MessageRelayService;
    use crate::domain::aggregator::{AggregatorSettings, MediaGroupAggregator};
    use crate::domain::model::{MediaKind, OutgoingMessage};
    use crate::domain::repository::{BotFileApi, BotMessenger};
    use crate::infrastructure::broadcast::BroadcastHub;
    use crate::infrastructure::persistence::InMemoryChatStore;

    struct ScriptedFeed {
        script: Mutex<VecDeque<Result<Vec<RawUpdate>>>>,
        offsets: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl UpdateFeed for ScriptedFeed {
        async fn fetch(&self, offset: Option<i64>) -> Result<Vec<RawUpdate>> {
            self.offsets.lock().unwrap().push(offset);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    /// 离线 Bot：文件与发送接口全部失败
    struct OfflineBot;

    #[async_trait]
    impl BotFileApi for OfflineBot {
        async fn resolve_file_url(&self, _: &str) -> Result<String> {
            Err(anyhow!("bot api is offline"))
        }

        async fn profile_photo_handle(&self, _: i64) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl BotMessenger for OfflineBot {
        async fn send_message(&self, _: &OutgoingMessage) -> Result<()> {
            Err(anyhow!("bot api is offline"))
        }

        async fn send_media(&self, _: i64, _: MediaKind, _: &[String]) -> Result<()> {
            Err(anyhow!("bot api is offline"))
        }

        async fn create_invite_link(&self, _: &str) -> Result<String> {
            Err(anyhow!("bot api is offline"))
        }

        async fn approve_join_request(&self, _: i64, _: i64) -> Result<()> {
            Err(anyhow!("bot api is offline"))
        }

        async fn answer_callback(&self, _: &str) -> Result<()> {
            Err(anyhow!("bot api is offline"))
        }
    }

    fn text_update(update_id: i64, text: &str) -> RawUpdate {
        serde_json::from_value(json!({
            "update_id": update_id,
            "message": {"from": {"id": 5, "first_name": "Bo"}, "text": text}
        }))
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_backs_off_and_advances_offset() {
        let store = Arc::new(InMemoryChatStore::new());
        let registry = Registry::new();
        let relay = Arc::new(MessageRelayService::new(
            store.clone(),
            store.clone(),
            Arc::new(BroadcastHub::new(4)),
            RelayMetrics::new(&registry).unwrap(),
        ));
        let aggregator = Arc::new(MediaGroupAggregator::new(
            AggregatorSettings::default(),
            relay.clone(),
            MediaGroupMetrics::new(&registry).unwrap(),
        ));
        let bot = Arc::new(OfflineBot);
        let handler = Arc::new(InboundUpdateHandler::new(
            store.clone(),
            bot.clone(),
            bot,
            relay,
            aggregator,
            RelayMetrics::new(&Registry::new()).unwrap(),
            None,
        ));

        let feed = Arc::new(ScriptedFeed {
            script: Mutex::new(VecDeque::from([
                Err(anyhow!("connection reset")),
                Ok(vec![
                    text_update(100, "first"),
                    text_update(101, "/start"),
                    text_update(102, "second"),
                ]),
            ])),
            offsets: Mutex::new(Vec::new()),
        });

        let poller = UpdatePoller::new(feed.clone(), handler, Duration::from_secs(5));
        let task = tokio::spawn(poller.run());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.message_count().await, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let texts: Vec<String> = store
            .messages_for(5)
            .await
            .into_iter()
            .map(|message| message.message)
            .collect();
        assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(*feed.offsets.lock().unwrap(), vec![None, None, Some(103)]);

        task.abort();
    }
}

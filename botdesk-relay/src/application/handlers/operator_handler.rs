//! 操作员指令处理器 - 看板向用户发消息、群发与用户标签
//!
//! 消息先经 Bot 发出，发送成功后以 `admin` 身份写入消息日志并推送看板。

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use botdesk_core::metrics::RelayMetrics;
use tracing::{info, instrument, warn};

use crate::application::service::MessageRelayService;
use crate::domain::model::{MediaKind, OutgoingMessage, SenderRole};
use crate::domain::repository::{BotMessengerRef, UserDirectoryRef};

/// 群发结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct OperatorCommandHandler {
    users: UserDirectoryRef,
    messenger: BotMessengerRef,
    relay: Arc<MessageRelayService>,
    metrics: RelayMetrics,
}

impl OperatorCommandHandler {
    pub fn new(
        users: UserDirectoryRef,
        messenger: BotMessengerRef,
        relay: Arc<MessageRelayService>,
        metrics: RelayMetrics,
    ) -> Self {
        Self {
            users,
            messenger,
            relay,
            metrics,
        }
    }

    /// 向单个用户发送文本
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn send_text(&self, user_id: i64, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            bail!("message text is empty");
        }

        let delivered = self
            .messenger
            .send_message(&OutgoingMessage::text(user_id, text))
            .await;
        self.count_outbound(delivered.is_ok());
        delivered.with_context(|| format!("failed to send message to user {user_id}"))?;

        self.relay.relay(user_id, SenderRole::Admin, text).await
    }

    /// 向单个用户发送媒体（按地址），每个地址单独记录一条消息
    #[instrument(skip(self, kind, urls), fields(kind = %kind, items = urls.len()))]
    pub async fn send_media(&self, user_id: i64, kind: MediaKind, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            bail!("no media to send");
        }

        let delivered = self.messenger.send_media(user_id, kind, urls).await;
        self.count_outbound(delivered.is_ok());
        delivered.with_context(|| format!("failed to send {kind} to user {user_id}"))?;

        for url in urls {
            self.relay
                .relay(user_id, SenderRole::Admin, &kind.single_text(url))
                .await?;
        }
        Ok(())
    }

    /// 向所有已登记用户群发文本；单个用户失败不会中断群发
    pub async fn broadcast_text(&self, text: &str) -> Result<BroadcastReport> {
        if text.trim().is_empty() {
            bail!("message text is empty");
        }

        let user_ids = self.users.all_user_ids().await?;
        let mut report = BroadcastReport::default();

        for user_id in user_ids {
            match self.send_text(user_id, text).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(user_id, error = %format!("{err:#}"), "Broadcast delivery failed");
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast finished"
        );
        Ok(report)
    }

    /// 设置用户标签；空白标签视为清除。用户不存在时返回 false
    pub async fn set_label(&self, user_id: i64, label: Option<&str>) -> Result<bool> {
        let label = label.map(str::trim).filter(|label| !label.is_empty());
        self.users.set_label(user_id, label).await
    }

    fn count_outbound(&self, delivered: bool) {
        let outcome = if delivered { "ok" } else { "error" };
        self.metrics
            .outbound_messages_total
            .with_label_values(&[outcome])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use prometheus::Registry;

    use super::*;
    use crate::domain::model::UserProfile;
    use crate::domain::repository::{BotMessenger, UserDirectory};
    use crate::infrastructure::broadcast::BroadcastHub;
    use crate::infrastructure::persistence::InMemoryChatStore;

    /// 向 `unreachable` 中的用户发送会失败
    #[derive(Default)]
    struct FakeMessenger {
        unreachable: HashSet<i64>,
        texts: Mutex<Vec<(i64, String)>>,
        media: Mutex<Vec<(i64, MediaKind, Vec<String>)>>,
    }

    #[async_trait]
    impl BotMessenger for FakeMessenger {
        async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
            if self.unreachable.contains(&message.chat_id) {
                return Err(anyhow!("Forbidden: bot was blocked by the user"));
            }
            self.texts
                .lock()
                .unwrap()
                .push((message.chat_id, message.text.clone()));
            Ok(())
        }

        async fn send_media(&self, chat_id: i64, kind: MediaKind, urls: &[String]) -> Result<()> {
            if self.unreachable.contains(&chat_id) {
                return Err(anyhow!("Forbidden: bot was blocked by the user"));
            }
            self.media.lock().unwrap().push((chat_id, kind, urls.to_vec()));
            Ok(())
        }

        async fn create_invite_link(&self, _: &str) -> Result<String> {
            Err(anyhow!("not used"))
        }

        async fn approve_join_request(&self, _: i64, _: i64) -> Result<()> {
            Err(anyhow!("not used"))
        }

        async fn answer_callback(&self, _: &str) -> Result<()> {
            Err(anyhow!("not used"))
        }
    }

    struct Fixture {
        store: Arc<InMemoryChatStore>,
        hub: Arc<BroadcastHub>,
        messenger: Arc<FakeMessenger>,
        handler: OperatorCommandHandler,
    }

    fn fixture(unreachable: &[i64]) -> Fixture {
        let store = Arc::new(InMemoryChatStore::new());
        let hub = Arc::new(BroadcastHub::new(16));
        let metrics = RelayMetrics::new(&Registry::new()).unwrap();
        let relay = Arc::new(MessageRelayService::new(
            store.clone(),
            store.clone(),
            hub.clone(),
            metrics.clone(),
        ));
        let messenger = Arc::new(FakeMessenger {
            unreachable: unreachable.iter().copied().collect(),
            ..FakeMessenger::default()
        });
        let handler = OperatorCommandHandler::new(store.clone(), messenger.clone(), relay, metrics);

        Fixture {
            store,
            hub,
            messenger,
            handler,
        }
    }

    async fn register(store: &InMemoryChatStore, user_id: i64) {
        store
            .upsert_user(&UserProfile {
                user_id,
                full_name: format!("User {user_id}"),
                ..UserProfile::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_text_is_logged_as_admin_and_broadcast() {
        let Fixture {
            store,
            hub,
            messenger,
            handler,
        } = fixture(&[]);
        register(&store, 1).await;
        let mut dashboard = hub.subscribe();

        handler.send_text(1, "Your order has shipped").await.unwrap();

        assert_eq!(
            *messenger.texts.lock().unwrap(),
            vec![(1, "Your order has shipped".to_string())]
        );
        let messages = store.messages_for(1).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, SenderRole::Admin);

        let event = dashboard.recv().await.unwrap();
        assert_eq!(event.sender, SenderRole::Admin);
        assert_eq!(event.full_name.as_deref(), Some("User 1"));
    }

    #[tokio::test]
    async fn test_undelivered_text_is_not_logged() {
        let Fixture { store, handler, .. } = fixture(&[2]);

        let err = handler.send_text(2, "hello").await.unwrap_err();
        assert!(format!("{err:#}").contains("blocked by the user"));
        assert_eq!(store.message_count().await, 0);
        assert_eq!(
            handler
                .metrics
                .outbound_messages_total
                .with_label_values(&["error"])
                .get(),
            1
        );

        assert!(handler.send_text(2, "   ").await.is_err());
    }

    #[tokio::test]
    async fn test_send_media_logs_one_record_per_item() {
        let Fixture {
            store,
            messenger,
            handler,
            ..
        } = fixture(&[]);
        let urls = vec!["https://cdn/a.jpg".to_string(), "https://cdn/b.jpg".to_string()];

        handler.send_media(3, MediaKind::Image, &urls).await.unwrap();

        assert_eq!(
            *messenger.media.lock().unwrap(),
            vec![(3, MediaKind::Image, urls)]
        );
        let texts: Vec<String> = store
            .messages_for(3)
            .await
            .into_iter()
            .map(|message| message.message)
            .collect();
        assert_eq!(
            texts,
            vec![
                "[image]https://cdn/a.jpg".to_string(),
                "[image]https://cdn/b.jpg".to_string(),
            ]
        );
        assert!(handler.send_media(3, MediaKind::Image, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_continues_past_failures() {
        let Fixture { store, handler, .. } = fixture(&[2]);
        for user_id in [1, 2, 3] {
            register(&store, user_id).await;
        }

        let report = handler.broadcast_text("Maintenance tonight").await.unwrap();

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1 });
        assert_eq!(store.messages_for(1).await.len(), 1);
        assert!(store.messages_for(2).await.is_empty());
        assert_eq!(store.messages_for(3).await.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_label_clears() {
        let Fixture { store, handler, .. } = fixture(&[]);
        register(&store, 1).await;

        assert!(handler.set_label(1, Some(" vip ")).await.unwrap());
        assert_eq!(
            store.find_user(1).await.unwrap().unwrap().label.as_deref(),
            Some("vip")
        );

        assert!(handler.set_label(1, Some("  ")).await.unwrap());
        assert!(store.find_user(1).await.unwrap().unwrap().label.is_none());
        assert!(!handler.set_label(42, Some("vip")).await.unwrap());
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use botdesk_core::metrics::RelayMetrics;
use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::model::{ChatMessage, NewMessageEvent, SenderRole};
use crate::domain::repository::{
    DashboardNotifierRef, MessageLogRef, MessageSink, UserDirectoryRef,
};

/// 事件预览的最大字符数
const PREVIEW_MAX_CHARS: usize = 120;

/// 消息中继服务：写入消息日志并通知看板
pub struct MessageRelayService {
    message_log: MessageLogRef,
    users: UserDirectoryRef,
    notifier: DashboardNotifierRef,
    metrics: RelayMetrics,
}

impl MessageRelayService {
    pub fn new(
        message_log: MessageLogRef,
        users: UserDirectoryRef,
        notifier: DashboardNotifierRef,
        metrics: RelayMetrics,
    ) -> Self {
        Self {
            message_log,
            users,
            notifier,
            metrics,
        }
    }

    pub async fn relay(&self, user_id: i64, sender: SenderRole, text: &str) -> Result<()> {
        let message = ChatMessage {
            user_id,
            sender,
            message: text.to_string(),
            timestamp: Utc::now(),
        };
        self.message_log
            .append_message(&message)
            .await
            .with_context(|| format!("failed to persist message for user {user_id}"))?;
        self.metrics
            .messages_persisted_total
            .with_label_values(&[sender.as_str()])
            .inc();

        // 资料查询失败时仍然推送，只是缺少显示名称
        let profile = match self.users.find_user(user_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(user_id, error = %err, "Failed to load user profile for dashboard event");
                None
            }
        };

        let event = NewMessageEvent {
            user_id,
            sender,
            full_name: profile.as_ref().map(|p| p.full_name.clone()),
            username: profile.map(|p| p.username),
            preview: preview_of(text),
        };
        let receivers = self.notifier.publish(event);
        self.metrics.events_broadcast_total.inc();

        debug!(user_id, sender = sender.as_str(), receivers, "Message relayed");
        Ok(())
    }
}

#[async_trait]
impl MessageSink for MessageRelayService {
    async fn persist_and_broadcast(&self, owner_id: i64, sender: SenderRole, text: &str) -> Result<()> {
        self.relay(owner_id, sender, text).await
    }
}

fn preview_of(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_MAX_CHARS) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use prometheus::Registry;

    use super::*;
    use crate::domain::model::UserProfile;
    use crate::domain::repository::{MessageLog, UserDirectory};
    use crate::infrastructure::broadcast::BroadcastHub;
    use crate::infrastructure::persistence::InMemoryChatStore;

    fn service(store: Arc<InMemoryChatStore>, hub: Arc<BroadcastHub>) -> MessageRelayService {
        let metrics = RelayMetrics::new(&Registry::new()).unwrap();
        MessageRelayService::new(store.clone(), store, hub, metrics)
    }

    #[tokio::test]
    async fn test_relay_persists_and_publishes_with_profile() {
        let store = Arc::new(InMemoryChatStore::new());
        let hub = Arc::new(BroadcastHub::new(8));
        let mut events = hub.subscribe();
        store
            .upsert_user(&UserProfile {
                user_id: 7,
                full_name: "Ada Lovelace".into(),
                username: "ada".into(),
                ..UserProfile::default()
            })
            .await
            .unwrap();

        let service = service(store.clone(), hub);
        service
            .persist_and_broadcast(7, SenderRole::User, "[images]\nA\nB")
            .await
            .unwrap();

        let messages = store.messages_for(7).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "[images]\nA\nB");
        assert_eq!(messages[0].sender, SenderRole::User);

        let event = events.recv().await.unwrap();
        assert_eq!(event.user_id, 7);
        assert_eq!(event.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(event.username.as_deref(), Some("ada"));
        assert_eq!(event.preview, "[images]\nA\nB");
    }

    #[tokio::test]
    async fn test_relay_without_subscribers_or_profile_succeeds() {
        let store = Arc::new(InMemoryChatStore::new());
        let service = service(store.clone(), Arc::new(BroadcastHub::new(8)));

        service.relay(1, SenderRole::User, "hello").await.unwrap();

        assert_eq!(store.messages_for(1).await.len(), 1);
        assert_eq!(service.metrics.events_broadcast_total.get(), 1);
    }

    #[tokio::test]
    async fn test_relay_propagates_log_failure() {
        struct BrokenLog;

        #[async_trait]
        impl MessageLog for BrokenLog {
            async fn append_message(&self, _: &ChatMessage) -> Result<()> {
                Err(anyhow::anyhow!("disk full"))
            }
        }

        let store = Arc::new(InMemoryChatStore::new());
        let metrics = RelayMetrics::new(&Registry::new()).unwrap();
        let service = MessageRelayService::new(
            Arc::new(BrokenLog),
            store,
            Arc::new(BroadcastHub::new(8)),
            metrics,
        );

        let err = service.relay(1, SenderRole::User, "hello").await.unwrap_err();
        assert!(format!("{err:#}").contains("disk full"));
        assert_eq!(service.metrics.events_broadcast_total.get(), 0);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview_of("short"), "short");

        let long = "界".repeat(PREVIEW_MAX_CHARS + 5);
        let preview = preview_of(&long);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS + 1);
        assert!(preview.ends_with('…'));
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use botdesk_core::metrics::{MediaGroupMetrics, RelayMetrics};
use botdesk_relay::application::{InboundUpdateHandler, MessageRelayService, OperatorCommandHandler};
use botdesk_relay::domain::aggregator::{AggregatorSettings, MediaGroupAggregator};
use botdesk_relay::domain::model::{InlineButton, MediaKind, OutgoingMessage, SenderRole};
use botdesk_relay::domain::repository::{BotFileApi, BotMessenger, UserDirectory};
use botdesk_relay::infrastructure::broadcast::BroadcastHub;
use botdesk_relay::infrastructure::persistence::InMemoryChatStore;
use botdesk_relay::infrastructure::telegram::parse_update;
use prometheus::Registry;
use serde_json::json;
use tokio::time::sleep;

#[derive(Default)]
struct StaticBot {
    sent: Mutex<Vec<OutgoingMessage>>,
}

#[async_trait]
impl BotFileApi for StaticBot {
    async fn resolve_file_url(&self, file_handle: &str) -> Result<String> {
        Ok(format!("https://files.example/{file_handle}.bin"))
    }

    async fn profile_photo_handle(&self, _user_id: i64) -> Result<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
impl BotMessenger for StaticBot {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn send_media(&self, _chat_id: i64, _kind: MediaKind, _urls: &[String]) -> Result<()> {
        Ok(())
    }

    async fn create_invite_link(&self, name: &str) -> Result<String> {
        Ok(format!("https://t.me/+invite-{}", name.len()))
    }

    async fn approve_join_request(&self, _chat_id: i64, _user_id: i64) -> Result<()> {
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str) -> Result<()> {
        Ok(())
    }
}

struct Relay {
    store: Arc<InMemoryChatStore>,
    hub: Arc<BroadcastHub>,
    bot: Arc<StaticBot>,
    aggregator: Arc<MediaGroupAggregator>,
    handler: InboundUpdateHandler,
    operator: OperatorCommandHandler,
}

fn relay() -> Relay {
    let registry = Registry::new();
    let store = Arc::new(InMemoryChatStore::new());
    let hub = Arc::new(BroadcastHub::new(32));
    let relay_metrics = RelayMetrics::new(&registry).unwrap();
    let bot = Arc::new(StaticBot::default());

    let service = Arc::new(MessageRelayService::new(
        store.clone(),
        store.clone(),
        hub.clone(),
        relay_metrics.clone(),
    ));
    let aggregator = Arc::new(MediaGroupAggregator::new(
        AggregatorSettings::default(),
        service.clone(),
        MediaGroupMetrics::new(&registry).unwrap(),
    ));
    let handler = InboundUpdateHandler::new(
        store.clone(),
        bot.clone(),
        bot.clone(),
        service.clone(),
        aggregator.clone(),
        relay_metrics.clone(),
        None,
    );
    let operator = OperatorCommandHandler::new(store.clone(), bot.clone(), service, relay_metrics);

    Relay {
        store,
        hub,
        bot,
        aggregator,
        handler,
        operator,
    }
}

async fn deliver(relay: &Relay, update: serde_json::Value) {
    let update = parse_update(serde_json::from_value(update).unwrap()).unwrap();
    relay.handler.on_update(update).await.unwrap();
}

fn photo(update_id: i64, user_id: i64, group_id: &str, file_id: &str) -> serde_json::Value {
    json!({
        "update_id": update_id,
        "message": {
            "from": {"id": user_id, "first_name": "Grace", "last_name": "Hopper", "username": "grace"},
            "media_group_id": group_id,
            "photo": [{"file_id": format!("{file_id}-thumb")}, {"file_id": file_id}]
        }
    })
}

#[tokio::test(start_paused = true)]
async fn album_is_stored_as_one_message_and_broadcast_once() {
    let relay = relay();
    let mut dashboard = relay.hub.subscribe();

    deliver(&relay, photo(1, 42, "album-1", "A")).await;
    sleep(Duration::from_millis(300)).await;
    deliver(&relay, photo(2, 42, "album-1", "B")).await;
    deliver(
        &relay,
        json!({
            "update_id": 3,
            "message": {"from": {"id": 7, "first_name": "Alan"}, "text": "ping"}
        }),
    )
    .await;
    sleep(Duration::from_millis(300)).await;
    deliver(&relay, photo(4, 42, "album-1", "C")).await;

    let ping = dashboard.recv().await.unwrap();
    assert_eq!(ping.user_id, 7);
    assert_eq!(ping.preview, "ping");
    assert!(relay.store.messages_for(42).await.is_empty());

    sleep(Duration::from_secs(2)).await;

    let messages = relay.store.messages_for(42).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, SenderRole::User);
    assert_eq!(
        messages[0].message,
        "[images]\nhttps://files.example/A.bin\nhttps://files.example/B.bin\nhttps://files.example/C.bin"
    );

    let album = dashboard.recv().await.unwrap();
    assert_eq!(album.user_id, 42);
    assert_eq!(album.full_name.as_deref(), Some("Grace Hopper"));
    assert_eq!(album.username.as_deref(), Some("grace"));
    assert!(dashboard.try_recv().is_err());

    let profile = relay.store.find_user(42).await.unwrap().unwrap();
    assert_eq!(profile.full_name, "Grace Hopper");
    assert_eq!(relay.aggregator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn mismatched_fragment_does_not_change_album() {
    let relay = relay();

    deliver(&relay, photo(1, 9, "g3", "A")).await;
    deliver(
        &relay,
        json!({
            "update_id": 2,
            "message": {
                "from": {"id": 9, "first_name": "Grace"},
                "media_group_id": "g3",
                "video": {"file_id": "B"}
            }
        }),
    )
    .await;

    sleep(Duration::from_secs(2)).await;

    let texts: Vec<String> = relay
        .store
        .messages_for(9)
        .await
        .into_iter()
        .map(|message| message.message)
        .collect();
    assert_eq!(texts, vec!["[images]\nhttps://files.example/A.bin".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn background_sweep_leaves_settled_albums_to_completion() {
    let relay = relay();
    let reaper = relay.aggregator.clone().start_reaper();

    deliver(&relay, photo(1, 5, "slow", "A")).await;
    assert_eq!(relay.aggregator.in_flight(), 1);

    // 静默间隔远小于回收上限，媒体组在首次回收扫描之前已合并
    sleep(Duration::from_secs(31)).await;
    assert_eq!(relay.aggregator.in_flight(), 0);
    assert_eq!(relay.store.messages_for(5).await.len(), 1);

    reaper.abort();
}

#[tokio::test]
async fn start_join_and_operator_reply() {
    let relay = relay();
    let mut dashboard = relay.hub.subscribe();

    deliver(
        &relay,
        json!({
            "update_id": 1,
            "message": {"from": {"id": 11, "first_name": "Ken"}, "text": "/start"}
        }),
    )
    .await;
    deliver(
        &relay,
        json!({
            "update_id": 2,
            "chat_join_request": {
                "chat": {"id": -100500, "type": "channel"},
                "from": {"id": 11, "first_name": "Ken"},
                "date": 1700000000
            }
        }),
    )
    .await;

    let profile = relay.store.find_user(11).await.unwrap().unwrap();
    let link = profile.invite_link.unwrap();
    let sent = relay.bot.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].text.contains(&link));
    assert!(matches!(&sent[0].buttons[0], InlineButton::Link { url, .. } if *url == link));
    assert_eq!(sent[1].chat_id, 11);
    assert!(relay.store.messages_for(11).await.is_empty());

    relay.operator.send_text(11, "Welcome aboard").await.unwrap();

    let messages = relay.store.messages_for(11).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, SenderRole::Admin);
    let event = dashboard.recv().await.unwrap();
    assert_eq!(event.sender, SenderRole::Admin);
    assert_eq!(event.full_name.as_deref(), Some("Ken"));
}

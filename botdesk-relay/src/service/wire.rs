//! Wire 风格的依赖注入模块
//!
//! 按依赖顺序构建存储、推送通道、聚合器、处理器与轮询器

use std::sync::Arc;

use anyhow::{Context, Result};
use botdesk_core::BotdeskError;
use botdesk_core::config::BotdeskAppConfig;
use botdesk_core::metrics::{MediaGroupMetrics, REGISTRY, RelayMetrics};
use tracing::{info, warn};

use crate::application::{InboundUpdateHandler, MessageRelayService, OperatorCommandHandler};
use crate::config::RelayConfig;
use crate::domain::aggregator::MediaGroupAggregator;
use crate::domain::repository::{BotMessengerRef, MessageLogRef, UserDirectoryRef};
use crate::infrastructure::broadcast::BroadcastHub;
use crate::infrastructure::persistence::{InMemoryChatStore, PostgresChatStore};
use crate::infrastructure::telegram::{TelegramBotApi, UpdatePoller};

/// 应用上下文 - 包含所有已初始化的组件
pub struct ApplicationContext {
    pub config: RelayConfig,
    pub hub: Arc<BroadcastHub>,
    pub aggregator: Arc<MediaGroupAggregator>,
    /// 看板侧发消息、群发与标签操作的入口
    pub operator: Arc<OperatorCommandHandler>,
    pub poller: UpdatePoller,
}

/// 构建应用上下文
pub async fn initialize(app_config: &BotdeskAppConfig) -> Result<ApplicationContext> {
    // 1. 加载并校验服务配置
    let config = RelayConfig::from_app_config(app_config);
    let settings = config.validate()?;

    // 2. 构建消息存储
    let (message_log, users) = build_chat_store(&config).await?;

    // 3. 看板推送通道
    let hub = Arc::new(BroadcastHub::new(config.broadcast_capacity));

    // 4. 指标
    let relay_metrics = RelayMetrics::new(&REGISTRY).context("failed to register relay metrics")?;
    let group_metrics =
        MediaGroupMetrics::new(&REGISTRY).context("failed to register media group metrics")?;

    // 5. 中继服务与媒体组聚合器
    let relay = Arc::new(MessageRelayService::new(
        message_log,
        users.clone(),
        hub.clone(),
        relay_metrics.clone(),
    ));
    let aggregator = Arc::new(MediaGroupAggregator::new(settings, relay.clone(), group_metrics));

    // 6. Bot API、入站处理器与操作员处理器
    let bot_api = Arc::new(TelegramBotApi::new(&config)?);
    let messenger: BotMessengerRef = bot_api.clone();
    let handler = Arc::new(InboundUpdateHandler::new(
        users.clone(),
        bot_api.clone(),
        messenger.clone(),
        relay.clone(),
        aggregator.clone(),
        relay_metrics.clone(),
        config.channel_url.clone(),
    ));
    let operator = Arc::new(OperatorCommandHandler::new(users, messenger, relay, relay_metrics));
    let poller = UpdatePoller::new(bot_api, handler, config.poll_backoff);

    if config.channel_id.is_none() {
        warn!("bot.channel_id is not set, /start falls back to the public channel link");
    }

    info!(
        service = %config.service_name,
        quiet_interval_ms = aggregator.settings().quiet_interval.as_millis() as u64,
        reap_ceiling_ms = aggregator.settings().reap_ceiling.as_millis() as u64,
        "Relay context initialized"
    );

    Ok(ApplicationContext {
        config,
        hub,
        aggregator,
        operator,
        poller,
    })
}

async fn build_chat_store(config: &RelayConfig) -> Result<(MessageLogRef, UserDirectoryRef)> {
    match config.postgres.as_ref() {
        Some(postgres) => {
            let store = PostgresChatStore::connect(postgres)
                .await
                .map_err(|err| BotdeskError::storage("chat store unavailable", format!("{err:#}")))?;
            let store = Arc::new(store);
            let message_log: MessageLogRef = store.clone();
            let users: UserDirectoryRef = store;
            Ok((message_log, users))
        }
        None => {
            warn!("No PostgreSQL profile configured, messages are kept in memory only");
            let store = Arc::new(InMemoryChatStore::new());
            let message_log: MessageLogRef = store.clone();
            let users: UserDirectoryRef = store;
            Ok((message_log, users))
        }
    }
}

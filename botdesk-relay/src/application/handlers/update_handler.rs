//! 入站更新处理器（编排层）- 登记用户、解析文件地址并按内容路由

use std::sync::Arc;

use anyhow::{Context, Result};
use botdesk_core::metrics::RelayMetrics;
use botdesk_core::{join_full_name, local_display_time};
use tracing::{debug, info, instrument, warn};

use crate::application::service::MessageRelayService;
use crate::domain::aggregator::MediaGroupAggregator;
use crate::domain::model::{
    InboundContent, InboundSender, InboundUpdate, InlineButton, MediaKind, OutgoingMessage,
    SenderRole, UserProfile,
};
use crate::domain::repository::{BotFileApiRef, BotMessengerRef, UserDirectoryRef};

/// “我已加入”按钮的回调数据
pub const JOINED_CHANNEL_CALLBACK: &str = "joined_channel";

const JOIN_APPROVED_TEXT: &str = "🎉 Welcome! You are now a member. Feel free to chat with me.";
const CHANNEL_JOINED_TEXT: &str =
    "🎉 Thank you for joining our channel!\n\nYou are now a full member. You can chat with me here anytime.";

pub struct InboundUpdateHandler {
    users: UserDirectoryRef,
    files: BotFileApiRef,
    messenger: BotMessengerRef,
    relay: Arc<MessageRelayService>,
    aggregator: Arc<MediaGroupAggregator>,
    metrics: RelayMetrics,
    /// 无法创建专属邀请链接时使用的公开频道地址
    channel_url: Option<String>,
}

impl InboundUpdateHandler {
    pub fn new(
        users: UserDirectoryRef,
        files: BotFileApiRef,
        messenger: BotMessengerRef,
        relay: Arc<MessageRelayService>,
        aggregator: Arc<MediaGroupAggregator>,
        metrics: RelayMetrics,
        channel_url: Option<String>,
    ) -> Self {
        Self {
            users,
            files,
            messenger,
            relay,
            aggregator,
            metrics,
            channel_url,
        }
    }

    /// 处理一条入站更新
    ///
    /// 只有文本或单条媒体写入失败、入群审批失败时返回错误；媒体组分片的失败在内部记录。
    #[instrument(skip(self, update), fields(update_id = update.update_id, user_id = update.sender.user_id))]
    pub async fn on_update(&self, update: InboundUpdate) -> Result<()> {
        self.metrics
            .updates_received_total
            .with_label_values(&[update.content.metric_label()])
            .inc();

        let sender = update.sender;
        let user_id = sender.user_id;

        match update.content {
            InboundContent::Command(command) if command == "start" => self.on_start(&sender).await,
            InboundContent::Command(command) => {
                debug!(command = %command, "Ignoring unknown command");
                Ok(())
            }
            InboundContent::JoinRequest {
                chat_id,
                invite_link,
            } => self.on_join_request(&sender, chat_id, invite_link).await,
            InboundContent::Callback { callback_id, data } => {
                self.on_callback(user_id, &callback_id, data.as_deref()).await
            }
            InboundContent::Text(text) => {
                self.register_user(&sender, None).await;
                self.relay.relay(user_id, SenderRole::User, &text).await
            }
            InboundContent::Media {
                kind,
                file_handle,
                group_id: Some(group_id),
            } if kind.is_groupable() => {
                self.register_user(&sender, None).await;
                self.on_fragment_arrived(&group_id, user_id, kind, &file_handle)
                    .await;
                Ok(())
            }
            InboundContent::Media {
                kind, file_handle, ..
            } => {
                self.register_user(&sender, None).await;
                self.on_single_media(user_id, kind, &file_handle).await
            }
            InboundContent::Unsupported => {
                self.register_user(&sender, None).await;
                debug!("Ignoring unsupported message content");
                Ok(())
            }
        }
    }

    /// `/start`：生成专属邀请链接、登记用户并回复加入频道的引导
    async fn on_start(&self, sender: &InboundSender) -> Result<()> {
        let full_name = join_full_name(sender.first_name.as_deref(), sender.last_name.as_deref());
        let invite_link = self.invite_link_for(sender.user_id, &full_name).await;

        self.register_user(sender, invite_link.clone()).await;

        let reply = start_reply(sender.user_id, invite_link.as_deref());
        self.send(&reply)
            .await
            .with_context(|| format!("failed to reply to /start from user {}", sender.user_id))
    }

    async fn invite_link_for(&self, user_id: i64, full_name: &str) -> Option<String> {
        let name = format!("{full_name} ({user_id})");
        match self.messenger.create_invite_link(&name).await {
            Ok(link) => Some(link),
            Err(err) => {
                warn!(
                    user_id,
                    error = %format!("{err:#}"),
                    fallback = self.channel_url.is_some(),
                    "Failed to create invite link, using the public channel link"
                );
                self.channel_url.clone()
            }
        }
    }

    /// 入群申请：批准、登记用户并私信欢迎语（私信失败只记录日志）
    async fn on_join_request(
        &self,
        sender: &InboundSender,
        chat_id: i64,
        invite_link: Option<String>,
    ) -> Result<()> {
        self.messenger
            .approve_join_request(chat_id, sender.user_id)
            .await
            .with_context(|| format!("failed to approve join request of user {}", sender.user_id))?;
        info!(user_id = sender.user_id, chat_id, "Channel join request approved");

        self.register_user(sender, invite_link).await;

        if let Err(err) = self
            .send(&OutgoingMessage::text(sender.user_id, JOIN_APPROVED_TEXT))
            .await
        {
            warn!(user_id = sender.user_id, error = %format!("{err:#}"), "Failed to send welcome message");
        }
        Ok(())
    }

    async fn on_callback(&self, user_id: i64, callback_id: &str, data: Option<&str>) -> Result<()> {
        if data != Some(JOINED_CHANNEL_CALLBACK) {
            debug!(data = ?data, "Ignoring unknown callback");
            return Ok(());
        }

        if let Err(err) = self.messenger.answer_callback(callback_id).await {
            warn!(user_id, error = %format!("{err:#}"), "Failed to answer callback query");
        }
        self.send(&OutgoingMessage::text(user_id, CHANNEL_JOINED_TEXT))
            .await
            .with_context(|| format!("failed to thank user {user_id} for joining"))
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let result = self.messenger.send_message(message).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.metrics
            .outbound_messages_total
            .with_label_values(&[outcome])
            .inc();
        result
    }

    /// 媒体组分片到达：先解析地址，再交给聚合器
    ///
    /// 返回追加后的分片数；解析失败或被拒绝时返回 None，分片被丢弃。
    pub async fn on_fragment_arrived(
        &self,
        group_id: &str,
        owner_id: i64,
        kind: MediaKind,
        raw_handle: &str,
    ) -> Option<usize> {
        let url = self.resolve(raw_handle, owner_id).await?;
        // 拒绝原因已由聚合器记录
        self.aggregator.append(group_id, owner_id, kind, url).ok()
    }

    async fn on_single_media(&self, user_id: i64, kind: MediaKind, raw_handle: &str) -> Result<()> {
        match self.resolve(raw_handle, user_id).await {
            Some(url) => {
                self.relay
                    .relay(user_id, SenderRole::User, &kind.single_text(&url))
                    .await
            }
            None => Ok(()),
        }
    }

    async fn resolve(&self, raw_handle: &str, user_id: i64) -> Option<String> {
        match self.files.resolve_file_url(raw_handle).await {
            Ok(url) => Some(url),
            Err(err) => {
                self.metrics.file_resolution_failures_total.inc();
                warn!(
                    user_id,
                    file_handle = %raw_handle,
                    error = %format!("{err:#}"),
                    "Failed to resolve file reference, dropping media"
                );
                None
            }
        }
    }

    /// 首次出现的用户写入用户目录；失败只记录日志
    async fn register_user(&self, sender: &InboundSender, invite_link: Option<String>) {
        match self.users.find_user(sender.user_id).await {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => {
                warn!(user_id = sender.user_id, error = %err, "Failed to look up user");
            }
        }

        let profile = UserProfile {
            user_id: sender.user_id,
            full_name: join_full_name(sender.first_name.as_deref(), sender.last_name.as_deref()),
            username: sender.username.clone().unwrap_or_default(),
            join_date: local_display_time(),
            invite_link,
            photo_url: self.profile_photo_url(sender.user_id).await,
            label: None,
        };

        if let Err(err) = self.users.upsert_user(&profile).await {
            warn!(user_id = sender.user_id, error = %err, "Failed to register user");
        }
    }

    async fn profile_photo_url(&self, user_id: i64) -> Option<String> {
        let handle = match self.files.profile_photo_handle(user_id).await {
            Ok(handle) => handle?,
            Err(err) => {
                debug!(user_id, error = %err, "Profile photo lookup failed");
                return None;
            }
        };

        match self.files.resolve_file_url(&handle).await {
            Ok(url) => Some(url),
            Err(err) => {
                debug!(user_id, error = %err, "Profile photo resolution failed");
                None
            }
        }
    }
}

/// `/start` 的回复：附带邀请链接按钮与“我已加入”按钮
fn start_reply(user_id: i64, invite_link: Option<&str>) -> OutgoingMessage {
    let mut text = String::from("👋 Welcome!\n\nTo access all features, please join our channel first.\n");
    if let Some(link) = invite_link {
        text.push_str(link);
        text.push('\n');
    }
    text.push_str("\nAfter joining, click the button below.");

    let mut reply = OutgoingMessage::text(user_id, text);
    if let Some(link) = invite_link {
        reply = reply.with_button(InlineButton::Link {
            text: "Join Channel".to_string(),
            url: link.to_string(),
        });
    }
    reply.with_button(InlineButton::Callback {
        text: "I have joined".to_string(),
        data: JOINED_CHANNEL_CALLBACK.to_string(),
    })
}

//! Telegram Bot API 客户端

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::updates::{ApiResponse, RawFileInfo, RawInviteLink, RawProfilePhotos, RawUpdate};
use crate::config::RelayConfig;
use crate::domain::model::{InlineButton, MediaKind, OutgoingMessage};
use crate::domain::repository::{BotFileApi, BotMessenger};

/// 普通请求超时
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// 长轮询请求在服务端超时之外额外等待的时间
const POLL_GRACE: Duration = Duration::from_secs(10);
/// 上传类请求由平台拉取远端文件，超时更长
const MEDIA_TIMEOUT: Duration = Duration::from_secs(60);
/// 一个相册最多包含的条目数
const ALBUM_LIMIT: usize = 10;
/// 邀请链接名称的最大字符数
const INVITE_NAME_MAX_CHARS: usize = 32;
/// 轮询时订阅的更新类型
const ALLOWED_UPDATES: [&str; 3] = ["message", "callback_query", "chat_join_request"];

/// 单条媒体的发送方法与参数名
fn single_media_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Image => ("sendPhoto", "photo"),
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Voice => ("sendVoice", "voice"),
        MediaKind::Audio => ("sendAudio", "audio"),
        MediaKind::Gif => ("sendAnimation", "animation"),
    }
}

/// 相册条目类型；语音和动图不能放进相册
fn album_item_type(kind: MediaKind) -> Option<&'static str> {
    match kind {
        MediaKind::Image => Some("photo"),
        MediaKind::Video => Some("video"),
        MediaKind::Audio => Some("audio"),
        MediaKind::Voice | MediaKind::Gif => None,
    }
}

fn reply_markup(buttons: &[InlineButton]) -> Value {
    let rows: Vec<Value> = buttons
        .iter()
        .map(|button| match button {
            InlineButton::Link { text, url } => json!([{ "text": text, "url": url }]),
            InlineButton::Callback { text, data } => json!([{ "text": text, "callback_data": data }]),
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn invite_link_name(name: &str) -> String {
    name.chars().take(INVITE_NAME_MAX_CHARS).collect()
}

/// 文件下载地址；`file_path` 已是完整地址时原样返回
pub fn build_file_url(file_base: &str, token: &str, file_path: &str) -> String {
    if file_path.starts_with("http") {
        return file_path.to_string();
    }
    format!(
        "{}/bot{}/{}",
        file_base.trim_end_matches('/'),
        token,
        file_path.trim_start_matches('/')
    )
}

pub struct TelegramBotApi {
    client: reqwest::Client,
    api_base: String,
    file_base: String,
    token: String,
    poll_timeout_seconds: u64,
    channel_id: Option<String>,
}

impl TelegramBotApi {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            file_base: config.file_base.clone(),
            token: config.bot_token.clone(),
            poll_timeout_seconds: config.poll_timeout_seconds,
            channel_id: config.channel_id.clone(),
        })
    }

    /// 拉取 `offset` 之后的消息更新（长轮询）
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<RawUpdate>> {
        let mut params = json!({
            "timeout": self.poll_timeout_seconds,
            "allowed_updates": ALLOWED_UPDATES,
        });
        if let Some(offset) = offset {
            params["offset"] = json!(offset);
        }

        let timeout = Duration::from_secs(self.poll_timeout_seconds) + POLL_GRACE;
        self.call("getUpdates", &params, timeout).await
    }

    async fn send_single_media(&self, chat_id: i64, kind: MediaKind, url: &str) -> Result<()> {
        let (method, field) = single_media_method(kind);
        let mut params = json!({ "chat_id": chat_id });
        params[field] = json!(url);

        let _: Value = self.call(method, &params, MEDIA_TIMEOUT).await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &Value, timeout: Duration) -> Result<T> {
        // URL 中包含 Token，错误信息里去掉 URL
        let url = format!("{}/bot{}/{}", self.api_base, self.token, method);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .map_err(|err| anyhow!("{method} request failed: {}", err.without_url()))?;

        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|err| anyhow!("{method} returned an unreadable body ({status}): {}", err.without_url()))?;

        if !body.ok {
            return Err(anyhow!(
                "{method} rejected ({status}): {}",
                body.description.unwrap_or_else(|| "no description".to_string())
            ));
        }

        body.result
            .ok_or_else(|| anyhow!("{method} returned ok without a result"))
    }
}

#[async_trait]
impl BotFileApi for TelegramBotApi {
    async fn resolve_file_url(&self, file_handle: &str) -> Result<String> {
        let info: RawFileInfo = self
            .call("getFile", &json!({ "file_id": file_handle }), REQUEST_TIMEOUT)
            .await?;
        let file_path = info
            .file_path
            .ok_or_else(|| anyhow!("getFile returned no file_path for {file_handle}"))?;

        debug!(file_handle = %file_handle, "File reference resolved");
        Ok(build_file_url(&self.file_base, &self.token, &file_path))
    }

    async fn profile_photo_handle(&self, user_id: i64) -> Result<Option<String>> {
        let photos: RawProfilePhotos = self
            .call(
                "getUserProfilePhotos",
                &json!({ "user_id": user_id, "limit": 1 }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(photos.first_handle())
    }
}

#[async_trait]
impl BotMessenger for TelegramBotApi {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        let mut params = json!({ "chat_id": message.chat_id, "text": message.text });
        if !message.buttons.is_empty() {
            params["reply_markup"] = reply_markup(&message.buttons);
        }

        let _: Value = self.call("sendMessage", &params, REQUEST_TIMEOUT).await?;
        debug!(chat_id = message.chat_id, "Message sent");
        Ok(())
    }

    async fn send_media(&self, chat_id: i64, kind: MediaKind, urls: &[String]) -> Result<()> {
        let album_type = album_item_type(kind).filter(|_| urls.len() > 1);

        let Some(item_type) = album_type else {
            for url in urls {
                self.send_single_media(chat_id, kind, url).await?;
            }
            return Ok(());
        };

        for chunk in urls.chunks(ALBUM_LIMIT) {
            if let [url] = chunk {
                self.send_single_media(chat_id, kind, url).await?;
                continue;
            }
            let media: Vec<Value> = chunk
                .iter()
                .map(|url| json!({ "type": item_type, "media": url }))
                .collect();
            let _: Value = self
                .call(
                    "sendMediaGroup",
                    &json!({ "chat_id": chat_id, "media": media }),
                    MEDIA_TIMEOUT,
                )
                .await?;
        }

        debug!(chat_id, kind = %kind, items = urls.len(), "Media sent");
        Ok(())
    }

    async fn create_invite_link(&self, name: &str) -> Result<String> {
        let channel_id = self
            .channel_id
            .as_deref()
            .ok_or_else(|| anyhow!("bot.channel_id is not configured"))?;

        let link: RawInviteLink = self
            .call(
                "createChatInviteLink",
                &json!({
                    "chat_id": channel_id,
                    "member_limit": 1,
                    "name": invite_link_name(name),
                }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(link.invite_link)
    }

    async fn approve_join_request(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "approveChatJoinRequest",
                &json!({ "chat_id": chat_id, "user_id": user_id }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_id }),
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }
}

//! Bot API 更新报文解析

use serde::Deserialize;

use crate::domain::model::{InboundContent, InboundSender, InboundUpdate, MediaKind};

/// Bot API 统一响应包装
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub callback_query: Option<RawCallbackQuery>,
    #[serde(default)]
    pub chat_join_request: Option<RawJoinRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub from: Option<RawUser>,
    #[serde(default)]
    pub media_group_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// 同一张图片的多个尺寸，最后一个最大
    #[serde(default)]
    pub photo: Option<Vec<RawFile>>,
    #[serde(default)]
    pub video: Option<RawFile>,
    #[serde(default)]
    pub voice: Option<RawFile>,
    #[serde(default)]
    pub audio: Option<RawFile>,
    #[serde(default)]
    pub animation: Option<RawFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFile {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCallbackQuery {
    pub id: String,
    pub from: RawUser,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJoinRequest {
    pub chat: RawChat,
    pub from: RawUser,
    #[serde(default)]
    pub invite_link: Option<RawInviteLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChat {
    pub id: i64,
}

/// 邀请链接（createChatInviteLink 的返回值，也出现在入群申请中）
#[derive(Debug, Clone, Deserialize)]
pub struct RawInviteLink {
    pub invite_link: String,
}

/// getFile 返回的文件信息
#[derive(Debug, Clone, Deserialize)]
pub struct RawFileInfo {
    #[serde(default)]
    pub file_path: Option<String>,
}

/// getUserProfilePhotos 返回的头像列表
#[derive(Debug, Clone, Deserialize)]
pub struct RawProfilePhotos {
    #[serde(default)]
    pub photos: Vec<Vec<RawFile>>,
}

impl RawProfilePhotos {
    /// 第一张头像的第一个尺寸
    pub fn first_handle(&self) -> Option<String> {
        self.photos
            .first()
            .and_then(|sizes| sizes.first())
            .map(|file| file.file_id.clone())
    }
}

/// 转换为入站更新；无法识别的更新或没有发送者的消息返回 None
pub fn parse_update(raw: RawUpdate) -> Option<InboundUpdate> {
    let update_id = raw.update_id;

    if let Some(request) = raw.chat_join_request {
        return Some(InboundUpdate {
            update_id,
            sender: sender_of(&request.from),
            content: InboundContent::JoinRequest {
                chat_id: request.chat.id,
                invite_link: request.invite_link.map(|link| link.invite_link),
            },
        });
    }

    if let Some(query) = raw.callback_query {
        return Some(InboundUpdate {
            update_id,
            sender: sender_of(&query.from),
            content: InboundContent::Callback {
                callback_id: query.id,
                data: query.data,
            },
        });
    }

    let message = raw.message?;
    let sender = sender_of(message.from.as_ref()?);

    Some(InboundUpdate {
        update_id,
        sender,
        content: classify(message),
    })
}

fn sender_of(user: &RawUser) -> InboundSender {
    InboundSender {
        user_id: user.id,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    }
}

/// `/start@my_bot payload` 中的命令名
fn command_name(text: &str) -> Option<String> {
    let head = text.strip_prefix('/')?.split(char::is_whitespace).next()?;
    let name = head.split('@').next().unwrap_or(head);
    (!name.is_empty()).then(|| name.to_ascii_lowercase())
}

/// 按 图片 -> 视频 -> 语音 -> 音频 -> 动图 -> 文本 的顺序识别内容
fn classify(message: RawMessage) -> InboundContent {
    let group_id = message.media_group_id;

    let media = message
        .photo
        .and_then(|sizes| sizes.into_iter().last())
        .map(|file| (MediaKind::Image, file))
        .or_else(|| message.video.map(|file| (MediaKind::Video, file)))
        .or_else(|| message.voice.map(|file| (MediaKind::Voice, file)))
        .or_else(|| message.audio.map(|file| (MediaKind::Audio, file)))
        .or_else(|| message.animation.map(|file| (MediaKind::Gif, file)));

    match (media, message.text) {
        (Some((kind, file)), _) => InboundContent::Media {
            kind,
            file_handle: file.file_id,
            group_id,
        },
        (None, Some(text)) => match command_name(&text) {
            Some(name) => InboundContent::Command(name),
            None => InboundContent::Text(text),
        },
        (None, None) => InboundContent::Unsupported,
    }
}

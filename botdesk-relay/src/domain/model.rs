use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Voice,
    Audio,
    Gif,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Voice => "voice",
            MediaKind::Audio => "audio",
            MediaKind::Gif => "gif",
        }
    }

    /// 是否可以参与媒体组聚合（音频始终按单条消息处理）
    pub fn is_groupable(&self) -> bool {
        !matches!(self, MediaKind::Audio)
    }

    /// 单条媒体消息的前缀标签
    pub fn single_label(&self) -> &'static str {
        match self {
            MediaKind::Image => "[image]",
            MediaKind::Video => "[video]",
            MediaKind::Voice => "[voice]",
            MediaKind::Audio => "[audio]",
            MediaKind::Gif => "[gif]",
        }
    }

    /// 合并后媒体组消息的标签
    pub fn group_label(&self) -> &'static str {
        match self {
            MediaKind::Image => "[images]",
            MediaKind::Video => "[videos]",
            MediaKind::Voice => "[voices]",
            MediaKind::Audio => "[audios]",
            MediaKind::Gif => "[gifs]",
        }
    }

    /// 单条媒体消息正文：标签后直接拼接地址
    pub fn single_text(&self, url: &str) -> String {
        format!("{}{}", self.single_label(), url)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息发送方角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// 终端用户
    User,
    /// 看板操作员
    Admin,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::User => "user",
            SenderRole::Admin => "admin",
        }
    }
}

/// 在途媒体组
///
/// 从第一个分片到达开始存在，直到被合并落库或被回收。
/// `owner_id` 与 `kind` 由第一个分片决定，之后不可变。
#[derive(Debug, Clone)]
pub struct MediaGroup {
    pub group_id: String,
    pub owner_id: i64,
    pub kind: MediaKind,
    pub items: Vec<String>,
    pub created_at: Instant,
    pub last_update: Instant,
}

impl MediaGroup {
    pub fn open(group_id: String, owner_id: i64, kind: MediaKind, item: String, now: Instant) -> Self {
        Self {
            group_id,
            owner_id,
            kind,
            items: vec![item],
            created_at: now,
            last_update: now,
        }
    }

    /// 追加分片并刷新更新时间，返回追加后的分片数
    pub fn push(&mut self, item: String, now: Instant) -> usize {
        self.items.push(item);
        self.last_update = self.last_update.max(now);
        self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 距离最后一次追加的时长
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_update)
    }

    /// 媒体组存活时长
    pub fn lifetime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// 合并后的媒体组记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedRecord {
    pub owner_id: i64,
    pub sender: SenderRole,
    pub text: String,
}

impl ConsolidatedRecord {
    /// 标签与所有地址以换行拼接
    pub fn from_group(group: &MediaGroup) -> Self {
        let mut text = String::from(group.kind.group_label());
        for item in &group.items {
            text.push('\n');
            text.push_str(item);
        }

        Self {
            owner_id: group.owner_id,
            sender: SenderRole::User,
            text,
        }
    }
}

/// 用户资料（用户目录中的一行）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub user_id: i64,
    pub full_name: String,
    pub username: String,
    pub join_date: String,
    pub invite_link: Option<String>,
    pub photo_url: Option<String>,
    pub label: Option<String>,
}

/// 消息日志记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub user_id: i64,
    pub sender: SenderRole,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// 推送给看板客户端的新消息事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessageEvent {
    pub user_id: i64,
    pub sender: SenderRole,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub preview: String,
}

/// 入站消息发送者
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundSender {
    pub user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// 入站消息内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    Media {
        kind: MediaKind,
        file_handle: String,
        group_id: Option<String>,
    },
    /// 以 `/` 开头的命令，只保留小写命令名
    Command(String),
    /// 申请加入频道
    JoinRequest {
        chat_id: i64,
        invite_link: Option<String>,
    },
    /// 内联按钮回调
    Callback {
        callback_id: String,
        data: Option<String>,
    },
    /// 贴纸、位置等看板不展示的内容
    Unsupported,
}

impl InboundContent {
    /// 指标标签
    pub fn metric_label(&self) -> &'static str {
        match self {
            InboundContent::Text(_) => "text",
            InboundContent::Media { kind, .. } => kind.as_str(),
            InboundContent::Command(_) => "command",
            InboundContent::JoinRequest { .. } => "join_request",
            InboundContent::Callback { .. } => "callback",
            InboundContent::Unsupported => "unsupported",
        }
    }
}

/// 内联按钮，每个按钮单独一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineButton {
    Link { text: String, url: String },
    Callback { text: String, data: String },
}

/// Bot 发给用户的文本消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub buttons: Vec<InlineButton>,
}

impl OutgoingMessage {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_button(mut self, button: InlineButton) -> Self {
        self.buttons.push(button);
        self
    }
}

/// 入站 Bot 更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUpdate {
    pub update_id: i64,
    pub sender: InboundSender,
    pub content: InboundContent,
}

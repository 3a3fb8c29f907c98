use std::sync::Arc;

use anyhow::Result;

use crate::domain::model::{
    ChatMessage, MediaKind, NewMessageEvent, OutgoingMessage, SenderRole, UserProfile,
};

/// 媒体组合并结果的出口：持久化并推送给看板
///
/// 会在后台定时任务中被调用，实现必须可跨任务共享。
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    async fn persist_and_broadcast(&self, owner_id: i64, sender: SenderRole, text: &str) -> Result<()>;
}

/// 追加写入的消息日志
#[async_trait::async_trait]
pub trait MessageLog: Send + Sync {
    async fn append_message(&self, message: &ChatMessage) -> Result<()>;
}

/// 用户目录
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    /// 插入用户；已存在时保持原记录不变
    async fn upsert_user(&self, profile: &UserProfile) -> Result<()>;
    async fn find_user(&self, user_id: i64) -> Result<Option<UserProfile>>;
    /// 所有已登记用户的 ID（升序）
    async fn all_user_ids(&self) -> Result<Vec<i64>>;
    /// 设置或清除用户标签，用户不存在时返回 false
    async fn set_label(&self, user_id: i64, label: Option<&str>) -> Result<bool>;
}

/// 看板实时推送通道
pub trait DashboardNotifier: Send + Sync {
    /// 返回收到事件的客户端数量
    fn publish(&self, event: NewMessageEvent) -> usize;
}

/// Bot 文件接口：把原始文件句柄解析为可访问的地址
#[async_trait::async_trait]
pub trait BotFileApi: Send + Sync {
    async fn resolve_file_url(&self, file_handle: &str) -> Result<String>;
    /// 用户头像的文件句柄（没有头像时返回 None）
    async fn profile_photo_handle(&self, user_id: i64) -> Result<Option<String>>;
}

/// Bot 消息发送与频道管理接口
#[async_trait::async_trait]
pub trait BotMessenger: Send + Sync {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()>;
    /// 按地址发送媒体；多个地址在平台支持时以相册形式发出
    async fn send_media(&self, chat_id: i64, kind: MediaKind, urls: &[String]) -> Result<()>;
    /// 为频道创建仅限一人使用的邀请链接
    async fn create_invite_link(&self, name: &str) -> Result<String>;
    async fn approve_join_request(&self, chat_id: i64, user_id: i64) -> Result<()>;
    async fn answer_callback(&self, callback_id: &str) -> Result<()>;
}

pub type MessageSinkRef = Arc<dyn MessageSink>;
pub type MessageLogRef = Arc<dyn MessageLog>;
pub type UserDirectoryRef = Arc<dyn UserDirectory>;
pub type DashboardNotifierRef = Arc<dyn DashboardNotifier>;
pub type BotFileApiRef = Arc<dyn BotFileApi>;
pub type BotMessengerRef = Arc<dyn BotMessenger>;

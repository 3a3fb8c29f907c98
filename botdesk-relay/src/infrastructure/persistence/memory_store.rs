use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::model::{ChatMessage, UserProfile};
use crate::domain::repository::{MessageLog, UserDirectory};

/// 内存聊天存储（未配置 PostgreSQL 时使用，进程重启后数据丢失）
#[derive(Default)]
pub struct InMemoryChatStore {
    users: Arc<RwLock<HashMap<i64, UserProfile>>>,
    messages: Arc<RwLock<Vec<ChatMessage>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按写入顺序返回某个用户的消息
    pub async fn messages_for(&self, user_id: i64) -> Vec<ChatMessage> {
        let guard = self.messages.read().await;
        guard
            .iter()
            .filter(|message| message.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl MessageLog for InMemoryChatStore {
    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        let mut guard = self.messages.write().await;
        guard.push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryChatStore {
    async fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        let mut guard = self.users.write().await;
        guard
            .entry(profile.user_id)
            .or_insert_with(|| profile.clone());
        Ok(())
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let guard = self.users.read().await;
        Ok(guard.get(&user_id).cloned())
    }

    async fn all_user_ids(&self) -> Result<Vec<i64>> {
        let guard = self.users.read().await;
        let mut ids: Vec<i64> = guard.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn set_label(&self, user_id: i64, label: Option<&str>) -> Result<bool> {
        let mut guard = self.users.write().await;
        Ok(match guard.get_mut(&user_id) {
            Some(profile) => {
                profile.label = label.map(str::to_string);
                true
            }
            None => false,
        })
    }
}

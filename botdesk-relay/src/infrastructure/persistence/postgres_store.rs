use anyhow::{Context, Result};
use async_trait::async_trait;
use botdesk_core::config::PostgresInstanceConfig;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use tracing::info;

use crate::domain::model::{ChatMessage, UserProfile};
use crate::domain::repository::{MessageLog, UserDirectory};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

type UserRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// PostgreSQL 聊天存储：用户目录与消息日志
pub struct PostgresChatStore {
    pool: Pool<Postgres>,
}

impl PostgresChatStore {
    pub async fn connect(config: &PostgresInstanceConfig) -> Result<Self> {
        let mut options =
            PgPoolOptions::new().max_connections(config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS));
        if let Some(min) = config.min_connections {
            options = options.min_connections(min);
        }

        let pool = options
            .connect(&config.url)
            .await
            .context("failed to connect to PostgreSQL")?;

        let store = Self { pool };
        store
            .init_schema()
            .await
            .context("failed to initialize PostgreSQL schema")?;

        info!("PostgreSQL chat store ready");
        Ok(store)
    }

    /// 初始化表结构（已存在时不做修改）
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id BIGINT PRIMARY KEY,
                full_name TEXT NOT NULL DEFAULT '',
                username TEXT NOT NULL DEFAULT '',
                join_date TEXT NOT NULL,
                invite_link TEXT,
                photo_url TEXT,
                label TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                sender TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_user_timestamp
            ON messages(user_id, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MessageLog for PostgresChatStore {
    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (user_id, sender, message, timestamp)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(message.user_id)
        .bind(message.sender.as_str())
        .bind(&message.message)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await
        .context("failed to insert message")?;

        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PostgresChatStore {
    async fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, full_name, username, join_date, invite_link, photo_url, label)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.full_name)
        .bind(&profile.username)
        .bind(&profile.join_date)
        .bind(&profile.invite_link)
        .bind(&profile.photo_url)
        .bind(&profile.label)
        .execute(&self.pool)
        .await
        .context("failed to insert user")?;

        Ok(())
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT user_id, full_name, username, join_date, invite_link, photo_url, label
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query user")?;

        Ok(row.map(
            |(user_id, full_name, username, join_date, invite_link, photo_url, label)| UserProfile {
                user_id,
                full_name,
                username,
                join_date,
                invite_link,
                photo_url,
                label,
            },
        ))
    }

    async fn all_user_ids(&self) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT user_id FROM users ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list users")?;

        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }

    async fn set_label(&self, user_id: i64, label: Option<&str>) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET label = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(label)
            .execute(&self.pool)
            .await
            .context("failed to update user label")?;

        Ok(result.rows_affected() > 0)
    }
}

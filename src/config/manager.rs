//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 加载环境特定配置并合并到基础配置
//! - 使用环境变量覆盖敏感配置（Bot Token、数据库地址）

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

use super::{BotdeskAppConfig, PostgresInstanceConfig, merge_value};

/// 默认的 PostgreSQL 配置名称
pub const DEFAULT_POSTGRES_PROFILE: &str = "default";

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 BOTDESK_ENV 获取当前环境名称，
    /// 如果未设置则默认为 "development"
    pub fn get_environment() -> String {
        env::var("BOTDESK_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 {root}/environments/{environment}.toml 文件中的配置，
    /// 并将其合并到基础配置中；文件不存在时不做任何修改
    pub fn load_environment_config(base: &mut Value, root: &Path) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = root.join("environments").join(format!("{}.toml", env));

        if env_config_path.exists() {
            let content = fs::read_to_string(&env_config_path).with_context(|| {
                format!(
                    "unable to read environment config: {}",
                    env_config_path.display()
                )
            })?;
            let overlay: Value = toml::from_str(&content).with_context(|| {
                format!(
                    "invalid environment config format: {}",
                    env_config_path.display()
                )
            })?;

            merge_value(base, overlay);
        }

        Ok(())
    }

    /// 使用环境变量覆盖配置
    ///
    /// - BOTDESK_BOT_TOKEN: 覆盖 bot.token
    /// - BOTDESK_POSTGRES_URL: 覆盖（或创建）默认 PostgreSQL 配置的 url
    pub fn apply_env_overrides(config: &mut BotdeskAppConfig) {
        if let Some(token) = non_empty_var("BOTDESK_BOT_TOKEN") {
            config.bot.token = token;
        }

        if let Some(url) = non_empty_var("BOTDESK_POSTGRES_URL") {
            config
                .postgres
                .entry(DEFAULT_POSTGRES_PROFILE.to_string())
                .or_insert_with(PostgresInstanceConfig::default)
                .url = url;
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

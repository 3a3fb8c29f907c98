//! 中继服务配置模块

use std::time::Duration;

use botdesk_core::config::{BotdeskAppConfig, DEFAULT_POSTGRES_PROFILE, PostgresInstanceConfig};
use botdesk_core::{BotdeskError, Result};

use crate::domain::AggregatorSettings;

const DEFAULT_QUIET_INTERVAL_SECONDS: f64 = 1.5;
const DEFAULT_REAP_CEILING_SECONDS: f64 = 20.0;
const DEFAULT_SWEEP_PERIOD_SECONDS: f64 = 10.0;
const DEFAULT_BROADCAST_CAPACITY: usize = 256;
/// 轮询出错后的退避时间
const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(5);
/// 聚合器计时参数的上限
const MAX_TIMER: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub service_name: String,
    pub bot_token: String,
    pub api_base: String,
    pub file_base: String,
    pub poll_timeout_seconds: u64,
    pub poll_backoff: Duration,
    pub channel_id: Option<String>,
    pub channel_url: Option<String>,
    /// 未配置时使用内存存储
    pub postgres: Option<PostgresInstanceConfig>,
    pub broadcast_capacity: usize,
    pub quiet_interval_seconds: f64,
    pub reap_ceiling_seconds: f64,
    pub sweep_period_seconds: f64,
}

impl RelayConfig {
    pub fn from_app_config(app: &BotdeskAppConfig) -> Self {
        let service = app.relay_service();

        // 指定的配置不存在时回退到默认配置
        let postgres = service
            .message_store
            .as_deref()
            .and_then(|name| app.postgres_profile(name))
            .or_else(|| app.postgres_profile(DEFAULT_POSTGRES_PROFILE))
            .filter(|profile| !profile.url.trim().is_empty())
            .cloned();

        let media_group = &service.media_group;

        Self {
            service_name: service
                .service_name
                .clone()
                .unwrap_or_else(|| format!("{}-relay", app.service_name)),
            bot_token: app.bot.token.clone(),
            api_base: app.bot.api_base().trim_end_matches('/').to_string(),
            file_base: app.bot.file_base().trim_end_matches('/').to_string(),
            poll_timeout_seconds: app.bot.poll_timeout_seconds(),
            poll_backoff: DEFAULT_POLL_BACKOFF,
            channel_id: app.bot.channel_id().map(str::to_string),
            channel_url: app.bot.channel_url().map(str::to_string),
            postgres,
            broadcast_capacity: service
                .broadcast_capacity
                .unwrap_or(DEFAULT_BROADCAST_CAPACITY)
                .max(1),
            quiet_interval_seconds: media_group
                .quiet_interval_seconds
                .unwrap_or(DEFAULT_QUIET_INTERVAL_SECONDS),
            reap_ceiling_seconds: media_group
                .reap_ceiling_seconds
                .unwrap_or(DEFAULT_REAP_CEILING_SECONDS),
            sweep_period_seconds: media_group
                .sweep_period_seconds
                .unwrap_or(DEFAULT_SWEEP_PERIOD_SECONDS),
        }
    }

    /// 校验配置并返回聚合器时间参数
    ///
    /// 静默间隔必须小于回收上限，否则媒体组可能在合并前被回收
    pub fn validate(&self) -> Result<AggregatorSettings> {
        if self.bot_token.trim().is_empty() {
            return Err(BotdeskError::Config(
                "bot.token is required (or set BOTDESK_BOT_TOKEN)".to_string(),
            ));
        }

        let quiet_interval = timer("quiet_interval_seconds", self.quiet_interval_seconds)?;
        let reap_ceiling = timer("reap_ceiling_seconds", self.reap_ceiling_seconds)?;
        let sweep_period = timer("sweep_period_seconds", self.sweep_period_seconds)?;

        if reap_ceiling <= quiet_interval {
            return Err(BotdeskError::Config(format!(
                "media_group.reap_ceiling_seconds ({}) must exceed quiet_interval_seconds ({})",
                self.reap_ceiling_seconds, self.quiet_interval_seconds
            )));
        }

        Ok(AggregatorSettings {
            quiet_interval,
            reap_ceiling,
            sweep_period,
        })
    }

    pub fn postgres_url(&self) -> Option<&str> {
        self.postgres.as_ref().map(|cfg| cfg.url.as_str())
    }
}

/// 秒数转换为计时参数：必须为正且不超过一天
fn timer(field: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|duration| !duration.is_zero() && *duration <= MAX_TIMER)
        .ok_or_else(|| {
            BotdeskError::Config(format!(
                "media_group.{field} must be between 0 and {} seconds, got {seconds}",
                MAX_TIMER.as_secs()
            ))
        })
}

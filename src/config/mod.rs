//! BotDesk Core 配置模块
//!
//! 该模块提供了应用程序配置管理功能，包括：
//! - 配置文件（单文件或目录）加载和合并
//! - 环境特定配置覆盖与环境变量覆盖
//! - 日志、Bot、数据库以及各服务配置定义

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::{ConfigManager, DEFAULT_POSTGRES_PROFILE};

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<BotdeskAppConfig> = OnceLock::new();

const DEFAULT_SERVICE_NAME: &str = "botdesk";
const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_FILE_BASE: &str = "https://api.telegram.org/file";
const DEFAULT_POLL_TIMEOUT_SECONDS: u64 = 30;

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 未设置时生效）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 是否输出 target
    #[serde(default)]
    pub with_target: bool,
    /// 是否输出线程 ID
    #[serde(default)]
    pub with_thread_ids: bool,
    /// 是否输出文件名
    #[serde(default)]
    pub with_file: bool,
    /// 是否输出行号
    #[serde(default)]
    pub with_line_number: bool,
    /// 是否使用 JSON 格式输出
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
            with_thread_ids: true,
            with_file: true,
            with_line_number: true,
            json: false,
        }
    }
}

/// Bot 接入配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BotConfig {
    /// Bot Token
    #[serde(default)]
    pub token: String,
    /// Bot API 基础地址
    #[serde(default)]
    pub api_base: Option<String>,
    /// 文件下载基础地址
    #[serde(default)]
    pub file_base: Option<String>,
    /// 长轮询超时时间（秒）
    #[serde(default)]
    pub poll_timeout_seconds: Option<u64>,
    /// 频道 ID（`-100...` 或 `@name`），用于生成邀请链接
    #[serde(default)]
    pub channel_id: Option<String>,
    /// 无法生成专属邀请链接时发送的公开频道地址
    #[serde(default)]
    pub channel_url: Option<String>,
}

impl BotConfig {
    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .filter(|base| !base.is_empty())
            .unwrap_or(DEFAULT_API_BASE)
    }

    pub fn file_base(&self) -> &str {
        self.file_base
            .as_deref()
            .filter(|base| !base.is_empty())
            .unwrap_or(DEFAULT_FILE_BASE)
    }

    pub fn poll_timeout_seconds(&self) -> u64 {
        self.poll_timeout_seconds
            .unwrap_or(DEFAULT_POLL_TIMEOUT_SECONDS)
    }

    pub fn channel_id(&self) -> Option<&str> {
        non_blank(self.channel_id.as_deref())
    }

    pub fn channel_url(&self) -> Option<&str> {
        non_blank(self.channel_url.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// PostgreSQL 数据库实例配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PostgresInstanceConfig {
    /// 数据库连接 URL
    pub url: String,
    /// 最大连接数
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// 最小连接数
    #[serde(default)]
    pub min_connections: Option<u32>,
}

/// 媒体组聚合配置（单位：秒）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MediaGroupConfig {
    /// 静默间隔：最后一个分片之后多久认为媒体组已完整
    #[serde(default)]
    pub quiet_interval_seconds: Option<f64>,
    /// 回收上限：媒体组最后更新超过该时长即被丢弃
    #[serde(default)]
    pub reap_ceiling_seconds: Option<f64>,
    /// 回收扫描周期
    #[serde(default)]
    pub sweep_period_seconds: Option<f64>,
}

/// 中继服务配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RelayServiceConfig {
    /// 服务名称
    #[serde(default)]
    pub service_name: Option<String>,
    /// 消息存储使用的 PostgreSQL 配置名称
    #[serde(default)]
    pub message_store: Option<String>,
    /// 看板推送通道容量
    #[serde(default)]
    pub broadcast_capacity: Option<usize>,
    /// 媒体组聚合配置
    #[serde(default)]
    pub media_group: MediaGroupConfig,
}

/// 服务配置集合
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicesConfig {
    /// 中继服务配置
    #[serde(default)]
    pub relay: Option<RelayServiceConfig>,
}

/// BotDesk 应用配置主结构体
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BotdeskAppConfig {
    /// 应用名称
    #[serde(default)]
    pub service_name: String,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Bot 配置
    #[serde(default)]
    pub bot: BotConfig,
    /// PostgreSQL 配置映射
    #[serde(default)]
    pub postgres: HashMap<String, PostgresInstanceConfig>,
    /// 服务配置
    #[serde(default)]
    pub services: ServicesConfig,
}

impl BotdeskAppConfig {
    /// 获取 PostgreSQL 配置
    pub fn postgres_profile(&self, name: &str) -> Option<&PostgresInstanceConfig> {
        self.postgres.get(name)
    }

    /// 获取中继服务配置
    pub fn relay_service(&self) -> RelayServiceConfig {
        self.services.relay.clone().unwrap_or_default()
    }

    /// 确保配置有默认值
    fn ensure_defaults(&mut self) {
        if self.service_name.is_empty() {
            self.service_name = DEFAULT_SERVICE_NAME.to_string();
        }
    }
}

/// 加载配置（进程内只加载一次）
pub fn load_config(path: Option<&str>) -> &'static BotdeskAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| load_with_fallback(&candidates))
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> BotdeskAppConfig {
    for path in candidates {
        match load_config_from_path(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err:#}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    let mut cfg = BotdeskAppConfig::default();
    ConfigManager::apply_env_overrides(&mut cfg);
    cfg.ensure_defaults();
    cfg
}

/// 从指定路径加载配置（不写入全局实例）
///
/// 依次应用：基础配置 -> 环境配置覆盖 -> 环境变量覆盖
pub fn load_config_from_path(path: &Path) -> Result<BotdeskAppConfig> {
    let mut merged = load_config_value(path)?;

    ConfigManager::load_environment_config(&mut merged, &config_root(path))?;

    let mut cfg: BotdeskAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    ConfigManager::apply_env_overrides(&mut cfg);
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 配置根目录：目录本身或文件所在目录
fn config_root(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// 从源加载原始 TOML 值
fn load_config_value(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_toml_value(path)
    }
}

/// 从目录加载配置
fn load_config_from_directory(path: &Path) -> Result<Value> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    Ok(merged)
}

/// 合并目录中的配置片段（按文件名排序）
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 合并值：表递归合并，其余类型直接覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

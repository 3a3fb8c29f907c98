//! BotDesk Core 公共库
//!
//! 提供统一的配置加载、日志初始化、错误类型与指标收集功能

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing;
pub mod utils;

pub use config::{
    BotConfig, BotdeskAppConfig, ConfigManager, LoggingConfig, MediaGroupConfig,
    PostgresInstanceConfig, RelayServiceConfig, load_config, load_config_from_path,
};
pub use error::{BotdeskError, Result};
pub use utils::*;

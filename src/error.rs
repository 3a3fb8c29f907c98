//! BotDesk Core 错误模块
//!
//! - 统一对外暴露的错误类型 `BotdeskError`
//! - 为启动和配置校验提供 `Result` 别名

use thiserror::Error;

/// BotDesk 错误类型
#[derive(Debug, Error)]
pub enum BotdeskError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 存储错误
    #[error("Storage error: {0}")]
    Storage(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, BotdeskError>;

impl From<anyhow::Error> for BotdeskError {
    fn from(err: anyhow::Error) -> Self {
        BotdeskError::Internal(format!("{err:#}"))
    }
}

impl BotdeskError {
    /// 将基础设施错误映射为存储错误，并附带上下文信息
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        BotdeskError::Storage(format!("{context}: {err}"))
    }
}

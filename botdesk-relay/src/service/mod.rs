//! 服务模块 - 依赖组装与服务启动

pub mod bootstrap;
pub mod wire;

pub use bootstrap::ApplicationBootstrap;

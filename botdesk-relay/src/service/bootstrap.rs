//! 应用启动器 - 负责依赖注入和服务启动

use anyhow::Result;
use botdesk_core::config::BotdeskAppConfig;
use tracing::{error, info, warn};

use super::wire::{self, ApplicationContext};

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run(config: &'static BotdeskAppConfig) -> Result<()> {
        let context = wire::initialize(config).await?;
        Self::run_with_context(context).await
    }

    /// 启动回收任务与轮询任务，直到收到停止信号
    pub async fn run_with_context(context: ApplicationContext) -> Result<()> {
        let ApplicationContext {
            config,
            hub,
            aggregator,
            poller,
            ..
        } = context;

        info!(service = %config.service_name, "starting relay service");

        let reaper = aggregator.clone().start_reaper();
        let mut poller_task = tokio::spawn(poller.run());

        tokio::select! {
            res = &mut poller_task => {
                if let Err(err) = res {
                    error!(error = %err, "update poller stopped unexpectedly");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
        }

        for task in [reaper, poller_task] {
            task.abort();
        }

        // 在途媒体组不做持久化，停机即丢弃
        let in_flight = aggregator.in_flight();
        if in_flight > 0 {
            warn!(in_flight, "dropping in-flight media groups on shutdown");
        }

        info!(
            dashboard_subscribers = hub.subscriber_count(),
            "relay service stopped"
        );
        Ok(())
    }
}

use anyhow::Result;
use botdesk_core::load_config;
use botdesk_core::tracing::init_tracing_from_config;
use botdesk_relay::ApplicationBootstrap;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let app_config = load_config(Some("config"));

    init_tracing_from_config(Some(&app_config.logging));

    ApplicationBootstrap::run(app_config).await
}

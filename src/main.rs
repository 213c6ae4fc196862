use anyhow::Context;
use tracing::info;

use cronflow::{app::Application, config::AppConfig, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let config = AppConfig::load(config_path.as_deref()).context("加载配置失败")?;
    logging::init_logging(&config.log).context("初始化日志失败")?;

    info!("cronflow 启动");
    let handle = Application::start(config)
        .await
        .context("启动嵌入式应用失败")?;

    tokio::signal::ctrl_c().await.context("监听退出信号失败")?;
    info!("收到退出信号, 开始优雅关闭");
    handle.shutdown().await;
    Ok(())
}

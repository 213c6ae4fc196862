//! 日志初始化

use tracing_subscriber::EnvFilter;

use cronflow_errors::{SchedError, SchedResult};

use crate::config::LogConfig;

/// 按配置初始化全局tracing订阅者; 重复初始化返回错误
pub fn init_logging(config: &LogConfig) -> SchedResult<()> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|err| SchedError::fatal(format!("无效的日志级别 {}: {err}", config.level)))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.pretty {
        builder.pretty().try_init()
    } else {
        builder.compact().try_init()
    };
    result.map_err(|err| SchedError::fatal(format!("初始化日志失败: {err}")))
}

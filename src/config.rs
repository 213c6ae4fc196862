//! 应用配置
//!
//! 可选的TOML文件加上`CRONFLOW_`前缀的环境变量覆盖; 所有字段都有
//! 缺省值, 零配置即可启动嵌入式模式。

use serde::Deserialize;

use cronflow_common::constants::DEFAULT_ADMIN_USER_ID;
use cronflow_errors::{SchedError, SchedResult};

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub scheduler: SchedulerConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// tracing过滤表达式, 如 "info" 或 "cronflow=debug,info"
    pub level: String,
    /// 人类可读输出; 关闭则使用紧凑单行格式
    pub pretty: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pretty: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 跳过权限检查的管理员用户ID
    pub admin_user_id: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            admin_user_id: DEFAULT_ADMIN_USER_ID,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// 注册键中使用的本机IP
    pub node_ip: String,
    /// 本agent服务的项目列表
    pub projects: Vec<i64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_ip: "127.0.0.1".to_string(),
            projects: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 加载配置; `path`缺省时尝试读取可选的`config/cronflow.toml`
    pub fn load(path: Option<&str>) -> SchedResult<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path)),
            None => builder.add_source(config::File::with_name("config/cronflow").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix("CRONFLOW")
                .separator("__")
                .try_parsing(true),
        );
        builder
            .build()
            .and_then(|loaded| loaded.try_deserialize())
            .map_err(|err| SchedError::fatal(format!("加载配置失败: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_zero_config_startup() {
        let config = AppConfig::default();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.scheduler.admin_user_id, DEFAULT_ADMIN_USER_ID);
        assert_eq!(config.agent.node_ip, "127.0.0.1");
        assert!(config.agent.projects.is_empty());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}

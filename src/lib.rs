//! cronflow: cron驱动的workflow调度系统
//!
//! 嵌入式全家桶装配: 内存协调存储与元数据存储、计划注册表、调度
//! 循环和agent注册器在同一进程内协作。

pub mod app;
pub mod config;
pub mod logging;
pub mod shutdown;

pub use app::{Application, ApplicationHandle};
pub use config::{AgentConfig, AppConfig, LogConfig, SchedulerConfig};
pub use shutdown::ShutdownManager;

//! 系统常量定义

use std::time::Duration;

/// 系统名称
pub const SYSTEM_NAME: &str = "cronflow";

/// 系统版本
pub const SYSTEM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 每个workflow任务在一轮执行中的最大调度次数
pub const SCHEDULE_LIMIT: u32 = 3;

/// 任务停留在STARTING状态的宽限期（秒）, 超过则视为调度丢失
pub const STARTING_GRACE_SECONDS: i64 = 5;

/// 调度表为空时的默认休眠间隔
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// agent注册租约TTL（秒）
pub const REGISTER_LEASE_TTL_SECONDS: u64 = 10;

/// agent注册失败后的重试间隔
pub const REGISTER_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// 可重试操作的最大尝试次数
pub const RETRY_ATTEMPTS: u32 = 3;

/// 重试基础间隔（毫秒）
pub const RETRY_BASE_INTERVAL_MS: u64 = 100;

/// 重试指数退避倍数
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// 重试间隔的随机抖动范围（0.0-1.0）
pub const RETRY_JITTER_FACTOR: f64 = 0.1;

/// 协调存储单次操作的超时时间
pub const COORD_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// 启动时一次性加载workflow的页大小
pub const PLAN_LOAD_PAGE_SIZE: u64 = 1000;

/// 默认管理员用户ID, 可被配置覆盖
pub const DEFAULT_ADMIN_USER_ID: i64 = 1;

/// 本机IP无法确定时的占位节点名
pub const UNKNOWN_NODE_IP: &str = "未知IP节点";

//! 时间与标识工具函数

use std::future::Future;
use std::time::Duration;

use cronflow_errors::{SchedError, SchedResult};

/// 时间工具函数
pub mod time {
    use chrono::{DateTime, Utc};

    /// 当前UTC时间
    pub fn now_utc() -> DateTime<Utc> {
        Utc::now()
    }

    /// 当前unix秒
    pub fn now_unix() -> i64 {
        Utc::now().timestamp()
    }

    /// 格式化时间为可读字符串
    pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }
}

/// 生成一次调度尝试的关联ID
pub fn gen_tmp_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 给协调存储调用加上统一的超时上限
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> SchedResult<T>
where
    F: Future<Output = SchedResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SchedError::transient(format!(
            "操作超时（{}ms）",
            timeout.as_millis()
        ))),
    }
}

//! CRON表达式解析和调度工具

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use cronflow_errors::{SchedError, SchedResult};

/// 解析后的CRON调度器
///
/// 接受6段（秒级）表达式; 5段写法按分钟级处理, 解析前补上秒字段。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> SchedResult<Self> {
        let normalized = normalize(cron_expr);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| SchedError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { schedule })
    }

    /// `from`之后的下一次触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> SchedResult<DateTime<Utc>> {
        self.schedule
            .after(&from)
            .next()
            .ok_or_else(|| SchedError::fatal("无法计算下一次执行时间"))
    }

    /// 从`now`到下一次触发的间隔秒数
    pub fn fire_interval(&self, now: DateTime<Utc>) -> SchedResult<i64> {
        let next = self.next_after(now)?;
        Ok((next - now).num_seconds())
    }

    /// 从`from`开始的若干次触发时间
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 校验表达式是否合法
    pub fn validate(cron_expr: &str) -> SchedResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

fn normalize(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_six_field_expression() {
        let sched = CronScheduler::new("*/5 * * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert!(next > from);
        assert_eq!(next.timestamp() % 5, 0);
    }

    #[test]
    fn five_field_expression_gets_seconds_prepended() {
        let sched = CronScheduler::new("*/10 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 3, 30).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap());
    }

    #[test]
    fn rejects_garbage_expression() {
        let err = CronScheduler::new("not a cron").unwrap_err();
        assert!(matches!(err, SchedError::InvalidCron { .. }));
    }

    #[test]
    fn upcoming_times_are_strictly_increasing() {
        let sched = CronScheduler::new("0 * * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let times = sched.upcoming(from, 3);
        assert_eq!(times.len(), 3);
        assert!(times[0] < times[1] && times[1] < times[2]);
    }

    #[test]
    fn fire_interval_counts_down_to_next_fire() {
        let sched = CronScheduler::new("0 0 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        assert_eq!(sched.fire_interval(from).unwrap(), 1800);
    }
}

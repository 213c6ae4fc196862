//! 协调存储的键规划
//!
//! 所有键以`/`分隔, 值为JSON编码。

/// 计划状态键前缀
pub const WORKFLOW_PLAN_PREFIX: &str = "/workflow/plan/";
/// 任务状态键前缀
pub const WORKFLOW_TASK_PREFIX: &str = "/workflow/task/";
/// 任务结果队列前缀
pub const WORKFLOW_QUEUE_PREFIX: &str = "/workflow/queue/";
/// agent注册键前缀
pub const REGISTER_PREFIX: &str = "/register/";
/// 任务派发键前缀, 由调度端写入、agent端监听
pub const TASK_SCHEDULE_PREFIX: &str = "/task/schedule/";

pub fn plan_key(workflow_id: i64) -> String {
    format!("{WORKFLOW_PLAN_PREFIX}{workflow_id}")
}

pub fn task_state_prefix(workflow_id: i64) -> String {
    format!("{WORKFLOW_TASK_PREFIX}{workflow_id}/")
}

pub fn task_state_key(workflow_id: i64, project_id: i64, task_id: &str) -> String {
    format!("{WORKFLOW_TASK_PREFIX}{workflow_id}/{project_id}/{task_id}")
}

pub fn register_key(project_id: i64, ip: &str) -> String {
    format!("{REGISTER_PREFIX}{project_id}/{ip}")
}

pub fn schedule_key(project_id: i64, task_id: &str) -> String {
    format!("{TASK_SCHEDULE_PREFIX}{project_id}/{task_id}")
}

//! 持久化在协调存储中的计划与任务状态

use serde::{Deserialize, Serialize};

use crate::entities::TaskRef;

/// 计划与任务共用的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotRunning,
    Starting,
    Running,
    Done,
    Fail,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Fail)
    }
}

/// 单次调度尝试的记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleRecord {
    /// 本次尝试的关联ID, 派发时生成并随结果回传
    pub tmp_id: String,
    pub status: RunStatus,
    pub event_time: i64,
}

/// 一个workflow任务的持久化状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskState {
    pub workflow_id: i64,
    pub project_id: i64,
    pub task_id: String,
    pub current_status: RunStatus,
    /// 已发起的调度次数, 单调不减
    pub schedule_count: u32,
    /// 最近一次进入STARTING的unix秒
    pub start_time: i64,
    pub schedule_records: Vec<ScheduleRecord>,
}

impl TaskState {
    pub fn new(workflow_id: i64, project_id: i64, task_id: impl Into<String>) -> Self {
        Self {
            workflow_id,
            project_id,
            task_id: task_id.into(),
            current_status: RunStatus::NotRunning,
            schedule_count: 0,
            start_time: 0,
            schedule_records: Vec::new(),
        }
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            project_id: self.project_id,
            task_id: self.task_id.clone(),
        }
    }

    pub fn latest_record(&self) -> Option<&ScheduleRecord> {
        self.schedule_records.last()
    }
}

/// 一个workflow计划的持久化状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanState {
    pub status: RunStatus,
    /// 最近一次被置为RUNNING的unix秒
    pub latest_try_time: i64,
    /// 终态时的失败摘要
    pub reason: String,
    /// 终态时各任务状态的快照
    pub records: Vec<TaskState>,
}

impl Default for PlanState {
    fn default() -> Self {
        Self {
            status: RunStatus::NotRunning,
            latest_try_time: 0,
            reason: String::new(),
            records: Vec::new(),
        }
    }
}

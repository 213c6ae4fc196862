//! 调度事件与队列消息
//!
//! 任务结果在分布式队列中携带版本标签与不透明数据体, 便于向后兼容地
//! 增加新版本; 未知版本由消费方记录日志后丢弃。

use serde::{Deserialize, Serialize};

use cronflow_errors::SchedResult;

use crate::entities::TaskInfo;

/// 任务结果队列的v1版本标签
pub const QUEUE_ITEM_V1: &str = "v1";

/// 调度循环内部的任务事件
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task: TaskInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    /// 派发一个workflow任务
    WorkflowSchedule,
}

impl TaskEvent {
    pub fn workflow_schedule(task: TaskInfo) -> Self {
        Self {
            kind: TaskEventKind::WorkflowSchedule,
            task,
        }
    }
}

/// 队列中任务结果的外层信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFinishedQueueContent {
    pub version: String,
    pub data: serde_json::Value,
}

/// v1版本的任务结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFinishedItemV1 {
    /// 派发时生成的关联ID
    pub tmp_id: String,
    pub workflow_id: i64,
    pub project_id: i64,
    pub task_id: String,
    pub success: bool,
    pub output: String,
    pub end_time: i64,
}

impl TaskFinishedItemV1 {
    /// 编码为带版本信封的队列消息
    pub fn encode(&self) -> SchedResult<String> {
        let content = TaskFinishedQueueContent {
            version: QUEUE_ITEM_V1.to_string(),
            data: serde_json::to_value(self)?,
        };
        Ok(serde_json::to_string(&content)?)
    }
}

/// 写入派发键的内容, 由agent监听执行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSchedulePayload {
    pub tmp_id: String,
    pub workflow_id: i64,
    pub task: TaskInfo,
}

/// 告警数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarningData {
    pub kind: WarningKind,
    pub message: String,
    pub task_name: String,
    pub project_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    System,
}

//! 业务实体定义
//!
//! workflow及其任务关联行、任务元信息、用户关联关系和agent注册信息。

use std::fmt;

use serde::{Deserialize, Serialize};

/// workflow定义行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workflow {
    pub id: i64,
    pub title: String,
    /// CRON表达式, 支持5段（分钟级）与6段（秒级）写法
    pub cron_expr: String,
    pub remark: String,
    pub create_time: i64,
    pub update_time: i64,
}

/// workflow任务关联行
///
/// 每行表示“任务T依赖任务D”; 一个任务的多条依赖以多行表达。
/// 依赖字段为空表示“任务T存在于workflow中且无依赖”。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowTaskEdge {
    pub id: i64,
    pub workflow_id: i64,
    pub project_id: i64,
    pub task_id: String,
    pub dependency_project_id: i64,
    pub dependency_task_id: String,
    pub create_time: i64,
}

impl WorkflowTaskEdge {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            project_id: self.project_id,
            task_id: self.task_id.clone(),
        }
    }

    /// 该行表达的依赖; 空依赖哨兵行返回None
    pub fn dependency_ref(&self) -> Option<TaskRef> {
        if self.dependency_task_id.is_empty() {
            return None;
        }
        Some(TaskRef {
            project_id: self.dependency_project_id,
            task_id: self.dependency_task_id.clone(),
        })
    }
}

/// 任务的复合键 (project_id, task_id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub project_id: i64,
    pub task_id: String,
}

impl TaskRef {
    pub fn new(project_id: i64, task_id: impl Into<String>) -> Self {
        Self {
            project_id,
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.task_id)
    }
}

/// 任务元信息, 由任务目录解析得到
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskInfo {
    pub project_id: i64,
    pub task_id: String,
    pub name: String,
    pub command: String,
    pub timeout_seconds: i32,
    /// 任务作为workflow成员被调度时携带的归属信息
    pub flow_info: Option<WorkflowInfo>,
}

impl TaskInfo {
    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            project_id: self.project_id,
            task_id: self.task_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowInfo {
    pub workflow_id: i64,
}

/// 用户与workflow的编辑权限关联
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserWorkflowRelevance {
    pub id: i64,
    pub user_id: i64,
    pub workflow_id: i64,
    pub create_time: i64,
}

/// agent注册到协调存储的节点信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_ip: String,
    pub version: String,
}

/// workflow列表查询条件
#[derive(Debug, Clone, Default)]
pub struct GetWorkflowListOpts {
    pub ids: Vec<i64>,
    pub title: Option<String>,
}

//! 协作方端口定义
//!
//! 关系存储、任务目录与告警通道的抽象接口, 遵循依赖倒置。

use async_trait::async_trait;

use cronflow_errors::SchedResult;

use crate::entities::{
    GetWorkflowListOpts, TaskInfo, UserWorkflowRelevance, Workflow, WorkflowTaskEdge,
};
use crate::messaging::WarningData;

/// workflow元数据的关系存储抽象
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// 开启事务; 关联关系的替换操作在单个事务中执行
    async fn begin_tx(&self) -> SchedResult<Box<dyn StoreTx>>;

    async fn get_workflow(&self, id: i64) -> SchedResult<Option<Workflow>>;
    async fn get_workflow_list(
        &self,
        opts: &GetWorkflowListOpts,
        page: u64,
        page_size: u64,
    ) -> SchedResult<Vec<Workflow>>;
    async fn get_workflow_total(&self, opts: &GetWorkflowListOpts) -> SchedResult<u64>;
    async fn update_workflow(&self, workflow: &Workflow) -> SchedResult<()>;
    async fn delete_workflow(&self, id: i64) -> SchedResult<()>;

    async fn get_workflow_tasks(&self, workflow_id: i64) -> SchedResult<Vec<WorkflowTaskEdge>>;

    async fn get_user_workflow_relevance(
        &self,
        user_id: i64,
        workflow_id: i64,
    ) -> SchedResult<Option<UserWorkflowRelevance>>;
    async fn get_user_workflows(&self, user_id: i64)
        -> SchedResult<Vec<UserWorkflowRelevance>>;
}

/// 关系存储事务句柄
///
/// 创建操作会把分配到的自增ID回写到传入的实体上。
#[async_trait]
pub trait StoreTx: Send {
    async fn create_workflow(&mut self, workflow: &mut Workflow) -> SchedResult<()>;
    async fn create_user_workflow_relevance(
        &mut self,
        relevance: &mut UserWorkflowRelevance,
    ) -> SchedResult<()>;
    async fn delete_workflow_tasks(&mut self, ids: &[i64]) -> SchedResult<()>;
    async fn create_workflow_task(&mut self, edge: &mut WorkflowTaskEdge) -> SchedResult<()>;

    async fn commit(self: Box<Self>) -> SchedResult<()>;
    async fn rollback(self: Box<Self>) -> SchedResult<()>;
}

/// 任务目录, 解析 (project_id, task_id) 到任务元信息
#[async_trait]
pub trait TaskCatalog: Send + Sync {
    async fn get_task(&self, project_id: i64, task_id: &str) -> SchedResult<Option<TaskInfo>>;
}

/// 尽力而为的告警通道
#[async_trait]
pub trait WarningSink: Send + Sync {
    async fn warning(&self, data: WarningData) -> SchedResult<()>;
}

//! 面向管理端的workflow服务
//!
//! workflow及其任务关联的增删改查与权限校验。关联关系的变更按
//! (workflow, 任务)计算替换集: 已存在且仍需要的行保持不动, 多余的
//! 删除、缺少的创建, 全部写入在一个事务中完成。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::info;

use cronflow_common::utils::time::now_unix;
use cronflow_domain::entities::{
    GetWorkflowListOpts, TaskRef, UserWorkflowRelevance, Workflow, WorkflowTaskEdge,
};
use cronflow_domain::ports::RelationalStore;
use cronflow_errors::{SchedError, SchedResult};

use crate::cron_utils::CronScheduler;

/// 创建workflow任务的入参: 任务及其依赖集合
#[derive(Debug, Clone)]
pub struct CreateWorkflowTaskArgs {
    pub task: TaskRef,
    pub dependencies: Vec<TaskRef>,
}

pub struct WorkflowService {
    meta: Arc<dyn RelationalStore>,
    admin_user_id: i64,
}

impl WorkflowService {
    pub fn new(meta: Arc<dyn RelationalStore>, admin_user_id: i64) -> Self {
        Self {
            meta,
            admin_user_id,
        }
    }

    /// 管理员放行, 其余用户必须持有对应的关联关系
    async fn check_permission(&self, user_id: i64, workflow_id: i64) -> SchedResult<()> {
        if user_id == self.admin_user_id {
            return Ok(());
        }
        match self
            .meta
            .get_user_workflow_relevance(user_id, workflow_id)
            .await
        {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(SchedError::Unauthorized),
            Err(err) => Err(SchedError::fatal(format!("检测用户权限失败: {err}"))),
        }
    }

    pub async fn create_workflow(
        &self,
        user_id: i64,
        mut workflow: Workflow,
    ) -> SchedResult<Workflow> {
        CronScheduler::validate(&workflow.cron_expr)?;
        let now = now_unix();
        workflow.create_time = now;
        workflow.update_time = now;

        let mut tx = self.meta.begin_tx().await?;
        if let Err(err) = tx.create_workflow(&mut workflow).await {
            let _ = tx.rollback().await;
            return Err(SchedError::fatal(format!("创建workflow失败: {err}")));
        }
        let mut relevance = UserWorkflowRelevance {
            id: 0,
            user_id,
            workflow_id: workflow.id,
            create_time: now,
        };
        if let Err(err) = tx.create_user_workflow_relevance(&mut relevance).await {
            let _ = tx.rollback().await;
            return Err(SchedError::fatal(format!(
                "创建workflow用户关联关系失败: {err}"
            )));
        }
        tx.commit().await?;

        info!(workflow_id = workflow.id, user_id, "创建workflow成功");
        Ok(workflow)
    }

    pub async fn update_workflow(&self, user_id: i64, mut workflow: Workflow) -> SchedResult<()> {
        self.check_permission(user_id, workflow.id).await?;
        CronScheduler::validate(&workflow.cron_expr)?;
        workflow.update_time = now_unix();
        self.meta.update_workflow(&workflow).await
    }

    pub async fn delete_workflow(&self, user_id: i64, workflow_id: i64) -> SchedResult<()> {
        self.check_permission(user_id, workflow_id).await?;
        self.meta.delete_workflow(workflow_id).await
    }

    pub async fn get_workflow_list(
        &self,
        opts: &GetWorkflowListOpts,
        page: u64,
        page_size: u64,
    ) -> SchedResult<(Vec<Workflow>, u64)> {
        let list = self.meta.get_workflow_list(opts, page, page_size).await?;
        let total = self.meta.get_workflow_total(opts).await?;
        Ok((list, total))
    }

    pub async fn get_workflow_tasks(
        &self,
        workflow_id: i64,
    ) -> SchedResult<Vec<WorkflowTaskEdge>> {
        self.meta.get_workflow_tasks(workflow_id).await
    }

    /// 用户关联的workflow ID列表
    pub async fn get_user_workflows(&self, user_id: i64) -> SchedResult<Vec<i64>> {
        let list = self.meta.get_user_workflows(user_id).await?;
        Ok(list.into_iter().map(|rel| rel.workflow_id).collect())
    }

    /// 以替换集语义更新workflow的任务关联
    ///
    /// 入参中的每个任务与其现有行做差: 不变的行保留、多余的删除、
    /// 缺少的创建; 入参中不再出现的任务整体移除。
    pub async fn create_workflow_task(
        &self,
        user_id: i64,
        workflow_id: i64,
        task_list: Vec<CreateWorkflowTaskArgs>,
    ) -> SchedResult<()> {
        self.check_permission(user_id, workflow_id).await?;

        let existing = self.meta.get_workflow_tasks(workflow_id).await?;
        let mut by_task: HashMap<TaskRef, Vec<WorkflowTaskEdge>> = HashMap::new();
        for edge in existing {
            by_task.entry(edge.task_ref()).or_default().push(edge);
        }

        let mut to_delete: Vec<i64> = Vec::new();
        let mut to_create: Vec<WorkflowTaskEdge> = Vec::new();
        for args in &task_list {
            let current = by_task.remove(&args.task).unwrap_or_default();
            let (deletes, creates) =
                dispose_workflow_task_edges(workflow_id, &args.task, &args.dependencies, &current);
            to_delete.extend(deletes);
            to_create.extend(creates);
        }
        // 不再出现在入参中的任务, 其关联整体删除
        for edges in by_task.into_values() {
            to_delete.extend(edges.iter().map(|edge| edge.id));
        }

        let mut tx = self.meta.begin_tx().await?;
        if let Err(err) = tx.delete_workflow_tasks(&to_delete).await {
            let _ = tx.rollback().await;
            return Err(SchedError::fatal(format!(
                "创建workflow任务信息失败, 解除任务关联失败: {err}"
            )));
        }
        for mut edge in to_create {
            if let Err(err) = tx.create_workflow_task(&mut edge).await {
                let _ = tx.rollback().await;
                return Err(SchedError::fatal(format!(
                    "创建workflow任务信息失败, 创建任务关联关系失败: {err}"
                )));
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

/// 计算一个任务的关联替换集
///
/// 返回需要删除的行ID与需要创建的行。"没有依赖"用一条空依赖的哨兵行
/// 表达, 使任务在workflow中生效; 期望依赖为空时哨兵行进入期望集,
/// 与其他行一样参与保留、删除与创建的计算。
pub fn dispose_workflow_task_edges(
    workflow_id: i64,
    task: &TaskRef,
    desired: &[TaskRef],
    existing: &[WorkflowTaskEdge],
) -> (Vec<i64>, Vec<WorkflowTaskEdge>) {
    let mut desired_set: HashSet<TaskRef> = desired.iter().cloned().collect();
    if desired_set.is_empty() {
        desired_set.insert(TaskRef::new(0, ""));
    }

    let mut to_delete = Vec::new();
    for edge in existing {
        let key = TaskRef {
            project_id: edge.dependency_project_id,
            task_id: edge.dependency_task_id.clone(),
        };
        if desired_set.remove(&key) {
            // 已存在的依赖保持不动
            continue;
        }
        to_delete.push(edge.id);
    }

    let now = now_unix();
    let to_create: Vec<WorkflowTaskEdge> = desired_set
        .into_iter()
        .map(|dep| WorkflowTaskEdge {
            id: 0,
            workflow_id,
            project_id: task.project_id,
            task_id: task.task_id.clone(),
            dependency_project_id: dep.project_id,
            dependency_task_id: dep.task_id,
            create_time: now,
        })
        .collect();

    (to_delete, to_create)
}

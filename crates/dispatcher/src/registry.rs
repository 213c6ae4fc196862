//! 活跃workflow计划的注册表
//!
//! 以workflow ID为键的并发map加原子计数器; 计划整体替换, 不做原地
//! 修补, 迭代期间的变更互不影响。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use cronflow_common::constants::PLAN_LOAD_PAGE_SIZE;
use cronflow_domain::coordination::CoordStore;
use cronflow_domain::entities::{GetWorkflowListOpts, TaskRef, Workflow, WorkflowInfo};
use cronflow_domain::ports::{RelationalStore, TaskCatalog};
use cronflow_errors::{SchedError, SchedResult};

use crate::cron_utils::CronScheduler;
use crate::graph::kahn;
use crate::plan::WorkflowPlan;
use crate::plan_store;

pub struct PlanRegistry {
    plans: RwLock<HashMap<i64, Arc<Mutex<WorkflowPlan>>>>,
    counter: AtomicI64,
    meta: Arc<dyn RelationalStore>,
    catalog: Arc<dyn TaskCatalog>,
    store: Arc<dyn CoordStore>,
}

impl PlanRegistry {
    pub fn new(
        meta: Arc<dyn RelationalStore>,
        catalog: Arc<dyn TaskCatalog>,
        store: Arc<dyn CoordStore>,
    ) -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            counter: AtomicI64::new(0),
            meta,
            catalog,
            store,
        }
    }

    /// 启动时从关系存储加载全部workflow并构建计划
    ///
    /// 单个workflow构建失败只记录日志, 不阻塞其余计划加载。
    pub async fn load_all(&self) -> SchedResult<usize> {
        let list = self
            .meta
            .get_workflow_list(&GetWorkflowListOpts::default(), 1, PLAN_LOAD_PAGE_SIZE)
            .await?;
        let mut loaded = 0;
        for workflow in list {
            let id = workflow.id;
            match self.set_plan(workflow).await {
                Ok(()) => loaded += 1,
                Err(err) => error!(workflow_id = id, "构建workflow计划失败: {}", err),
            }
        }
        info!("已加载 {} 个workflow计划", loaded);
        Ok(loaded)
    }

    /// 构建并安装计划, 替换同ID的已有条目
    pub async fn set_plan(&self, workflow: Workflow) -> SchedResult<()> {
        let plan = self.build_plan(workflow).await?;
        let id = plan.workflow.id;
        let mut plans = self.plans.write().await;
        if plans.insert(id, Arc::new(Mutex::new(plan))).is_none() {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn build_plan(&self, workflow: Workflow) -> SchedResult<WorkflowPlan> {
        let edges = self.meta.get_workflow_tasks(workflow.id).await?;

        let mut tasks = HashMap::new();
        let mut task_flow: HashMap<TaskRef, Vec<TaskRef>> = HashMap::new();
        for edge in &edges {
            let key = edge.task_ref();
            let deps = task_flow.entry(key.clone()).or_default();
            if let Some(dep) = edge.dependency_ref() {
                deps.push(dep);
            }
            if !tasks.contains_key(&key) {
                let mut info = self
                    .catalog
                    .get_task(key.project_id, &key.task_id)
                    .await?
                    .ok_or_else(|| SchedError::not_found(format!("任务 {key}")))?;
                info.flow_info = Some(WorkflowInfo {
                    workflow_id: workflow.id,
                });
                tasks.insert(key, info);
            }
        }

        // 依赖图必须是DAG
        kahn(&task_flow)?;

        let expr = CronScheduler::new(&workflow.cron_expr)?;
        let next_time = expr.next_after(Utc::now())?;
        let plan_state = plan_store::get_plan_state(self.store.as_ref(), workflow.id).await?;

        Ok(WorkflowPlan {
            workflow,
            expr,
            next_time,
            tasks,
            task_flow,
            plan_state,
        })
    }

    pub async fn get_plan(&self, id: i64) -> Option<Arc<Mutex<WorkflowPlan>>> {
        self.plans.read().await.get(&id).cloned()
    }

    pub async fn del_plan(&self, id: i64) {
        if self.plans.write().await.remove(&id).is_some() {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn plan_count(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// 当前全部计划的快照, 供调度循环在不持锁的情况下遍历
    pub async fn snapshot(&self) -> Vec<Arc<Mutex<WorkflowPlan>>> {
        self.plans.read().await.values().cloned().collect()
    }
}

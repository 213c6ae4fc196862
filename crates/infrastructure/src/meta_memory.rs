//! 关系存储与任务目录的内存实现
//!
//! 嵌入式部署与测试用; 事务把写操作缓冲起来, 提交时在一次写锁内
//! 统一应用, 回滚即丢弃。自增ID在记录操作时预分配。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use cronflow_domain::entities::{
    GetWorkflowListOpts, TaskInfo, TaskRef, UserWorkflowRelevance, Workflow, WorkflowTaskEdge,
};
use cronflow_domain::ports::{RelationalStore, StoreTx, TaskCatalog};
use cronflow_errors::{SchedError, SchedResult};

#[derive(Default)]
struct MetaInner {
    workflows: BTreeMap<i64, Workflow>,
    edges: BTreeMap<i64, WorkflowTaskEdge>,
    relevance: BTreeMap<i64, UserWorkflowRelevance>,
}

impl MetaInner {
    fn filtered_workflows<'a>(
        &'a self,
        opts: &'a GetWorkflowListOpts,
    ) -> impl Iterator<Item = &'a Workflow> {
        self.workflows.values().filter(move |wf| {
            if !opts.ids.is_empty() && !opts.ids.contains(&wf.id) {
                return false;
            }
            if let Some(title) = &opts.title {
                if !wf.title.contains(title.as_str()) {
                    return false;
                }
            }
            true
        })
    }
}

pub struct MemoryMetaStore {
    inner: Arc<RwLock<MetaInner>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetaInner::default())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }
}

impl Default for MemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

enum MetaOp {
    InsertWorkflow(Workflow),
    InsertRelevance(UserWorkflowRelevance),
    DeleteEdges(Vec<i64>),
    InsertEdge(WorkflowTaskEdge),
}

pub struct MemoryMetaTx {
    inner: Arc<RwLock<MetaInner>>,
    next_id: Arc<AtomicI64>,
    ops: Vec<MetaOp>,
}

impl MemoryMetaTx {
    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreTx for MemoryMetaTx {
    async fn create_workflow(&mut self, workflow: &mut Workflow) -> SchedResult<()> {
        if workflow.id == 0 {
            workflow.id = self.alloc_id();
        }
        self.ops.push(MetaOp::InsertWorkflow(workflow.clone()));
        Ok(())
    }

    async fn create_user_workflow_relevance(
        &mut self,
        relevance: &mut UserWorkflowRelevance,
    ) -> SchedResult<()> {
        if relevance.id == 0 {
            relevance.id = self.alloc_id();
        }
        self.ops.push(MetaOp::InsertRelevance(relevance.clone()));
        Ok(())
    }

    async fn delete_workflow_tasks(&mut self, ids: &[i64]) -> SchedResult<()> {
        self.ops.push(MetaOp::DeleteEdges(ids.to_vec()));
        Ok(())
    }

    async fn create_workflow_task(&mut self, edge: &mut WorkflowTaskEdge) -> SchedResult<()> {
        if edge.id == 0 {
            edge.id = self.alloc_id();
        }
        self.ops.push(MetaOp::InsertEdge(edge.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SchedResult<()> {
        let mut inner = self.inner.write().await;
        for op in self.ops {
            match op {
                MetaOp::InsertWorkflow(wf) => {
                    inner.workflows.insert(wf.id, wf);
                }
                MetaOp::InsertRelevance(rel) => {
                    inner.relevance.insert(rel.id, rel);
                }
                MetaOp::DeleteEdges(ids) => {
                    for id in ids {
                        inner.edges.remove(&id);
                    }
                }
                MetaOp::InsertEdge(edge) => {
                    inner.edges.insert(edge.id, edge);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SchedResult<()> {
        Ok(())
    }
}

#[async_trait]
impl RelationalStore for MemoryMetaStore {
    async fn begin_tx(&self) -> SchedResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryMetaTx {
            inner: self.inner.clone(),
            next_id: self.next_id.clone(),
            ops: Vec::new(),
        }))
    }

    async fn get_workflow(&self, id: i64) -> SchedResult<Option<Workflow>> {
        Ok(self.inner.read().await.workflows.get(&id).cloned())
    }

    async fn get_workflow_list(
        &self,
        opts: &GetWorkflowListOpts,
        page: u64,
        page_size: u64,
    ) -> SchedResult<Vec<Workflow>> {
        if page == 0 || page_size == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        Ok(inner
            .filtered_workflows(opts)
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn get_workflow_total(&self, opts: &GetWorkflowListOpts) -> SchedResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.filtered_workflows(opts).count() as u64)
    }

    async fn update_workflow(&self, workflow: &Workflow) -> SchedResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.workflows.contains_key(&workflow.id) {
            return Err(SchedError::not_found(format!("workflow {}", workflow.id)));
        }
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn delete_workflow(&self, id: i64) -> SchedResult<()> {
        self.inner.write().await.workflows.remove(&id);
        Ok(())
    }

    async fn get_workflow_tasks(&self, workflow_id: i64) -> SchedResult<Vec<WorkflowTaskEdge>> {
        let inner = self.inner.read().await;
        Ok(inner
            .edges
            .values()
            .filter(|edge| edge.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn get_user_workflow_relevance(
        &self,
        user_id: i64,
        workflow_id: i64,
    ) -> SchedResult<Option<UserWorkflowRelevance>> {
        let inner = self.inner.read().await;
        Ok(inner
            .relevance
            .values()
            .find(|rel| rel.user_id == user_id && rel.workflow_id == workflow_id)
            .cloned())
    }

    async fn get_user_workflows(
        &self,
        user_id: i64,
    ) -> SchedResult<Vec<UserWorkflowRelevance>> {
        let inner = self.inner.read().await;
        Ok(inner
            .relevance
            .values()
            .filter(|rel| rel.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// 任务目录的内存实现
pub struct MemoryTaskCatalog {
    tasks: RwLock<BTreeMap<(i64, String), TaskInfo>>,
}

impl MemoryTaskCatalog {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn insert(&self, task: TaskInfo) {
        self.tasks
            .write()
            .await
            .insert((task.project_id, task.task_id.clone()), task);
    }

    pub async fn remove(&self, task_ref: &TaskRef) {
        self.tasks
            .write()
            .await
            .remove(&(task_ref.project_id, task_ref.task_id.clone()));
    }
}

impl Default for MemoryTaskCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskCatalog for MemoryTaskCatalog {
    async fn get_task(&self, project_id: i64, task_id: &str) -> SchedResult<Option<TaskInfo>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&(project_id, task_id.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(title: &str) -> Workflow {
        Workflow {
            id: 0,
            title: title.to_string(),
            cron_expr: "0 * * * * *".to_string(),
            remark: String::new(),
            create_time: 1700000000,
            update_time: 1700000000,
        }
    }

    #[tokio::test]
    async fn commit_applies_buffered_ops() {
        let store = MemoryMetaStore::new();
        let mut tx = store.begin_tx().await.unwrap();
        let mut wf = workflow("夜间报表");
        tx.create_workflow(&mut wf).await.unwrap();
        assert!(wf.id > 0);

        // 提交前不可见
        assert!(store.get_workflow(wf.id).await.unwrap().is_none());
        tx.commit().await.unwrap();
        assert_eq!(
            store.get_workflow(wf.id).await.unwrap().unwrap().title,
            "夜间报表"
        );
    }

    #[tokio::test]
    async fn rollback_discards_ops() {
        let store = MemoryMetaStore::new();
        let mut tx = store.begin_tx().await.unwrap();
        let mut wf = workflow("临时");
        tx.create_workflow(&mut wf).await.unwrap();
        let id = wf.id;
        tx.rollback().await.unwrap();
        assert!(store.get_workflow(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_title_and_paginates() {
        let store = MemoryMetaStore::new();
        for title in ["数据同步", "数据清理", "告警巡检"] {
            let mut tx = store.begin_tx().await.unwrap();
            let mut wf = workflow(title);
            tx.create_workflow(&mut wf).await.unwrap();
            tx.commit().await.unwrap();
        }

        let opts = GetWorkflowListOpts {
            title: Some("数据".to_string()),
            ..Default::default()
        };
        assert_eq!(store.get_workflow_total(&opts).await.unwrap(), 2);

        let page = store.get_workflow_list(&opts, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        let page2 = store.get_workflow_list(&opts, 2, 1).await.unwrap();
        assert_eq!(page2.len(), 1);
        assert_ne!(page[0].id, page2[0].id);
    }
}

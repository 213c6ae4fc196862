//! 调度循环
//!
//! 单个协作式循环在三路信号上select: 内部调度事件通道、由后台任务
//! 从分布式队列搬运的任务结果通道, 以及一次性的调度定时器。任一分支
//! 返回后重算下一次休眠并重置定时器。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use cronflow_common::constants::{COORD_OP_TIMEOUT, DEFAULT_IDLE_INTERVAL};
use cronflow_common::retry::retry;
use cronflow_common::utils::{gen_tmp_id, with_timeout};
use cronflow_domain::coordination::{CoordStore, Stm};
use cronflow_domain::entities::TaskInfo;
use cronflow_domain::keys;
use cronflow_domain::messaging::{
    TaskEvent, TaskEventKind, TaskFinishedItemV1, TaskFinishedQueueContent, TaskSchedulePayload,
    WarningData, WarningKind, QUEUE_ITEM_V1,
};
use cronflow_domain::ports::WarningSink;
use cronflow_errors::{SchedError, SchedResult};

use crate::plan::WorkflowPlan;
use crate::plan_store;
use crate::registry::PlanRegistry;

/// 调度循环的关闭句柄
#[derive(Clone)]
pub struct RunnerHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl RunnerHandle {
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

enum Wake {
    Event(TaskEvent),
    Result(String),
    Timer,
    Shutdown,
}

pub struct WorkflowRunner {
    registry: Arc<PlanRegistry>,
    store: Arc<dyn CoordStore>,
    warning: Arc<dyn WarningSink>,
    schedule_event_tx: mpsc::UnboundedSender<TaskEvent>,
    schedule_event_rx: mpsc::UnboundedReceiver<TaskEvent>,
    task_result_rx: mpsc::UnboundedReceiver<String>,
    shutdown_tx: broadcast::Sender<()>,
    closed: Arc<AtomicBool>,
}

impl WorkflowRunner {
    /// 构建调度循环: 加载全部计划, 并启动结果队列的搬运任务
    pub async fn new(
        registry: Arc<PlanRegistry>,
        store: Arc<dyn CoordStore>,
        warning: Arc<dyn WarningSink>,
    ) -> SchedResult<Self> {
        registry.load_all().await?;

        let (schedule_event_tx, schedule_event_rx) = mpsc::unbounded_channel();
        let (task_result_tx, task_result_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);
        let closed = Arc::new(AtomicBool::new(false));

        Self::spawn_result_forwarder(
            store.clone(),
            task_result_tx,
            shutdown_tx.subscribe(),
            closed.clone(),
        );

        Ok(Self {
            registry,
            store,
            warning,
            schedule_event_tx,
            schedule_event_rx,
            task_result_rx,
            shutdown_tx,
            closed,
        })
    }

    /// 后台任务: 阻塞出队任务结果并送入循环; 关闭后把在途结果放回队列
    fn spawn_result_forwarder(
        store: Arc<dyn CoordStore>,
        task_result_tx: mpsc::UnboundedSender<String>,
        mut shutdown_rx: broadcast::Receiver<()>,
        closed: Arc<AtomicBool>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    dequeued = store.dequeue(keys::WORKFLOW_QUEUE_PREFIX) => {
                        let raw = match dequeued {
                            Ok(raw) => raw,
                            Err(err) => {
                                error!("任务结果出队失败: {}", err);
                                break;
                            }
                        };
                        if closed.load(Ordering::SeqCst) || task_result_tx.send(raw.clone()).is_err() {
                            if let Err(err) = store.enqueue(keys::WORKFLOW_QUEUE_PREFIX, &raw).await {
                                error!("调度循环已关闭, 任务结果重新入队失败: {}", err);
                            }
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("任务结果搬运任务退出");
        });
    }

    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// 调度主循环, 运行直到收到关闭信号
    pub async fn run(mut self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sleep_for = self.try_schedule().await;
        info!(
            "workflow调度循环启动, {}ms 后进行下一次调度",
            sleep_for.as_millis()
        );

        loop {
            let wake = tokio::select! {
                Some(event) = self.schedule_event_rx.recv() => Wake::Event(event),
                Some(raw) = self.task_result_rx.recv() => Wake::Result(raw),
                _ = tokio::time::sleep(sleep_for) => Wake::Timer,
                _ = shutdown_rx.recv() => Wake::Shutdown,
            };

            match wake {
                Wake::Event(event) => self.handle_task_event(event).await,
                Wake::Result(raw) => self.handle_task_result(raw).await,
                Wake::Timer => {}
                Wake::Shutdown => {
                    self.closed.store(true, Ordering::SeqCst);
                }
            }

            if self.closed.load(Ordering::SeqCst) {
                self.requeue_pending_results().await;
                info!("workflow调度循环退出");
                return;
            }

            // 每次触发事件后重新计算下次调度时间
            sleep_for = self.try_schedule().await;
        }
    }

    /// 退出前把尚未消费的任务结果放回分布式队列
    async fn requeue_pending_results(&mut self) {
        while let Ok(raw) = self.task_result_rx.try_recv() {
            if let Err(err) = self.store.enqueue(keys::WORKFLOW_QUEUE_PREFIX, &raw).await {
                error!("退出时任务结果重新入队失败: {}", err);
            }
        }
    }

    /// 遍历计划注册表, 触发到期的计划, 返回距最近一次触发的间隔
    pub async fn try_schedule(&self) -> Duration {
        if self.registry.plan_count() == 0 {
            return DEFAULT_IDLE_INTERVAL;
        }

        let now = Utc::now();
        let mut near_time: Option<DateTime<Utc>> = None;

        for plan_arc in self.registry.snapshot().await {
            let mut plan = plan_arc.lock().await;
            if plan.next_time <= now {
                if let Err(err) = self.try_start_plan(&mut plan).await {
                    error!(workflow_id = plan.workflow.id, "执行workflow失败: {}", err);
                }
                match plan.expr.next_after(now) {
                    Ok(next) => plan.next_time = next,
                    Err(err) => {
                        error!(
                            workflow_id = plan.workflow.id,
                            "更新下一次执行时间失败: {}", err
                        );
                        plan.next_time = now + chrono::Duration::seconds(1);
                    }
                }
            }
            if near_time.map(|near| plan.next_time < near).unwrap_or(true) {
                near_time = Some(plan.next_time);
            }
        }

        match near_time {
            Some(near) => (near - now).to_std().unwrap_or(Duration::ZERO),
            None => DEFAULT_IDLE_INTERVAL,
        }
    }

    /// 尝试启动一个计划: 运行中则跳过, 否则落锁、判定就绪集合并派发
    pub async fn try_start_plan(&self, plan: &mut WorkflowPlan) -> SchedResult<()> {
        if plan.is_running(self.store.as_ref()).await? {
            debug!(
                workflow_id = plan.workflow.id,
                "上一轮workflow仍在运行中, 跳过本次调度"
            );
            return Ok(());
        }
        if !plan.set_running(self.store.as_ref()).await? {
            return Ok(());
        }
        self.dispatch_ready(plan).await
    }

    /// 判定就绪集合并派发; 计划已结束时收尾
    ///
    /// 任务结果到达后由结果路径直接调用, 不经过`is_running`栅栏,
    /// 使被解除阻塞的任务在本轮内立即派发。
    async fn dispatch_ready(&self, plan: &mut WorkflowPlan) -> SchedResult<()> {
        let (readys, finished) = match plan.can_schedule(self.store.as_ref()).await {
            Ok(result) => result,
            Err(SchedError::WorkflowFailed) => {
                plan.finished(self.store.as_ref(), Some(SchedError::WorkflowFailed))
                    .await?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if finished {
            plan.finished(self.store.as_ref(), None).await?;
            return Ok(());
        }

        for task_ref in readys {
            match plan.tasks.get(&task_ref) {
                Some(task) => {
                    if self
                        .schedule_event_tx
                        .send(TaskEvent::workflow_schedule(task.clone()))
                        .is_err()
                    {
                        warn!("调度事件通道已关闭, 丢弃任务 {}", task_ref);
                    }
                }
                None => warn!(
                    workflow_id = plan.workflow.id,
                    "就绪任务 {} 缺少元信息", task_ref
                ),
            }
        }
        Ok(())
    }

    /// 处理内部调度事件: 有界重试地写入派发键, 耗尽后告警并丢弃
    async fn handle_task_event(&self, event: TaskEvent) {
        match event.kind {
            TaskEventKind::WorkflowSchedule => {
                let task = event.task;
                let workflow_id = match task.flow_info.as_ref() {
                    Some(info) => info.workflow_id,
                    None => {
                        warn!("调度事件缺少workflow归属, 丢弃任务 {}", task.task_ref());
                        return;
                    }
                };

                let dispatched = retry(|| {
                    with_timeout(COORD_OP_TIMEOUT, self.dispatch_task(workflow_id, &task))
                })
                .await;

                if let Err(err) = dispatched {
                    error!(
                        workflow_id,
                        task_id = %task.task_id,
                        "workflow任务调度失败: {}", err
                    );
                    let _ = self
                        .warning
                        .warning(WarningData {
                            kind: WarningKind::System,
                            message: format!(
                                "workflow任务调度失败, workflow_id: {workflow_id}\n{err}"
                            ),
                            task_name: task.name.clone(),
                            project_id: task.project_id,
                        })
                        .await;
                }
            }
        }
    }

    /// 在一个事务中写入STARTING流转与派发键
    async fn dispatch_task(&self, workflow_id: i64, task: &TaskInfo) -> SchedResult<()> {
        let tmp_id = gen_tmp_id();
        let mut txn = Stm::new(self.store.as_ref());
        plan_store::set_task_starting(&mut txn, workflow_id, task, &tmp_id).await?;
        let payload = TaskSchedulePayload {
            tmp_id: tmp_id.clone(),
            workflow_id,
            task: task.clone(),
        };
        txn.put(
            keys::schedule_key(task.project_id, &task.task_id),
            serde_json::to_string(&payload)?,
        );
        txn.commit().await?;
        debug!(
            workflow_id,
            task_id = %task.task_id,
            tmp_id = %tmp_id,
            "任务已写入派发键"
        );
        Ok(())
    }

    /// 解码队列消息并按版本分发; 未知版本记录日志后丢弃
    async fn handle_task_result(&self, raw: String) {
        let content: TaskFinishedQueueContent = match serde_json::from_str(&raw) {
            Ok(content) => content,
            Err(err) => {
                warn!("无法解析任务结果信封, 丢弃: {}", err);
                return;
            }
        };
        match content.version.as_str() {
            QUEUE_ITEM_V1 => {
                let item: TaskFinishedItemV1 = match serde_json::from_value(content.data) {
                    Ok(item) => item,
                    Err(err) => {
                        warn!("无法解析v1任务结果, 丢弃: {}", err);
                        return;
                    }
                };
                if let Err(err) = self.handle_task_result_v1(&item).await {
                    // 状态事务未能提交, 放回分布式队列让其他副本消费
                    warn!(
                        workflow_id = item.workflow_id,
                        "任务结果消费出错, 重新入队: {}", err
                    );
                    if let Err(enqueue_err) = self
                        .store
                        .enqueue(keys::WORKFLOW_QUEUE_PREFIX, &raw)
                        .await
                    {
                        let _ = self
                            .warning
                            .warning(WarningData {
                                kind: WarningKind::System,
                                message: format!(
                                    "任务结果消费出错, 重新入队失败, {enqueue_err}"
                                ),
                                task_name: item.task_id.clone(),
                                project_id: item.project_id,
                            })
                            .await;
                    }
                }
            }
            version => warn!("未知的任务结果版本 {}, 丢弃", version),
        }
    }

    /// 处理v1任务结果
    ///
    /// 状态流转在有界重试的事务中提交; 事务失败时返回错误由上层重新
    /// 入队。提交成功后的计划收尾或继续派发失败只告警, 不再入队。
    pub async fn handle_task_result_v1(&self, item: &TaskFinishedItemV1) -> SchedResult<()> {
        let plan_arc = match self.registry.get_plan(item.workflow_id).await {
            Some(plan) => plan,
            None => {
                warn!(
                    workflow_id = item.workflow_id,
                    "收到未知workflow的任务结果, 丢弃"
                );
                return Ok(());
            }
        };

        let plan_tasks: Vec<_> = {
            let plan = plan_arc.lock().await;
            plan.task_flow.keys().cloned().collect()
        };

        let store = self.store.as_ref();
        let plan_finished = retry(|| async {
            let mut txn = Stm::new(store);
            let finished = plan_store::set_task_finished(&mut txn, &plan_tasks, item).await?;
            txn.commit().await?;
            Ok(finished)
        })
        .await?;

        if plan_finished {
            let mut plan = plan_arc.lock().await;
            if let Err(err) = plan.finished(store, None).await {
                error!(workflow_id = item.workflow_id, "收尾workflow失败: {}", err);
            }
            return Ok(());
        }

        // 状态已落库, 立即重算就绪集合以派发被解除阻塞的任务
        let followed_up = retry(|| async {
            let mut plan = plan_arc.lock().await;
            self.dispatch_ready(&mut plan).await
        })
        .await;
        if let Err(err) = followed_up {
            error!(
                workflow_id = item.workflow_id,
                "任务结果已记录, 但继续派发失败: {}", err
            );
            let _ = self
                .warning
                .warning(WarningData {
                    kind: WarningKind::System,
                    message: format!(
                        "workflow继续派发失败, workflow_id: {}\n{}",
                        item.workflow_id, err
                    ),
                    task_name: item.task_id.clone(),
                    project_id: item.project_id,
                })
                .await;
        }
        Ok(())
    }
}

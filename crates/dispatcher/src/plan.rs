//! workflow计划的运行时表示
//!
//! 就绪判定、运行中判定与计划收尾。计划不持有调度器的反向引用,
//! 所有需要访问协调存储的操作由调用方传入存储句柄。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use cronflow_common::constants::{SCHEDULE_LIMIT, STARTING_GRACE_SECONDS};
use cronflow_common::utils::time::now_unix;
use cronflow_domain::coordination::CoordStore;
use cronflow_domain::entities::{TaskInfo, TaskRef, Workflow};
use cronflow_domain::keys;
use cronflow_domain::states::{PlanState, RunStatus, ScheduleRecord, TaskState};
use cronflow_errors::{SchedError, SchedResult};

use crate::cron_utils::CronScheduler;
use crate::plan_store;

/// 一个处于调度中的workflow计划
#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    pub workflow: Workflow,
    pub expr: CronScheduler,
    /// 下一次触发时间, 每次触发后由调度循环重算
    pub next_time: DateTime<Utc>,
    /// 计划构建时一次性解析好的任务元信息
    pub tasks: HashMap<TaskRef, TaskInfo>,
    /// 任务 -> 其依赖
    pub task_flow: HashMap<TaskRef, Vec<TaskRef>>,
    /// 最近一次读到的计划状态, 可能滞后, 按需从协调存储刷新
    pub plan_state: Option<PlanState>,
}

impl WorkflowPlan {
    /// 计划是否仍在运行
    ///
    /// `latest_try_time`超过一个触发周期仍未收尾的计划视为卡死,
    /// 返回false以允许下一个调度窗口重试。
    pub async fn is_running(&mut self, store: &dyn CoordStore) -> SchedResult<bool> {
        if self.plan_state.is_none() {
            self.plan_state = plan_store::get_plan_state(store, self.workflow.id).await?;
        }
        let state = match &self.plan_state {
            Some(state) => state,
            None => return Ok(false),
        };
        let now = Utc::now();
        if now.timestamp() - state.latest_try_time > self.expr.fire_interval(now)? {
            return Ok(false);
        }
        Ok(state.status == RunStatus::Running)
    }

    /// 事务化地标记计划开始运行; 返回false表示另一副本已抢先
    pub async fn set_running(&mut self, store: &dyn CoordStore) -> SchedResult<bool> {
        let interval = self.expr.fire_interval(Utc::now())?;
        match plan_store::set_plan_running(store, self.workflow.id, interval).await? {
            Some(state) => {
                self.plan_state = Some(state);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 判断下一步可调度的任务
    ///
    /// 返回就绪集合与计划是否已全部完成。某个任务失败或卡在STARTING
    /// 且调度次数达到上限时返回[`SchedError::WorkflowFailed`]。
    /// RUNNING中的任务在等待结果, 不进入就绪集合; 停留在STARTING超过
    /// 宽限期的任务被重置回NOT_RUNNING以恢复丢失的派发。
    pub async fn can_schedule(
        &self,
        store: &dyn CoordStore,
    ) -> SchedResult<(Vec<TaskRef>, bool)> {
        let states = plan_store::get_task_states(store, self.workflow.id).await?;
        let state_map: HashMap<TaskRef, TaskState> = states
            .into_iter()
            .map(|state| (state.task_ref(), state))
            .collect();

        let mut readys = Vec::new();
        let mut finished = true;

        for (task, deps) in &self.task_flow {
            let task_state = state_map.get(task);
            if task_state
                .map(|s| s.current_status == RunStatus::Done)
                .unwrap_or(false)
            {
                continue;
            }

            // 上游还未全部跑完
            let deps_done = deps.iter().all(|dep| {
                state_map
                    .get(dep)
                    .map(|s| s.current_status == RunStatus::Done)
                    .unwrap_or(false)
            });
            if !deps_done {
                finished = false;
                continue;
            }

            match task_state {
                None => {
                    finished = false;
                    readys.push(task.clone());
                }
                Some(state) => match state.current_status {
                    RunStatus::NotRunning => {
                        finished = false;
                        readys.push(task.clone());
                    }
                    RunStatus::Running => {
                        finished = false;
                    }
                    RunStatus::Fail => {
                        if state.schedule_count >= SCHEDULE_LIMIT {
                            return Err(SchedError::WorkflowFailed);
                        }
                        finished = false;
                        readys.push(task.clone());
                    }
                    RunStatus::Starting => {
                        if state.schedule_count >= SCHEDULE_LIMIT {
                            return Err(SchedError::WorkflowFailed);
                        }
                        finished = false;
                        readys.push(task.clone());
                        if now_unix() - state.start_time > STARTING_GRACE_SECONDS {
                            self.recover_lost_dispatch(store, state).await?;
                        }
                    }
                    RunStatus::Done => {}
                },
            }
        }

        if finished {
            return Ok((Vec::new(), true));
        }
        Ok((readys, false))
    }

    /// 派发丢失补救: 重置为NOT_RUNNING并沿用上一次的tmp_id追加记录
    async fn recover_lost_dispatch(
        &self,
        store: &dyn CoordStore,
        state: &TaskState,
    ) -> SchedResult<()> {
        let mut reset = state.clone();
        reset.current_status = RunStatus::NotRunning;
        let prior_tmp_id = reset
            .latest_record()
            .map(|record| record.tmp_id.clone())
            .unwrap_or_default();
        reset.schedule_records.push(ScheduleRecord {
            tmp_id: prior_tmp_id,
            status: RunStatus::NotRunning,
            event_time: now_unix(),
        });
        warn!(
            workflow_id = reset.workflow_id,
            task_id = %reset.task_id,
            "任务停留在STARTING超过宽限期, 重置为NOT_RUNNING"
        );
        store
            .put(
                &keys::task_state_key(reset.workflow_id, reset.project_id, &reset.task_id),
                &serde_json::to_string(&reset)?,
                None,
            )
            .await
    }

    /// 计划收尾
    ///
    /// 根据各任务的最终状态汇总成败与失败原因, 记录最终状态快照,
    /// 然后清理该workflow在协调存储中的全部键。
    pub async fn finished(
        &mut self,
        store: &dyn CoordStore,
        schedule_error: Option<SchedError>,
    ) -> SchedResult<()> {
        let mut status = if schedule_error.is_some() {
            RunStatus::Fail
        } else {
            RunStatus::Done
        };

        let states = plan_store::get_task_states(store, self.workflow.id).await?;
        let mut reason = String::new();
        for state in &states {
            if state.current_status == RunStatus::Fail {
                status = RunStatus::Fail;
                let name = self
                    .tasks
                    .get(&state.task_ref())
                    .map(|task| task.name.as_str())
                    .unwrap_or(state.task_id.as_str());
                reason.push_str(name);
                reason.push_str(" 任务执行失败\n");
            }
        }
        if let Some(err) = &schedule_error {
            reason.push_str(&err.to_string());
            reason.push('\n');
        }

        let mut final_state = self.plan_state.clone().unwrap_or_default();
        final_state.status = status;
        final_state.reason = reason;
        final_state.records = states;

        // workflow执行结果的最终去向待定, 先落日志
        info!(
            workflow_id = self.workflow.id,
            "workflow执行结果: {}",
            serde_json::to_string(&final_state)?
        );

        plan_store::clear_workflow_keys(store, self.workflow.id).await?;
        self.plan_state = Some(final_state);
        Ok(())
    }
}

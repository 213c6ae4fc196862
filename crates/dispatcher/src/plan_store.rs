//! 计划与任务状态的读写
//!
//! 建立在协调存储语义层之上的一组自由函数; 状态流转经由乐观事务,
//! 计划收尾时清理全部相关键。

use cronflow_common::constants::SCHEDULE_LIMIT;
use cronflow_common::retry::retry;
use cronflow_common::utils::time::now_unix;
use cronflow_domain::coordination::{CoordStore, Stm};
use cronflow_domain::entities::{TaskInfo, TaskRef};
use cronflow_domain::keys;
use cronflow_domain::messaging::TaskFinishedItemV1;
use cronflow_domain::states::{PlanState, RunStatus, ScheduleRecord, TaskState};
use cronflow_errors::SchedResult;

/// 读取计划状态
pub async fn get_plan_state(
    store: &dyn CoordStore,
    workflow_id: i64,
) -> SchedResult<Option<PlanState>> {
    match store.get(&keys::plan_key(workflow_id)).await? {
        Some(versioned) => Ok(Some(serde_json::from_str(&versioned.value)?)),
        None => Ok(None),
    }
}

/// 事务化地把计划置为RUNNING
///
/// 当前状态为RUNNING且`latest_try_time`仍在一个触发周期内时不落锁,
/// 返回`None`; 否则覆盖写入RUNNING并刷新`latest_try_time`。
pub async fn set_plan_running(
    store: &dyn CoordStore,
    workflow_id: i64,
    fire_interval: i64,
) -> SchedResult<Option<PlanState>> {
    let key = keys::plan_key(workflow_id);
    retry(|| async {
        let mut txn = Stm::new(store);
        let now = now_unix();
        let mut state: PlanState = match txn.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => PlanState::default(),
        };
        if state.status == RunStatus::Running && now - state.latest_try_time <= fire_interval {
            return Ok(None);
        }
        state.status = RunStatus::Running;
        state.latest_try_time = now;
        txn.put(key.clone(), serde_json::to_string(&state)?);
        txn.commit().await?;
        Ok(Some(state))
    })
    .await
}

/// 前缀扫描一个workflow下的全部任务状态
pub async fn get_task_states(
    store: &dyn CoordStore,
    workflow_id: i64,
) -> SchedResult<Vec<TaskState>> {
    let pairs = store
        .get_prefix(&keys::task_state_prefix(workflow_id))
        .await?;
    pairs
        .into_iter()
        .map(|(_, versioned)| serde_json::from_str(&versioned.value).map_err(Into::into))
        .collect()
}

/// 派发时的状态流转: STARTING、调度计数加一、记录新的尝试
///
/// 写入发生在传入的事务中, 与派发键的写入一起提交。
pub async fn set_task_starting(
    txn: &mut Stm<'_>,
    workflow_id: i64,
    task: &TaskInfo,
    tmp_id: &str,
) -> SchedResult<()> {
    let key = keys::task_state_key(workflow_id, task.project_id, &task.task_id);
    let mut state: TaskState = match txn.get(&key).await? {
        Some(raw) => serde_json::from_str(&raw)?,
        None => TaskState::new(workflow_id, task.project_id, task.task_id.clone()),
    };
    let now = now_unix();
    state.current_status = RunStatus::Starting;
    state.schedule_count += 1;
    state.start_time = now;
    state.schedule_records.push(ScheduleRecord {
        tmp_id: tmp_id.to_string(),
        status: RunStatus::Starting,
        event_time: now,
    });
    txn.put(key, serde_json::to_string(&state)?);
    Ok(())
}

/// 任务结果的状态流转
///
/// 按`tmp_id`幂等: 最新记录已携带同一`tmp_id`与同一终态时不再追加。
/// 返回计划是否就此结束: 失败且调度次数达到上限, 或全部任务DONE。
pub async fn set_task_finished(
    txn: &mut Stm<'_>,
    plan_tasks: &[TaskRef],
    result: &TaskFinishedItemV1,
) -> SchedResult<bool> {
    let final_status = if result.success {
        RunStatus::Done
    } else {
        RunStatus::Fail
    };
    let key = keys::task_state_key(result.workflow_id, result.project_id, &result.task_id);
    let mut state: TaskState = match txn.get(&key).await? {
        Some(raw) => serde_json::from_str(&raw)?,
        None => TaskState::new(result.workflow_id, result.project_id, result.task_id.clone()),
    };

    let already_applied = state
        .latest_record()
        .map(|record| record.tmp_id == result.tmp_id && record.status == final_status)
        .unwrap_or(false);
    if !already_applied {
        state.current_status = final_status;
        state.schedule_records.push(ScheduleRecord {
            tmp_id: result.tmp_id.clone(),
            status: final_status,
            event_time: now_unix(),
        });
        txn.put(key, serde_json::to_string(&state)?);
    }

    if final_status == RunStatus::Fail {
        return Ok(state.schedule_count >= SCHEDULE_LIMIT);
    }

    let finished_ref = TaskRef::new(result.project_id, result.task_id.clone());
    for task in plan_tasks {
        if *task == finished_ref {
            continue;
        }
        let other_key = keys::task_state_key(result.workflow_id, task.project_id, &task.task_id);
        match txn.get(&other_key).await? {
            Some(raw) => {
                let other: TaskState = serde_json::from_str(&raw)?;
                if other.current_status != RunStatus::Done {
                    return Ok(false);
                }
            }
            None => return Ok(false),
        }
    }
    Ok(true)
}

/// 删除计划及其任务状态的全部键
pub async fn clear_workflow_keys(store: &dyn CoordStore, workflow_id: i64) -> SchedResult<()> {
    store.delete(&keys::plan_key(workflow_id)).await?;
    store
        .delete_prefix(&keys::task_state_prefix(workflow_id))
        .await?;
    Ok(())
}

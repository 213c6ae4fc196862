//! 计划与任务状态流转的测试
//!
//! 运行中判定的活性栅栏、结果流转的幂等性、重试上限收尾与键清理。

use std::collections::HashMap;

use chrono::Utc;

use cronflow_common::utils::time::now_unix;
use cronflow_dispatcher::cron_utils::CronScheduler;
use cronflow_dispatcher::plan::WorkflowPlan;
use cronflow_dispatcher::plan_store;
use cronflow_domain::coordination::{CoordStore, Stm};
use cronflow_domain::entities::{TaskInfo, TaskRef, Workflow, WorkflowInfo};
use cronflow_domain::keys;
use cronflow_domain::messaging::TaskFinishedItemV1;
use cronflow_domain::states::{PlanState, RunStatus, ScheduleRecord, TaskState};
use cronflow_errors::SchedError;
use cronflow_infrastructure::MemoryCoordStore;

const WORKFLOW_ID: i64 = 42;

fn single_task_plan(id: &str) -> WorkflowPlan {
    let key = TaskRef::new(1, id);
    let mut tasks = HashMap::new();
    tasks.insert(
        key.clone(),
        TaskInfo {
            project_id: 1,
            task_id: id.to_string(),
            name: id.to_uppercase(),
            command: format!("echo {id}"),
            timeout_seconds: 60,
            flow_info: Some(WorkflowInfo {
                workflow_id: WORKFLOW_ID,
            }),
        },
    );
    let mut task_flow = HashMap::new();
    task_flow.insert(key, Vec::new());

    let expr = CronScheduler::new("0 * * * * *").unwrap();
    let next_time = expr.next_after(Utc::now()).unwrap();
    WorkflowPlan {
        workflow: Workflow {
            id: WORKFLOW_ID,
            title: "测试workflow".to_string(),
            cron_expr: "0 * * * * *".to_string(),
            remark: String::new(),
            create_time: now_unix(),
            update_time: now_unix(),
        },
        expr,
        next_time,
        tasks,
        task_flow,
        plan_state: None,
    }
}

fn result_for(id: &str, tmp_id: &str, success: bool) -> TaskFinishedItemV1 {
    TaskFinishedItemV1 {
        tmp_id: tmp_id.to_string(),
        workflow_id: WORKFLOW_ID,
        project_id: 1,
        task_id: id.to_string(),
        success,
        output: String::new(),
        end_time: now_unix(),
    }
}

async fn read_task_state(store: &MemoryCoordStore, id: &str) -> Option<TaskState> {
    store
        .get(&keys::task_state_key(WORKFLOW_ID, 1, id))
        .await
        .unwrap()
        .map(|versioned| serde_json::from_str(&versioned.value).unwrap())
}

#[tokio::test]
async fn set_plan_running_marks_and_fences() {
    let store = MemoryCoordStore::new();

    let first = plan_store::set_plan_running(&store, WORKFLOW_ID, 60)
        .await
        .unwrap();
    let state = first.expect("首次标记应成功");
    assert_eq!(state.status, RunStatus::Running);
    assert!(state.latest_try_time > 0);

    // 触发周期内的重复标记被栅栏挡住
    let second = plan_store::set_plan_running(&store, WORKFLOW_ID, 60)
        .await
        .unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn stale_running_plan_can_be_retaken() {
    let store = MemoryCoordStore::new();

    let stale = PlanState {
        status: RunStatus::Running,
        latest_try_time: now_unix() - 3600,
        reason: String::new(),
        records: Vec::new(),
    };
    store
        .put(
            &keys::plan_key(WORKFLOW_ID),
            &serde_json::to_string(&stale).unwrap(),
            None,
        )
        .await
        .unwrap();

    // 超过一个触发周期的RUNNING视为卡死, 可重新接管
    let retaken = plan_store::set_plan_running(&store, WORKFLOW_ID, 60)
        .await
        .unwrap();
    assert!(retaken.is_some());
}

#[tokio::test]
async fn is_running_fence_allows_stuck_plan_retry() {
    let store = MemoryCoordStore::new();
    let mut plan = single_task_plan("a");

    // 每分钟触发的计划, latest_try_time在两小时前: 即使状态是RUNNING也放行
    plan.plan_state = Some(PlanState {
        status: RunStatus::Running,
        latest_try_time: now_unix() - 7200,
        reason: String::new(),
        records: Vec::new(),
    });
    assert!(!plan.is_running(&store).await.unwrap());

    // 刚刚标记的RUNNING仍然有效
    plan.plan_state = Some(PlanState {
        status: RunStatus::Running,
        latest_try_time: now_unix(),
        reason: String::new(),
        records: Vec::new(),
    });
    assert!(plan.is_running(&store).await.unwrap());
}

#[tokio::test]
async fn terminal_plan_needs_explicit_retake_to_leave_terminal_state() {
    let store = MemoryCoordStore::new();
    let mut plan = single_task_plan("a");

    // 终态计划不再视为运行中
    plan.plan_state = Some(PlanState {
        status: RunStatus::Fail,
        latest_try_time: now_unix(),
        reason: "A 任务执行失败\n".to_string(),
        records: Vec::new(),
    });
    assert!(!plan.is_running(&store).await.unwrap());

    // 离开终态的唯一途径是下一个调度窗口的显式标记
    assert!(plan.set_running(&store).await.unwrap());
    assert_eq!(
        plan.plan_state.as_ref().unwrap().status,
        RunStatus::Running
    );
}

#[tokio::test]
async fn task_result_is_idempotent_per_tmp_id() {
    let store = MemoryCoordStore::new();
    let plan = single_task_plan("a");
    let plan_tasks: Vec<TaskRef> = plan.task_flow.keys().cloned().collect();
    let result = result_for("a", "tmp-7", true);

    let mut txn = Stm::new(&store);
    let finished_first = plan_store::set_task_finished(&mut txn, &plan_tasks, &result)
        .await
        .unwrap();
    txn.commit().await.unwrap();
    let after_first = read_task_state(&store, "a").await.unwrap();

    // 同一结果再次应用, 状态与判定均不变
    let mut txn = Stm::new(&store);
    let finished_second = plan_store::set_task_finished(&mut txn, &plan_tasks, &result)
        .await
        .unwrap();
    txn.commit().await.unwrap();
    let after_second = read_task_state(&store, "a").await.unwrap();

    assert_eq!(finished_first, finished_second);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.schedule_records.len(), 1);
    assert_eq!(after_second.current_status, RunStatus::Done);
}

#[tokio::test]
async fn failed_result_at_limit_finishes_plan() {
    let store = MemoryCoordStore::new();
    let plan = single_task_plan("x");
    let plan_tasks: Vec<TaskRef> = plan.task_flow.keys().cloned().collect();

    let mut state = TaskState::new(WORKFLOW_ID, 1, "x");
    state.current_status = RunStatus::Running;
    state.schedule_count = 3;
    state.schedule_records.push(ScheduleRecord {
        tmp_id: "tmp-3".to_string(),
        status: RunStatus::Starting,
        event_time: now_unix(),
    });
    store
        .put(
            &keys::task_state_key(WORKFLOW_ID, 1, "x"),
            &serde_json::to_string(&state).unwrap(),
            None,
        )
        .await
        .unwrap();

    let mut txn = Stm::new(&store);
    let finished = plan_store::set_task_finished(
        &mut txn,
        &plan_tasks,
        &result_for("x", "tmp-3", false),
    )
    .await
    .unwrap();
    txn.commit().await.unwrap();
    assert!(finished);
}

#[tokio::test]
async fn failed_result_below_limit_keeps_plan_open() {
    let store = MemoryCoordStore::new();
    let plan = single_task_plan("x");
    let plan_tasks: Vec<TaskRef> = plan.task_flow.keys().cloned().collect();

    let mut state = TaskState::new(WORKFLOW_ID, 1, "x");
    state.current_status = RunStatus::Running;
    state.schedule_count = 1;
    store
        .put(
            &keys::task_state_key(WORKFLOW_ID, 1, "x"),
            &serde_json::to_string(&state).unwrap(),
            None,
        )
        .await
        .unwrap();

    let mut txn = Stm::new(&store);
    let finished = plan_store::set_task_finished(
        &mut txn,
        &plan_tasks,
        &result_for("x", "tmp-1", false),
    )
    .await
    .unwrap();
    txn.commit().await.unwrap();
    assert!(!finished);
}

#[tokio::test]
async fn retry_cap_finish_records_failure_reason() {
    let store = MemoryCoordStore::new();
    let mut plan = single_task_plan("x");

    let mut state = TaskState::new(WORKFLOW_ID, 1, "x");
    state.current_status = RunStatus::Fail;
    state.schedule_count = 3;
    store
        .put(
            &keys::task_state_key(WORKFLOW_ID, 1, "x"),
            &serde_json::to_string(&state).unwrap(),
            None,
        )
        .await
        .unwrap();

    let err = plan.can_schedule(&store).await.unwrap_err();
    assert!(matches!(err, SchedError::WorkflowFailed));

    plan.finished(&store, Some(SchedError::WorkflowFailed))
        .await
        .unwrap();

    let final_state = plan.plan_state.as_ref().unwrap();
    assert_eq!(final_state.status, RunStatus::Fail);
    assert!(final_state.reason.contains("X 任务执行失败"));
    assert_eq!(final_state.records.len(), 1);
}

#[tokio::test]
async fn finished_clears_every_workflow_key() {
    let store = MemoryCoordStore::new();
    let mut plan = single_task_plan("a");

    plan_store::set_plan_running(&store, WORKFLOW_ID, 60)
        .await
        .unwrap();
    let mut state = TaskState::new(WORKFLOW_ID, 1, "a");
    state.current_status = RunStatus::Done;
    store
        .put(
            &keys::task_state_key(WORKFLOW_ID, 1, "a"),
            &serde_json::to_string(&state).unwrap(),
            None,
        )
        .await
        .unwrap();

    plan.finished(&store, None).await.unwrap();

    assert!(store
        .get(&keys::plan_key(WORKFLOW_ID))
        .await
        .unwrap()
        .is_none());
    assert!(store
        .get_prefix(&keys::task_state_prefix(WORKFLOW_ID))
        .await
        .unwrap()
        .is_empty());

    // 其他workflow的键不受影响
    store.put("/workflow/task/43/1/zz", "{}", None).await.unwrap();
    plan_store::clear_workflow_keys(&store, WORKFLOW_ID)
        .await
        .unwrap();
    assert!(store
        .get("/workflow/task/43/1/zz")
        .await
        .unwrap()
        .is_some());
}

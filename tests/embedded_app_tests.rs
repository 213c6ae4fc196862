//! 嵌入式应用的冒烟测试

use std::time::Duration;

use cronflow::app::Application;
use cronflow::config::AppConfig;
use cronflow_dispatcher::CreateWorkflowTaskArgs;
use cronflow_domain::coordination::CoordStore;
use cronflow_domain::entities::{TaskInfo, TaskRef, Workflow};
use cronflow_domain::keys;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.agent.node_ip = "10.1.1.1".to_string();
    config.agent.projects = vec![7];
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_wire_and_shutdown() {
    let handle = Application::start(test_config()).await.unwrap();

    // agent注册键上线
    let reg_key = keys::register_key(7, "10.1.1.1");
    let registered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if handle.store.get(&reg_key).await.unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(registered.is_ok(), "agent注册键应出现");

    // 通过服务创建workflow与任务, 再装入调度表
    handle
        .catalog
        .insert(TaskInfo {
            project_id: 7,
            task_id: "nightly".to_string(),
            name: "夜间清理".to_string(),
            command: "echo clean".to_string(),
            timeout_seconds: 60,
            flow_info: None,
        })
        .await;
    let workflow = handle
        .service
        .create_workflow(
            1,
            Workflow {
                id: 0,
                title: "夜间清理".to_string(),
                cron_expr: "0 30 2 * * *".to_string(),
                remark: String::new(),
                create_time: 0,
                update_time: 0,
            },
        )
        .await
        .unwrap();
    handle
        .service
        .create_workflow_task(
            1,
            workflow.id,
            vec![CreateWorkflowTaskArgs {
                task: TaskRef::new(7, "nightly"),
                dependencies: Vec::new(),
            }],
        )
        .await
        .unwrap();

    handle.registry.set_plan(workflow.clone()).await.unwrap();
    assert_eq!(handle.registry.plan_count(), 1);
    assert!(handle.registry.get_plan(workflow.id).await.is_some());

    handle.shutdown().await;
}

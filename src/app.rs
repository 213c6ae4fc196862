//! 嵌入式应用装配
//!
//! 在单进程内接好内存后端、计划注册表、调度循环与agent注册器,
//! 返回一个可用于注入数据和优雅关闭的句柄。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use cronflow_agent::Registrar;
use cronflow_common::constants::SYSTEM_VERSION;
use cronflow_dispatcher::{PlanRegistry, RunnerHandle, WorkflowRunner, WorkflowService};
use cronflow_domain::coordination::CoordStore;
use cronflow_domain::ports::{RelationalStore, TaskCatalog, WarningSink};
use cronflow_errors::SchedResult;
use cronflow_infrastructure::{
    LogWarningSink, MemoryCoordStore, MemoryMetaStore, MemoryTaskCatalog,
};

use crate::config::AppConfig;
use crate::shutdown::ShutdownManager;

pub struct Application;

/// 运行中的嵌入式应用
pub struct ApplicationHandle {
    pub store: Arc<dyn CoordStore>,
    pub meta: Arc<dyn RelationalStore>,
    pub catalog: Arc<MemoryTaskCatalog>,
    pub registry: Arc<PlanRegistry>,
    pub service: Arc<WorkflowService>,
    pub registrar: Arc<Registrar>,
    runner_handle: RunnerHandle,
    runner_join: JoinHandle<()>,
    shutdown: ShutdownManager,
}

impl Application {
    /// 启动嵌入式应用
    pub async fn start(config: AppConfig) -> SchedResult<ApplicationHandle> {
        info!("初始化嵌入式应用");

        let store: Arc<dyn CoordStore> = Arc::new(MemoryCoordStore::new());
        let meta: Arc<dyn RelationalStore> = Arc::new(MemoryMetaStore::new());
        let catalog = Arc::new(MemoryTaskCatalog::new());
        let warning: Arc<dyn WarningSink> = Arc::new(LogWarningSink);

        let registry = Arc::new(PlanRegistry::new(
            meta.clone(),
            catalog.clone() as Arc<dyn TaskCatalog>,
            store.clone(),
        ));
        let service = Arc::new(WorkflowService::new(
            meta.clone(),
            config.scheduler.admin_user_id,
        ));

        let runner = WorkflowRunner::new(registry.clone(), store.clone(), warning).await?;
        let runner_handle = runner.handle();
        let runner_join = tokio::spawn(runner.run());

        let registrar = Registrar::new(
            store.clone(),
            config.agent.node_ip.clone(),
            SYSTEM_VERSION.to_string(),
        );
        registrar.register(&config.agent.projects).await?;

        info!("嵌入式应用启动完成");
        Ok(ApplicationHandle {
            store,
            meta,
            catalog,
            registry,
            service,
            registrar,
            runner_handle,
            runner_join,
            shutdown: ShutdownManager::new(),
        })
    }
}

impl ApplicationHandle {
    pub fn shutdown_manager(&self) -> &ShutdownManager {
        &self.shutdown
    }

    /// 优雅关闭: 停止调度循环并等待其退出
    pub async fn shutdown(self) {
        self.shutdown.shutdown();
        self.runner_handle.close();
        if let Err(err) = self.runner_join.await {
            error!("等待调度循环退出失败: {}", err);
        }
        info!("应用已关闭");
    }
}

//! workflow调度引擎
//!
//! 计划注册表、基于tick的调度循环、DAG就绪判定、针对协调存储的
//! 事务化状态流转, 以及面向管理端的workflow服务。

pub mod cron_utils;
pub mod graph;
pub mod plan;
pub mod plan_store;
pub mod registry;
pub mod runner;
pub mod workflow_service;

pub use cron_utils::CronScheduler;
pub use plan::WorkflowPlan;
pub use registry::PlanRegistry;
pub use runner::{RunnerHandle, WorkflowRunner};
pub use workflow_service::{CreateWorkflowTaskArgs, WorkflowService};

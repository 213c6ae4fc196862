//! 核心领域模型
//!
//! workflow、任务、计划状态等业务实体, 协调存储契约与各协作方端口定义。
//! 这些类型不依赖具体的存储实现。

pub mod coordination;
pub mod entities;
pub mod keys;
pub mod messaging;
pub mod ports;
pub mod states;

pub use coordination::{CoordStore, LeaseAck, LeaseId, Stm, TxnOp, VersionedValue};
pub use entities::{
    ClientInfo, GetWorkflowListOpts, TaskInfo, TaskRef, UserWorkflowRelevance, Workflow,
    WorkflowInfo, WorkflowTaskEdge,
};
pub use messaging::{
    TaskEvent, TaskEventKind, TaskFinishedItemV1, TaskFinishedQueueContent, TaskSchedulePayload,
    WarningData, WarningKind, QUEUE_ITEM_V1,
};
pub use ports::{RelationalStore, StoreTx, TaskCatalog, WarningSink};
pub use states::{PlanState, RunStatus, ScheduleRecord, TaskState};

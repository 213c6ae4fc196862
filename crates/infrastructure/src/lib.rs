//! 基础设施实现
//!
//! 协调存储与关系存储的内存后端, 适用于嵌入式部署与测试场景,
//! 以及写日志的告警通道。

pub mod memory;
pub mod meta_memory;
pub mod warning;

pub use memory::MemoryCoordStore;
pub use meta_memory::{MemoryMetaStore, MemoryTaskCatalog};
pub use warning::LogWarningSink;

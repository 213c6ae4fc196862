//! 系统通用常量与辅助函数

pub mod constants;
pub mod retry;
pub mod utils;

pub use constants::*;
pub use retry::retry;

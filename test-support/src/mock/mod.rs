//! Mock 实现模块
//!
//! 提供架构操作、内存管理平台常量和后备存储的 Mock 实现，用于测试

pub mod arch;
pub mod mm;
pub mod store;

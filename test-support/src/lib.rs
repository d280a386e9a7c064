//! 测试支持 crate
//!
//! 提供 Mock 实现和测试工具。被测 crate 在自己的测试中用本地包装类型
//! 实现其 trait，并委托给这里的全局 Mock 实例。

#![no_std]

pub mod mock;

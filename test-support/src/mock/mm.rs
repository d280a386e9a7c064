//! 内存管理相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `mm` crate（避免循环依赖）。
//! `mm` 的测试为这些类型包一层并实现其 trait（例如 `ArchMmOps` / `MmConfig`）。

use core::sync::atomic::{AtomicUsize, Ordering};

/// Mock 的内存管理架构操作，只计数
pub struct MockMmOps {
    pub page_flushes: AtomicUsize,
    pub full_flushes: AtomicUsize,
    pub delays: AtomicUsize,
}

impl MockMmOps {
    pub const fn new() -> Self {
        Self {
            page_flushes: AtomicUsize::new(0),
            full_flushes: AtomicUsize::new(0),
            delays: AtomicUsize::new(0),
        }
    }

    pub fn flush_tlb_page(&self, _vpn: usize) {
        self.page_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush_tlb_all(&self) {
        self.full_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// 测试中不真正等待，只计数
    pub fn delay_short(&self) {
        self.delays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn page_flush_count(&self) -> usize {
        self.page_flushes.load(Ordering::Relaxed)
    }

    pub fn full_flush_count(&self) -> usize {
        self.full_flushes.load(Ordering::Relaxed)
    }

    pub fn delay_count(&self) -> usize {
        self.delays.load(Ordering::Relaxed)
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_OPS: MockMmOps = MockMmOps::new();

/// Mock 的内存管理配置
pub struct MockMmConfig;

impl MockMmConfig {
    pub const fn new() -> Self {
        Self
    }

    pub fn page_size(&self) -> usize {
        4096
    }

    pub fn user_va_start(&self) -> usize {
        0x1000_0000
    }

    pub fn user_va_end(&self) -> usize {
        0x80_0000_0000
    }
}

/// 全局 Mock 实例
pub static MOCK_MM_CONFIG: MockMmConfig = MockMmConfig::new();

//! 内存管理配置
//!
//! 分为两层：
//! - [`MmConfig`]：平台常量（页大小、用户地址空间窗口），由 os crate 全局注册
//! - [`SectionConfig`]：段引擎的可调参数，随 [`MemoryManager`](crate::MemoryManager) 实例携带

use core::sync::atomic::{AtomicUsize, Ordering};

/// 内存管理平台常量
///
/// os crate 需要实现此 trait 并注册。
pub trait MmConfig: Send + Sync {
    /// 页大小（通常为 4096）
    fn page_size(&self) -> usize;

    /// 用户地址空间起始地址（含）
    fn user_va_start(&self) -> usize;

    /// 用户地址空间结束地址（不含）
    fn user_va_end(&self) -> usize;
}

static CONFIG_DATA: AtomicUsize = AtomicUsize::new(0);
static CONFIG_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册配置实现
///
/// # Safety
/// 必须在使用任何内存管理接口之前调用；重复注册时必须传入等价的实现
pub unsafe fn register_config(config: &'static dyn MmConfig) {
    let ptr = config as *const dyn MmConfig;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn MmConfig, (usize, usize)>(ptr) };
    CONFIG_VTABLE.store(vtable, Ordering::Release);
    CONFIG_DATA.store(data, Ordering::Release);
}

/// 获取已注册的配置实现
///
/// # Panics
/// 如果尚未调用 [`register_config`] 注册实现，则 panic
#[inline]
pub fn mm_config() -> &'static dyn MmConfig {
    let data = CONFIG_DATA.load(Ordering::Acquire);
    let vtable = CONFIG_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("mm: MmConfig not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn MmConfig>((data, vtable)) }
}

/// 段大小上限：16 PiB 减去一页
pub const MAXIMUM_SECTION_SIZE: u64 = (1u64 << 54) - 4096;

/// 默认分配片段：每个 Extent 最多 8192 个条目（64 KiB 的条目数组）
pub const DEFAULT_ALLOCATION_FRAGMENT: usize = 8192;

/// 分配片段的上限：2 MiB 的条目数组
pub const MAXIMUM_ALLOCATION_FRAGMENT: usize = 256 * 1024;

/// 重试策略
///
/// `max_attempts` 为 `None` 表示无限重试。每次失败后调用
/// [`ArchMmOps::delay_short`](crate::ArchMmOps::delay_short) 等待。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// 最多尝试 `attempts` 次
    pub const fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
        }
    }

    /// 一直重试直到成功
    pub const fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    /// 第 `attempt` 次（从 1 开始）失败之后是否还允许再试
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// 段引擎的可调参数
#[derive(Debug, Clone)]
pub struct SectionConfig {
    /// 单个 Extent 最多容纳的条目数
    pub allocation_fragment: usize,
    /// 条目数组的分配粒度，最后一块向上取整后的余量成为尾部预留容量
    pub entry_granularity: usize,
    /// 段的最大逻辑大小（字节）
    pub maximum_section_size: u64,
    /// 后备存储大小操作遇到锁冲突时的重试策略
    pub backing_store_retry: RetryPolicy,
    /// 清除时等待页面引用释放的重试策略
    pub purge_retry: RetryPolicy,
    /// 后台回收每一批最多处理的 Extent 数
    pub trim_batch: usize,
}

impl SectionConfig {
    /// 校正参数，使其落在允许范围内
    pub fn normalized(mut self) -> Self {
        self.allocation_fragment = self
            .allocation_fragment
            .clamp(1, MAXIMUM_ALLOCATION_FRAGMENT);
        self.entry_granularity = self.entry_granularity.clamp(1, self.allocation_fragment);
        // 只有链尾的 Extent 可以带预留容量，整块必须恰好是粒度的倍数
        self.allocation_fragment -= self.allocation_fragment % self.entry_granularity;
        self.maximum_section_size = self.maximum_section_size.min(MAXIMUM_SECTION_SIZE);
        self.trim_batch = self.trim_batch.max(1);
        self
    }
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            allocation_fragment: DEFAULT_ALLOCATION_FRAGMENT,
            // 一页能放下的 8 字节条目数
            entry_granularity: 512,
            maximum_section_size: MAXIMUM_SECTION_SIZE,
            backing_store_retry: RetryPolicy::bounded(3),
            purge_retry: RetryPolicy::unbounded(),
            trim_batch: 32,
        }
    }
}

//! 内存管理子系统
//!
//! 提供可增长的文件映射段：段的条目链、扩展、视图的映射与解除、清除和延迟回收，
//! 以及它们依赖的地址抽象、物理页帧数据库、分页池和页表接口。
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与架构特定组件解耦：
//! - [`ArchMmOps`]: TLB 刷新、重试等待
//! - [`MmConfig`]: 内存布局常量
//! - [`BackingStore`]: 段的后备存储
//!
//! 使用前必须调用 [`register_arch_ops`] 和 [`register_config`] 注册实现，
//! 并为 `sync` crate 注册其 `ArchOps`。

#![no_std]
#![feature(allocator_api)]

extern crate alloc;

mod arch_ops;
mod config;
mod file;
mod manager;

pub mod address;
pub mod frame_allocator;
pub mod memory_space;
pub mod page_table;
pub mod pool;
pub mod section;

pub use arch_ops::{arch_ops, register_arch_ops, ArchMmOps, TlbFlushList, FLUSH_LIST_CAPACITY};
pub use config::{
    mm_config, register_config, MmConfig, RetryPolicy, SectionConfig, DEFAULT_ALLOCATION_FRAGMENT,
    MAXIMUM_ALLOCATION_FRAGMENT, MAXIMUM_SECTION_SIZE,
};
pub use file::{BackingStore, BackingStoreError};
pub use manager::{MemoryManager, PfnState};

// Re-export 常用类型
pub use address::{PageNum, PageNumRange, Ppn, PpnRange, Vpn, VpnRange};
pub use frame_allocator::{FrameAllocator, PageFrame, PageList, PageOwner};
pub use memory_space::{MemorySpace, Process, View, ViewKind, ViewState};
pub use page_table::{PageTableInner, PagingError, PagingResult, Protection, RadixPageTable, TableEntry};
pub use pool::{PagedPool, PoolCharge};
pub use section::{
    extend_mapping, unmap_view, Classification, EntryCell, ExtendError, Extent, ExtentId, ExtentInfo,
    FaultError, MapError, Mapping, PurgeError, SectionAttributes, SectionRef, TranslationEntry,
    TrimOutcome, UnmapError,
};

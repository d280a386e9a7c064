//! 内存管理器实例
//!
//! [`MemoryManager`] 持有段引擎的全局状态：
//!
//! - 低层状态锁（[`SpinLock<PfnState>`]）：保护页帧数据库、各 Extent 的视图计数与分类、
//!   各段的视图计数与句柄计数，以及延迟回收队列。持有期间不得睡眠、不得调用后备存储。
//! - 分页池：段引擎所有内部分配的记账。
//! - 段引擎的可调参数。
//!
//! 锁顺序：进程地址空间锁 → 扩展锁 → 低层状态锁；低层状态锁之内不再获取其它锁。

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU64, Ordering};

use sync::{SpinLock, SpinLockGuard};

use crate::address::Ppn;
use crate::config::SectionConfig;
use crate::frame_allocator::{FrameAllocator, PageFrame, PageList};
use crate::pool::PagedPool;
use crate::section::{Extent, ExtentId, Mapping};

/// 延迟回收队列中的一项
pub(crate) struct UnusedExtent {
    pub(crate) mapping: Weak<Mapping>,
    pub(crate) extent: ExtentId,
}

/// 低层状态锁保护的数据
pub struct PfnState {
    pub(crate) frames: FrameAllocator,
    pub(crate) unused: VecDeque<UnusedExtent>,
}

impl PfnState {
    /// 若 Extent 满足回收条件且不在队列中，则追加到延迟回收队列尾部
    pub(crate) fn queue_unused(&mut self, mapping: &Weak<Mapping>, extent: &Extent) {
        if extent.reclaimable() && extent.mark_queued(self) {
            log::trace!("queue extent {:?} for reclamation", extent.id());
            self.unused.push_back(UnusedExtent {
                mapping: mapping.clone(),
                extent: extent.id(),
            });
        }
    }
}

/// 内存管理器
pub struct MemoryManager {
    config: SectionConfig,
    pool: Arc<PagedPool>,
    pfn: SpinLock<PfnState>,
    next_mapping_id: AtomicU64,
    next_process_id: AtomicU64,
}

impl MemoryManager {
    /// 创建管理器
    ///
    /// 管理从 `first_frame` 开始的 `frames` 个物理帧，分页池上限为 `pool_limit` 字节。
    pub fn new(
        config: SectionConfig,
        first_frame: Ppn,
        frames: usize,
        pool_limit: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: config.normalized(),
            pool: PagedPool::new(pool_limit),
            pfn: SpinLock::new(PfnState {
                frames: FrameAllocator::new(first_frame, frames),
                unused: VecDeque::new(),
            }),
            next_mapping_id: AtomicU64::new(1),
            next_process_id: AtomicU64::new(1),
        })
    }

    /// 段引擎的可调参数
    pub fn config(&self) -> &SectionConfig {
        &self.config
    }

    /// 分页池
    pub fn pool(&self) -> &Arc<PagedPool> {
        &self.pool
    }

    /// 获取低层状态锁
    pub(crate) fn lock_pfn(&self) -> SpinLockGuard<'_, PfnState> {
        self.pfn.lock()
    }

    pub(crate) fn allocate_mapping_id(&self) -> u64 {
        self.next_mapping_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn allocate_process_id(&self) -> u64 {
        self.next_process_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 分配一个页表页
    pub(crate) fn allocate_table_page(&self) -> Option<Ppn> {
        self.lock_pfn().frames.alloc_frame(PageList::PageTable)
    }

    /// 归还一个页表页
    pub(crate) fn free_table_page(&self, ppn: Ppn) {
        self.lock_pfn().frames.insert_free_page(ppn);
    }

    /// 为页增加一个外部引用（例如开始 I/O）
    pub fn reference_page(&self, ppn: Ppn) {
        self.lock_pfn().frames.reference_page(ppn);
    }

    /// 释放页的一个外部引用；返回页是否因此被释放
    pub fn dereference_page(&self, ppn: Ppn) -> bool {
        self.lock_pfn().frames.dereference_page(ppn)
    }

    /// 为页记录一个分页文件槽位
    pub fn assign_backing_space(&self, ppn: Ppn, slot: u64) {
        self.lock_pfn().frames.assign_backing_space(ppn, slot);
    }

    /// 页帧元数据的快照
    pub fn frame_info(&self, ppn: Ppn) -> PageFrame {
        *self.lock_pfn().frames.frame(ppn)
    }

    /// 空闲物理帧数
    pub fn free_frames(&self) -> usize {
        self.lock_pfn().frames.free_frames()
    }

    /// 指定链表中的物理帧数
    pub fn frames_on(&self, list: PageList) -> usize {
        self.lock_pfn().frames.count(list)
    }

    /// 占用中的分页文件槽位数
    pub fn backing_slots_in_use(&self) -> usize {
        self.lock_pfn().frames.backing_slots_in_use()
    }

    /// 延迟回收队列长度（含已失效的项）
    pub fn unused_queue_len(&self) -> usize {
        self.lock_pfn().unused.len()
    }
}

//! 帧分配器模块
//!
//! 物理帧的分配与每帧元数据（页帧数据库）。
//!
//! ## 分配策略（位图）
//!
//! - **bitmap**：每个 bit 表示一个物理帧（0=空闲，1=已分配）
//! - **last_alloc_hint**：上次分配位置提示，利用局部性加速查找
//!
//! ## 页帧状态
//!
//! 每个已分配的帧属于一个链表（[`PageList`]），并记录：
//!
//! - `share_count`：映射该帧的硬件页表项个数
//! - `reference_count`：进行中的 I/O 等外部引用
//! - `owner`：回指拥有该帧的段条目，清除/回收时据此校验
//!
//! 共享计数降为 0 时，干净页进入 Standby，脏页进入 Modified，
//! 条目仍保持 Transition 状态。已脱离拥有者的页（owner 为 None）
//! 在最后一个引用释放时自动归还空闲池。
//!
//! 分配器本身不加锁，由 [`MemoryManager`](crate::MemoryManager) 的低层状态锁保护。

use alloc::vec;
use alloc::vec::Vec;

use crate::address::{PageNum, Ppn};

// ============================================================================
// 页帧元数据
// ============================================================================

/// 帧当前所在的链表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageList {
    /// 空闲
    Free,
    /// 被至少一个页表项映射
    Active,
    /// 未映射、内容与后备存储一致
    Standby,
    /// 未映射、内容已修改，等待回写
    Modified,
    /// 已从拥有者脱离，等待最后的引用释放
    Unlinked,
    /// 进程页表页
    PageTable,
}

impl PageList {
    const COUNT: usize = 6;

    fn slot(self) -> usize {
        self as usize
    }
}

/// 帧回指的段条目位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOwner {
    /// 所属段的编号
    pub mapping: u64,
    /// 所属 Extent 的编号
    pub extent: u32,
    /// 条目在 Extent 数组中的下标
    pub index: usize,
}

/// 单个物理帧的元数据
#[derive(Debug, Clone, Copy)]
pub struct PageFrame {
    /// 所在链表
    pub list: PageList,
    /// 硬件映射个数
    pub share_count: u32,
    /// 外部引用（I/O）个数
    pub reference_count: u32,
    /// 内容相对后备存储已被修改
    pub modified: bool,
    /// 内容已被清除操作丢弃
    pub content_discarded: bool,
    /// 拥有者回指
    pub owner: Option<PageOwner>,
    /// 分页文件中的备份槽位
    pub backing_slot: Option<u64>,
}

impl PageFrame {
    const FREE: Self = Self {
        list: PageList::Free,
        share_count: 0,
        reference_count: 0,
        modified: false,
        content_discarded: false,
        owner: None,
        backing_slot: None,
    };
}

// ============================================================================
// FrameAllocator - 位图分配器 + 页帧数据库
// ============================================================================

/// 物理帧分配器。
pub struct FrameAllocator {
    /// 物理帧的起始 Ppn。
    start: Ppn,
    /// 位图数据（每个 bit 表示一个帧：0=空闲，1=已分配）。
    bitmap: Vec<u64>,
    /// 每帧元数据
    frames: Vec<PageFrame>,
    /// 总帧数。
    total_frames: usize,
    /// 已分配帧数（用于快速统计）。
    allocated_count: usize,
    /// 上次分配的位置提示（用于加速单帧分配）。
    last_alloc_hint: usize,
    /// 各链表中的帧数
    list_counts: [usize; PageList::COUNT],
    /// 占用中的分页文件槽位数
    backing_slots_in_use: usize,
}

impl FrameAllocator {
    /// 管理从 `start` 开始的 `total_frames` 个物理帧
    pub fn new(start: Ppn, total_frames: usize) -> Self {
        let mut list_counts = [0; PageList::COUNT];
        list_counts[PageList::Free.slot()] = total_frames;
        Self {
            start,
            bitmap: vec![0u64; total_frames.div_ceil(64)],
            frames: vec![PageFrame::FREE; total_frames],
            total_frames,
            allocated_count: 0,
            last_alloc_hint: 0,
            list_counts,
            backing_slots_in_use: 0,
        }
    }

    #[inline]
    fn index_of(&self, ppn: Ppn) -> usize {
        let idx = ppn.distance_from(self.start);
        assert!(idx < self.total_frames, "frame {} out of range", ppn);
        idx
    }

    #[inline]
    fn mark_allocated(&mut self, frame_idx: usize) {
        self.bitmap[frame_idx / 64] |= 1u64 << (frame_idx % 64);
    }

    #[inline]
    fn mark_free(&mut self, frame_idx: usize) {
        self.bitmap[frame_idx / 64] &= !(1u64 << (frame_idx % 64));
    }

    fn move_to(&mut self, idx: usize, list: PageList) {
        let old = self.frames[idx].list;
        self.list_counts[old.slot()] -= 1;
        self.list_counts[list.slot()] += 1;
        self.frames[idx].list = list;
    }

    /// 分配一个物理帧并放入 `list`。
    ///
    /// 从 last_alloc_hint 开始循环查找第一个空闲位。
    pub fn alloc_frame(&mut self, list: PageList) -> Option<Ppn> {
        debug_assert_ne!(list, PageList::Free);
        let words = self.bitmap.len();
        for offset in 0..words {
            let word_idx = (self.last_alloc_hint + offset) % words;
            let word = self.bitmap[word_idx];
            if word == u64::MAX {
                continue;
            }
            let frame_idx = word_idx * 64 + (!word).trailing_zeros() as usize;
            if frame_idx >= self.total_frames {
                continue;
            }
            self.mark_allocated(frame_idx);
            self.allocated_count += 1;
            self.last_alloc_hint = word_idx;
            self.frames[frame_idx] = PageFrame::FREE;
            self.move_to(frame_idx, list);
            return Some(self.start.add(frame_idx));
        }
        None
    }

    /// 帧的元数据
    pub fn frame(&self, ppn: Ppn) -> &PageFrame {
        &self.frames[self.index_of(ppn)]
    }

    /// 帧的可变元数据
    pub fn frame_mut(&mut self, ppn: Ppn) -> &mut PageFrame {
        let idx = self.index_of(ppn);
        &mut self.frames[idx]
    }

    /// 将帧归还空闲池
    ///
    /// 帧必须已经没有映射和引用，分页文件槽位必须已释放。
    pub fn insert_free_page(&mut self, ppn: Ppn) {
        let idx = self.index_of(ppn);
        let frame = &self.frames[idx];
        assert_ne!(frame.list, PageList::Free, "double free of {}", ppn);
        debug_assert_eq!(frame.share_count, 0);
        debug_assert_eq!(frame.reference_count, 0);
        debug_assert!(frame.backing_slot.is_none());
        self.move_to(idx, PageList::Free);
        self.frames[idx] = PageFrame::FREE;
        self.mark_free(idx);
        self.allocated_count -= 1;
    }

    /// 释放帧在分页文件中的槽位，返回是否确实释放了槽位
    pub fn release_backing_space_for_page(&mut self, ppn: Ppn) -> bool {
        let frame = self.frame_mut(ppn);
        if frame.backing_slot.take().is_some() {
            self.backing_slots_in_use -= 1;
            true
        } else {
            false
        }
    }

    /// 为帧记录一个分页文件槽位（由回写路径调用）
    pub fn assign_backing_space(&mut self, ppn: Ppn, slot: u64) {
        let frame = self.frame_mut(ppn);
        if frame.backing_slot.replace(slot).is_none() {
            self.backing_slots_in_use += 1;
        }
    }

    /// 增加一个外部引用（例如开始 I/O）
    pub fn reference_page(&mut self, ppn: Ppn) {
        let frame = self.frame_mut(ppn);
        assert_ne!(frame.list, PageList::Free, "reference to free page {}", ppn);
        frame.reference_count += 1;
    }

    /// 释放一个外部引用；已脱离拥有者且无人使用的帧在此归还空闲池。
    ///
    /// 返回帧是否被释放。
    pub fn dereference_page(&mut self, ppn: Ppn) -> bool {
        let frame = self.frame_mut(ppn);
        debug_assert!(frame.reference_count > 0);
        frame.reference_count -= 1;
        self.free_if_orphaned(ppn)
    }

    /// 增加一个硬件映射
    pub fn share_page(&mut self, ppn: Ppn) {
        let idx = self.index_of(ppn);
        self.frames[idx].share_count += 1;
        if self.frames[idx].list != PageList::Active {
            self.move_to(idx, PageList::Active);
        }
    }

    /// 移除一个硬件映射；`dirty` 为硬件脏位。
    ///
    /// 共享计数降为 0 时，按修改状态进入 Standby 或 Modified。
    pub fn unshare_page(&mut self, ppn: Ppn, dirty: bool) {
        let idx = self.index_of(ppn);
        let frame = &mut self.frames[idx];
        debug_assert!(frame.share_count > 0, "share count underflow on {}", ppn);
        frame.share_count -= 1;
        frame.modified |= dirty;
        if frame.share_count == 0 {
            let list = if frame.modified {
                PageList::Modified
            } else {
                PageList::Standby
            };
            if frame.owner.is_some() {
                self.move_to(idx, list);
            } else {
                self.move_to(idx, PageList::Unlinked);
                self.free_if_orphaned(ppn);
            }
        }
    }

    /// 把帧从拥有者和所在链表上摘下
    ///
    /// 之后帧只等待剩余引用释放；`discard` 表示其内容被丢弃。
    /// 已无人使用的帧立即归还空闲池，返回是否归还。
    pub fn unlink_page(&mut self, ppn: Ppn, discard: bool) -> bool {
        let idx = self.index_of(ppn);
        self.frames[idx].owner = None;
        self.frames[idx].content_discarded |= discard;
        if self.frames[idx].share_count == 0 {
            self.move_to(idx, PageList::Unlinked);
        }
        self.free_if_orphaned(ppn)
    }

    fn free_if_orphaned(&mut self, ppn: Ppn) -> bool {
        let frame = self.frame(ppn);
        if frame.owner.is_none()
            && frame.share_count == 0
            && frame.reference_count == 0
            && frame.list == PageList::Unlinked
        {
            self.release_backing_space_for_page(ppn);
            self.insert_free_page(ppn);
            true
        } else {
            false
        }
    }

    /// 指定链表中的帧数
    pub fn count(&self, list: PageList) -> usize {
        self.list_counts[list.slot()]
    }

    /// 获取总的物理帧数
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// 获取已分配的帧数
    pub fn allocated_frames(&self) -> usize {
        self.allocated_count
    }

    /// 获取空闲的帧数
    pub fn free_frames(&self) -> usize {
        self.total_frames - self.allocated_count
    }

    /// 占用中的分页文件槽位数
    pub fn backing_slots_in_use(&self) -> usize {
        self.backing_slots_in_use
    }
}

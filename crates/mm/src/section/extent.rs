//! Extent：段条目链上的一个节点
//!
//! 每个 Extent 覆盖后备存储中一段连续的页，持有这些页的条目数组。
//! 条目数组可以按需分配，也可以在没有视图引用时被后台回收；
//! Extent 节点本身在段销毁之前一直存在。
//!
//! 计数与分类只在低层状态锁下修改，相关方法要求传入 [`PfnState`] 作为持锁凭证。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Range;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicIsize, AtomicPtr, AtomicU8, AtomicU32, AtomicUsize, Ordering};

use bitflags::bitflags;

use super::entry::{EntryCell, TranslationEntry};
use super::error::StillReferenced;
use crate::manager::PfnState;
use crate::page_table::Protection;
use crate::pool::{PagedPool, PoolCharge};

/// Extent 在所属段中的编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtentId(pub(crate) u32);

impl ExtentId {
    /// 链头
    pub const HEAD: ExtentId = ExtentId(0);

    /// 编号数值
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 回收分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Classification {
    /// 可能被尚未计数的视图访问，条目数组不得回收
    Static = 0,
    /// 活动视图计数准确，计数为 0 时可以回收条目数组
    Dynamic = 1,
}

bitflags! {
    /// Extent 属性
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExtentFlags: u8 {
        /// 内容为全局共享，清除段时需要重置
        const GLOBAL_MEMORY = 1 << 0;
    }
}

/// 一个 Extent 的快照，供调试与测试观察
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentInfo {
    /// 编号
    pub id: ExtentId,
    /// 计入段的条目数
    pub capacity: usize,
    /// 有数据支撑的页数
    pub occupied: usize,
    /// 尾部预留但尚未计入的条目数
    pub unused: usize,
    /// 覆盖的后备存储页区间
    pub sector_range: Range<u64>,
    /// 回收分类
    pub classification: Classification,
    /// 活动视图计数
    pub active_views: isize,
    /// 条目数组是否存在
    pub has_entries: bool,
}

/// 条目数组及其池记账
pub(crate) struct EntryArray {
    cells: Box<[EntryCell]>,
    _charge: PoolCharge,
}

/// 段条目链上的一个节点
pub struct Extent {
    id: ExtentId,
    /// 条目数组的槽位数（capacity + unused）
    slots: usize,
    backing_start: u64,
    flags: ExtentFlags,
    protection: Protection,
    capacity: AtomicUsize,
    occupied: AtomicUsize,
    classification: AtomicU8,
    active_views: AtomicIsize,
    /// 已在延迟回收队列中
    queued: AtomicBool,
    /// 最近被引用或访问过，回收时给予一次豁免
    accessed: AtomicBool,
    entries: AtomicPtr<EntryArray>,
    /// 下一个 Extent 的编号加一，0 表示链尾
    next: AtomicU32,
    _charge: PoolCharge,
}

impl Extent {
    /// 在池中分配一个新节点；条目数组不随之分配
    pub(crate) fn try_new(
        pool: &Arc<PagedPool>,
        id: ExtentId,
        slots: usize,
        capacity: usize,
        backing_start: u64,
        flags: ExtentFlags,
        protection: Protection,
    ) -> Option<Box<Self>> {
        debug_assert!(capacity <= slots);
        let charge = pool.charge(size_of::<Self>())?;
        Box::try_new(Self {
            id,
            slots,
            backing_start,
            flags,
            protection,
            capacity: AtomicUsize::new(capacity),
            occupied: AtomicUsize::new(capacity),
            classification: AtomicU8::new(Classification::Dynamic as u8),
            active_views: AtomicIsize::new(0),
            queued: AtomicBool::new(false),
            accessed: AtomicBool::new(false),
            entries: AtomicPtr::new(ptr::null_mut()),
            next: AtomicU32::new(0),
            _charge: charge,
        })
        .ok()
    }

    /// 编号
    pub fn id(&self) -> ExtentId {
        self.id
    }

    /// 计入段的条目数
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// 有数据支撑的页数，其余部分按需清零
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    /// 条目数组的槽位数
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// 尾部预留但尚未计入段的条目数
    pub fn unused(&self) -> usize {
        self.slots - self.capacity()
    }

    /// 覆盖的后备存储页区间
    pub fn sector_range(&self) -> Range<u64> {
        self.backing_start..self.backing_start + self.capacity() as u64
    }

    /// 第一页在后备存储中的页偏移
    pub fn backing_start(&self) -> u64 {
        self.backing_start
    }

    /// 属性
    pub fn flags(&self) -> ExtentFlags {
        self.flags
    }

    /// 回收分类
    pub fn classification(&self) -> Classification {
        match self.classification.load(Ordering::Acquire) {
            0 => Classification::Static,
            _ => Classification::Dynamic,
        }
    }

    /// 活动视图计数；Static 的 Extent 可能为负
    pub fn active_views(&self) -> isize {
        self.active_views.load(Ordering::Acquire)
    }

    /// 下一个 Extent
    pub fn next(&self) -> Option<ExtentId> {
        match self.next.load(Ordering::Acquire) {
            0 => None,
            n => Some(ExtentId(n - 1)),
        }
    }

    /// 条目数组是否存在
    pub fn has_entries(&self) -> bool {
        !self.entries.load(Ordering::Acquire).is_null()
    }

    /// 快照
    pub fn info(&self) -> ExtentInfo {
        ExtentInfo {
            id: self.id,
            capacity: self.capacity(),
            occupied: self.occupied(),
            unused: self.unused(),
            sector_range: self.sector_range(),
            classification: self.classification(),
            active_views: self.active_views(),
            has_entries: self.has_entries(),
        }
    }

    /// 新分配数组时使用的模板：映射到后备存储、尚未驻留
    pub(crate) fn fill_template(&self, index: usize) -> TranslationEntry {
        TranslationEntry::MappedAtOffset {
            page: self.backing_start + index as u64,
            protection: self.protection,
        }
    }

    /// 清除时恢复的值：数据区内映射到后备存储，之外按需清零
    pub(crate) fn purge_template(&self, index: usize) -> TranslationEntry {
        if index < self.occupied() {
            self.fill_template(index)
        } else {
            TranslationEntry::DemandZero {
                protection: self.protection,
            }
        }
    }

    /// 在池中分配并按模板初始化一个完整的条目数组
    pub(crate) fn allocate_entries(&self, pool: &Arc<PagedPool>) -> Option<Box<EntryArray>> {
        let charge = pool.charge(self.slots * size_of::<EntryCell>() + size_of::<EntryArray>())?;
        let mut cells = Vec::new();
        cells.try_reserve_exact(self.slots).ok()?;
        cells.extend((0..self.slots).map(|i| EntryCell::new(self.fill_template(i))));
        Box::try_new(EntryArray {
            cells: cells.into_boxed_slice(),
            _charge: charge,
        })
        .ok()
    }

    /// 安装条目数组；已有数组时原样退回
    pub(crate) fn install_entries(&self, array: Box<EntryArray>) -> Result<(), Box<EntryArray>> {
        debug_assert_eq!(array.cells.len(), self.slots);
        let raw = Box::into_raw(array);
        self.entries
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            // SAFETY: 安装失败时 raw 仍归我们所有
            .map_err(|_| unsafe { Box::from_raw(raw) })
    }

    /// 取下条目数组，由调用者在锁外释放
    pub(crate) fn take_entries(&self, _pfn: &mut PfnState) -> Option<Box<EntryArray>> {
        debug_assert!(
            self.classification() == Classification::Dynamic && self.active_views() == 0,
            "releasing entries of a referenced extent"
        );
        let raw = self.entries.swap(ptr::null_mut(), Ordering::AcqRel);
        // SAFETY: raw 来自 install_entries 中的 Box::into_raw
        (!raw.is_null()).then(|| unsafe { Box::from_raw(raw) })
    }

    /// 条目数组
    ///
    /// # Safety
    /// 调用者必须保证返回的引用存活期间数组不会被回收：持有低层状态锁、
    /// 持有本 Extent 的一个视图计数、Extent 为 Static，或独占整个段。
    pub(crate) unsafe fn entries(&self) -> Option<&[EntryCell]> {
        let raw = self.entries.load(Ordering::Acquire);
        // SAFETY: 由调用者保证数组存活
        (!raw.is_null()).then(|| unsafe { &*(*raw).cells })
    }

    /// 链接下一个 Extent；发布屏障由调用者负责
    pub(crate) fn link_next(&self, next: ExtentId) {
        self.next.store(next.0 + 1, Ordering::Release);
    }

    /// 把尾部预留容量计入段
    pub(crate) fn absorb_unused(&self, count: usize, _pfn: &PfnState) {
        let capacity = self.capacity() + count;
        assert!(capacity <= self.slots, "extent {:?} over-absorbed", self.id);
        self.capacity.store(capacity, Ordering::Release);
    }

    /// 根据后备数据页数更新 occupied
    pub(crate) fn update_occupied(&self, data_pages: u64) {
        let backed = data_pages.saturating_sub(self.backing_start);
        let occupied = (backed.min(self.capacity() as u64)) as usize;
        self.occupied.store(occupied, Ordering::Release);
    }

    pub(crate) fn set_classification(&self, classification: Classification, _pfn: &PfnState) {
        self.classification
            .store(classification as u8, Ordering::Release);
    }

    /// 增加一个视图计数，并把 Extent 从延迟回收队列中撤回
    pub(crate) fn add_view(&self, _pfn: &PfnState) {
        self.active_views.fetch_add(1, Ordering::AcqRel);
        self.queued.store(false, Ordering::Release);
        self.accessed.store(true, Ordering::Release);
    }

    /// 减少一个视图计数并返回新值
    pub(crate) fn remove_view(&self, _pfn: &PfnState) -> isize {
        let remaining = self.active_views.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(
            remaining >= 0 || self.classification() == Classification::Static,
            "view count underflow on dynamic extent {:?}",
            self.id
        );
        remaining
    }

    /// 是否应当放入延迟回收队列
    pub(crate) fn reclaimable(&self) -> bool {
        self.classification() == Classification::Dynamic
            && self.active_views() == 0
            && self.has_entries()
    }

    /// 标记为已入队；已在队列中时返回 false
    pub(crate) fn mark_queued(&self, _pfn: &PfnState) -> bool {
        !self.queued.swap(true, Ordering::AcqRel)
    }

    /// 从队列弹出时清除入队标记；返回它是否仍是有效的队列成员
    pub(crate) fn take_queued(&self, _pfn: &PfnState) -> bool {
        self.queued.swap(false, Ordering::AcqRel)
    }

    /// 记录一次访问
    pub(crate) fn touch(&self) {
        self.accessed.store(true, Ordering::Release);
    }

    /// 读取并清除访问标记
    pub(crate) fn take_accessed(&self, _pfn: &PfnState) -> bool {
        self.accessed.swap(false, Ordering::AcqRel)
    }

    /// 把 Static 的 Extent 转为 Dynamic
    ///
    /// 只有当前没有任何视图计数时才能转换；Static 期间累积的负计数被清零。
    pub fn convert_to_dynamic(&self, _pfn: &PfnState) -> Result<(), StillReferenced> {
        let active_views = self.active_views();
        if active_views > 0 {
            return Err(StillReferenced { active_views });
        }
        self.active_views.store(0, Ordering::Release);
        self.classification
            .store(Classification::Dynamic as u8, Ordering::Release);
        Ok(())
    }
}

impl Drop for Extent {
    fn drop(&mut self) {
        let raw = *self.entries.get_mut();
        if !raw.is_null() {
            // SAFETY: 独占访问，raw 来自 Box::into_raw
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

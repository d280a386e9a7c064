//! 视图：段在某个进程地址空间中的一次映射

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::address::{PageNum, Vpn, VpnRange};
use crate::page_table::Protection;
use crate::section::{EntryCell, EntryRef, Extent, ExtentId, Mapping};

/// 视图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// 普通视图
    Normal,
    /// 受保护视图：只能随进程退出解除，不能手动解除
    Secured,
}

/// 视图生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ViewState {
    /// 正常使用中
    Active = 0,
    /// 正在解除
    Unmapping = 1,
    /// 已解除
    Released = 2,
}

/// 段在进程地址空间中的一次映射
///
/// 视图不拥有任何 Extent，只持有段的共享引用和第一个条目的位置。
pub struct View {
    range: VpnRange,
    first: EntryRef,
    mapping: Arc<Mapping>,
    owner: u64,
    protection: Protection,
    kind: ViewKind,
    state: AtomicU8,
}

impl View {
    pub(crate) fn new(
        range: VpnRange,
        first: EntryRef,
        mapping: Arc<Mapping>,
        owner: u64,
        protection: Protection,
        kind: ViewKind,
    ) -> Self {
        Self {
            range,
            first,
            mapping,
            owner,
            protection,
            kind,
            state: AtomicU8::new(ViewState::Active as u8),
        }
    }

    /// 虚拟页区间
    pub fn range(&self) -> VpnRange {
        self.range
    }

    /// 起始虚拟地址
    pub fn start_address(&self) -> usize {
        self.range.start.start_addr()
    }

    /// 第一个条目的位置
    pub fn first_entry(&self) -> EntryRef {
        self.first
    }

    /// 映射的段
    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    /// 所属进程编号
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// 保护属性
    pub fn protection(&self) -> Protection {
        self.protection
    }

    /// 类型
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// 当前状态
    pub fn state(&self) -> ViewState {
        match self.state.load(Ordering::Acquire) {
            0 => ViewState::Active,
            1 => ViewState::Unmapping,
            _ => ViewState::Released,
        }
    }

    /// Active -> Unmapping；已在解除或已解除时返回 false
    pub(crate) fn begin_unmap(&self) -> bool {
        self.state
            .compare_exchange(
                ViewState::Active as u8,
                ViewState::Unmapping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish_unmap(&self) {
        let prev = self.state.swap(ViewState::Released as u8, Ordering::AcqRel);
        debug_assert_eq!(prev, ViewState::Unmapping as u8);
    }

    /// `vpn` 对应的 Extent 与其中的下标；不加锁
    pub fn locate(&self, vpn: Vpn) -> Option<(&Extent, usize)> {
        if !self.range.contains(vpn) {
            return None;
        }
        let offset = vpn.distance_from(self.range.start) as u64;
        self.mapping
            .chain()
            .locate_from(self.first.extent, self.first.index, offset)
    }

    /// 查找 `vpn` 对应的段条目，供缺页处理使用
    ///
    /// 不加锁。偏移越过链尾或视图范围时返回 `None`。
    pub fn locate_entry(&self, vpn: Vpn) -> Option<&EntryCell> {
        let (extent, index) = self.locate(vpn)?;
        // SAFETY: 视图存活期间，范围内的 Extent 要么持有本视图的计数，
        // 要么是在视图存在时追加的 Static 节点，条目数组都不会被回收
        unsafe { extent.entries() }?.get(index)
    }

    /// 视图覆盖的第一个和最后一个 Extent
    ///
    /// 最后一页越过链尾时取链尾。
    pub(crate) fn extent_span(&self) -> (ExtentId, ExtentId) {
        let chain = self.mapping.chain();
        let pages = self.range.len() as u64;
        let last = match chain.locate_from(self.first.extent, self.first.index, pages - 1) {
            Some((extent, _)) => extent.id(),
            None => chain.tail_from(self.first.extent).id(),
        };
        (self.first.extent, last)
    }
}

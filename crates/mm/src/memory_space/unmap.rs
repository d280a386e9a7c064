//! 解除视图
//!
//! 顺序固定：先在地址空间锁下拆除页表（释放共享计数、逐级回收空页表页、刷新地址转换缓存）
//! 并归还虚拟区间，然后才减少 Extent 与段的视图计数。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use super::space::{MemorySpace, Process};
use super::view::{View, ViewKind, ViewState};
use crate::address::{PageNum, Ppn, Vpn, VpnRange};
use crate::arch_ops::TlbFlushList;
use crate::page_table::{PageTableInner, TableEntry};
use crate::section::UnmapError;

impl<PT: PageTableInner> Process<PT> {
    /// 解除一个视图
    pub fn unmap_view(&self, view: &View) -> Result<(), UnmapError> {
        if self.is_terminating() {
            return Err(UnmapError::ProcessTerminating);
        }
        let removed = {
            let mut space = self.space.lock();
            if view.owner() != self.id() || view.state() != ViewState::Active {
                return Err(UnmapError::NotMapped);
            }
            if view.kind() == ViewKind::Secured {
                return Err(UnmapError::AccessDenied);
            }
            if !view.begin_unmap() {
                return Err(UnmapError::NotMapped);
            }
            self.delete_translations(&mut space, view.range());
            space.free_virtual_range(view.range().start)
        };
        debug_assert!(removed.as_ref().is_some_and(|r| core::ptr::eq(Arc::as_ptr(r), view)));
        self.release_counts(view);
        Ok(())
    }

    /// 解除包含 `address` 的视图
    pub fn unmap_view_at(&self, address: usize) -> Result<(), UnmapError> {
        if self.is_terminating() {
            return Err(UnmapError::ProcessTerminating);
        }
        let view = self.find_view(address).ok_or(UnmapError::NotMapped)?;
        self.unmap_view(&view)
    }

    /// 进程退出：标记为正在退出并解除全部视图，包括受保护视图
    ///
    /// 之后的手动解除返回 [`UnmapError::ProcessTerminating`]。
    pub fn terminate(&self) {
        if self.terminating.swap(true, Ordering::AcqRel) {
            return;
        }
        let views: Vec<Arc<View>> = {
            let mut space = self.space.lock();
            let views = space.take_views();
            for view in views.values() {
                if view.begin_unmap() {
                    self.delete_translations(&mut space, view.range());
                }
            }
            views.into_values().collect()
        };
        log::debug!("process {}: terminated, {} views released", self.id(), views.len());
        for view in &views {
            if view.state() == ViewState::Unmapping {
                self.release_counts(view);
            }
        }
    }

    /// 页表已拆除之后：减少 Extent 计数和段的视图计数
    fn release_counts(&self, view: &View) {
        let (first, last) = view.extent_span();
        view.mapping().decrement_extents(first, last);
        view.mapping().dereference_view();
        view.finish_unmap();
    }

    /// 拆除 `range` 的地址转换
    fn delete_translations(&self, space: &mut MemorySpace<PT>, range: VpnRange) {
        let page_table = space.page_table_mut();
        let mut flush = TlbFlushList::new();
        let mut pages: Vec<(Ppn, bool)> = Vec::new();
        for vpn in range.iter() {
            match page_table.delete_table_entry(vpn, 0) {
                Ok(TableEntry::Page { ppn, dirty, .. }) => {
                    pages.push((ppn, dirty));
                    flush.push(vpn);
                }
                Ok(TableEntry::Table { .. }) => panic!("leaf slot for {} holds a table", vpn),
                Err(_) => {}
            }
        }

        // 自底向上回收空页表页，根页表保留；范围内没有叶子页时也要扫一遍
        let mut tables = Vec::new();
        for level in 1..PT::LEVELS {
            let span = PT::pages_per_entry(level);
            let mut vpn = Vpn::from_usize(range.start.as_usize() / span * span);
            while vpn < range.end {
                if page_table.used_entries(vpn, level - 1) == Some(0) {
                    if let Ok(TableEntry::Table { ppn }) = page_table.delete_table_entry(vpn, level) {
                        tables.push(ppn);
                    }
                }
                vpn = vpn.add(span);
            }
        }

        // 刷新之后才能释放页和页表页
        page_table.flush_translation_cache(&mut flush);
        let mut pfn = self.mm.lock_pfn();
        for (ppn, dirty) in pages {
            pfn.frames.unshare_page(ppn, dirty);
        }
        for ppn in tables {
            pfn.frames.insert_free_page(ppn);
        }
    }
}

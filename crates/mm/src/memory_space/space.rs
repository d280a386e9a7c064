//! 内存空间核心实现

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use sync::SleepLock;

use super::view::View;
use crate::address::{PageNum, Ppn, Vpn, VpnRange};
use crate::manager::MemoryManager;
use crate::mm_config;
use crate::page_table::PageTableInner;
use crate::section::MapError;

/// 进程的地址空间：页表和按起始页索引的视图
pub struct MemorySpace<PT: PageTableInner> {
    /// 与此内存空间关联的页表
    page_table: PT,

    /// 视图，按起始 VPN 排序
    views: BTreeMap<Vpn, Arc<View>>,

    /// 可分配的虚拟页窗口
    window: VpnRange,
}

impl<PT: PageTableInner> MemorySpace<PT> {
    /// 创建一个只有根页表的空内存空间
    pub fn new(page_table: PT, window: VpnRange) -> Self {
        MemorySpace {
            page_table,
            views: BTreeMap::new(),
            window,
        }
    }

    /// 返回页表的引用
    pub fn page_table(&self) -> &PT {
        &self.page_table
    }

    /// 返回页表的可变引用
    pub fn page_table_mut(&mut self) -> &mut PT {
        &mut self.page_table
    }

    /// 返回根页表的物理页号 (PPN)
    pub fn root_ppn(&self) -> Ppn {
        self.page_table.root_ppn()
    }

    /// 所有视图
    pub fn views(&self) -> impl Iterator<Item = &Arc<View>> {
        self.views.values()
    }

    /// 查找包含给定 VPN 的视图
    pub fn find_view(&self, vpn: Vpn) -> Option<&Arc<View>> {
        self.views
            .range(..=vpn)
            .next_back()
            .map(|(_, view)| view)
            .filter(|view| view.range().contains(vpn))
    }

    /// 在窗口内查找 `pages` 页的空闲虚拟区间
    pub fn allocate_virtual_range(&self, pages: usize) -> Option<VpnRange> {
        if pages == 0 {
            return None;
        }
        let mut current = self.window.start;
        for view in self.views.values() {
            let range = view.range();
            if range.start.as_usize() >= current.as_usize() + pages {
                break;
            }
            if range.end > current {
                current = range.end;
            }
        }
        let end = current.as_usize().checked_add(pages)?;
        (end <= self.window.end.as_usize()).then(|| VpnRange::new(current, Vpn::from_usize(end)))
    }

    /// 插入视图，其区间必须来自 [`allocate_virtual_range`](Self::allocate_virtual_range)
    pub(crate) fn insert_view(&mut self, view: Arc<View>) {
        let start = view.range().start;
        let old = self.views.insert(start, view);
        debug_assert!(old.is_none(), "virtual range at {} already in use", start);
    }

    /// 移除以 `start` 开头的视图，归还其虚拟区间
    pub(crate) fn free_virtual_range(&mut self, start: Vpn) -> Option<Arc<View>> {
        self.views.remove(&start)
    }

    pub(crate) fn take_views(&mut self) -> BTreeMap<Vpn, Arc<View>> {
        core::mem::take(&mut self.views)
    }
}

/// 一个进程：地址空间加上退出标志
pub struct Process<PT: PageTableInner> {
    id: u64,
    pub(super) mm: Arc<MemoryManager>,
    pub(super) space: SleepLock<MemorySpace<PT>>,
    pub(super) terminating: AtomicBool,
}

impl<PT: PageTableInner> Process<PT> {
    /// 创建进程，根页表页从物理页分配器取得
    ///
    /// `build` 以根页表页的 PPN 构造具体的页表。
    pub fn new(mm: &Arc<MemoryManager>, build: impl FnOnce(Ppn) -> PT) -> Result<Self, MapError> {
        let root = mm
            .allocate_table_page()
            .ok_or(MapError::InsufficientResources)?;
        let config = mm_config();
        let window = VpnRange::new(
            Vpn::from_addr_ceil(config.user_va_start()),
            Vpn::from_addr_floor(config.user_va_end()),
        );
        Ok(Self {
            id: mm.allocate_process_id(),
            mm: mm.clone(),
            space: SleepLock::new(MemorySpace::new(build(root), window)),
            terminating: AtomicBool::new(false),
        })
    }

    /// 进程编号
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 是否正在退出
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// 地址空间
    pub fn space(&self) -> &SleepLock<MemorySpace<PT>> {
        &self.space
    }

    /// 包含 `address` 的视图
    pub fn find_view(&self, address: usize) -> Option<Arc<View>> {
        self.space
            .lock()
            .find_view(Vpn::from_addr_floor(address))
            .cloned()
    }
}

impl<PT: PageTableInner> Drop for Process<PT> {
    fn drop(&mut self) {
        self.terminate();
        let tables = self.space.get_mut().page_table().table_pages();
        let mut pfn = self.mm.lock_pfn();
        for ppn in tables {
            pfn.frames.insert_free_page(ppn);
        }
    }
}

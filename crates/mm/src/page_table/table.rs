//! 页表内部接口
//!
//! 上层（[`MemorySpace`](crate::memory_space::MemorySpace) 与视图拆除逻辑）只依赖该 trait，
//! 具体的表格式由架构实现。层级约定：
//!
//! - level 0：叶子页表中的表项，映射一个物理页
//! - level k (k >= 1)：第 k 级页表中的表项，指向第 k-1 级页表页
//! - 根页表位于 level `LEVELS - 1`

use alloc::vec::Vec;

use super::{PagingResult, Protection, TableEntry};
use crate::address::{Ppn, Vpn};
use crate::arch_ops::TlbFlushList;

/// 页表内部接口
pub trait PageTableInner: Send {
    /// 页表级数
    const LEVELS: usize;
    /// 每个页表页的表项数
    const ENTRIES_PER_TABLE: usize;

    /// 根页表的 PPN
    fn root_ppn(&self) -> Ppn;

    /// 读取 `vpn` 在 `level` 级的表项；所在页表不存在或表项为空时返回 `None`
    fn get_table_entry(&self, vpn: Vpn, level: usize) -> Option<TableEntry>;

    /// 清除 `vpn` 在 `level` 级的表项并返回旧值
    ///
    /// 删除中间表项（`level >= 1`）要求其指向的页表页已经为空，
    /// 被删除的页表页由调用者归还给物理页分配器。
    fn delete_table_entry(&mut self, vpn: Vpn, level: usize) -> PagingResult<TableEntry>;

    /// 覆盖 `vpn` 的 `level` 级表项所在页表页中的有效表项数；页表页不存在时返回 `None`
    fn used_entries(&self, vpn: Vpn, level: usize) -> Option<usize>;

    /// 映射一个叶子页，缺失的中间页表页通过 `alloc_table` 分配
    ///
    /// 失败时页表不变，已分配的页表页通过 `free_table` 归还。
    fn map_page(
        &mut self,
        vpn: Vpn,
        ppn: Ppn,
        protection: Protection,
        dirty: bool,
        alloc_table: &mut dyn FnMut() -> Option<Ppn>,
        free_table: &mut dyn FnMut(Ppn),
    ) -> PagingResult<()>;

    /// 所有页表页（含根）占用的物理页
    fn table_pages(&self) -> Vec<Ppn>;

    /// 置位叶子表项的脏位
    fn set_dirty(&mut self, vpn: Vpn) -> PagingResult<()>;

    /// 刷新刷新列表中记录的地址转换缓存
    fn flush_translation_cache(&self, flush: &mut TlbFlushList) {
        flush.flush();
    }

    /// `level` 级的一个表项覆盖的虚拟页数
    fn pages_per_entry(level: usize) -> usize {
        Self::ENTRIES_PER_TABLE.pow(level as u32)
    }
}

//! 段清除
//!
//! 把内容为全局共享的 Extent 的每个条目恢复为由后备存储推导出的值：
//! 数据区内为 `MappedAtOffset`，之外为 `DemandZero`。驻留页从拥有者上摘下，
//! 修改过的标记为内容已丢弃；仍有 I/O 引用的页按策略短暂等待后重试同一个条目，
//! 等待次数耗尽时页面脱离段漂浮，直到最后的引用释放。

use core::sync::atomic::Ordering;

use super::entry::{EntryCell, TranslationEntry};
use super::error::PurgeError;
use super::extent::{Extent, ExtentFlags};
use super::mapping::{Mapping, SectionRef, SectionAttributes};
use crate::arch_ops::arch_ops;

impl SectionRef {
    /// 清除段内容
    ///
    /// 只有在没有视图、且除调用者的句柄外没有其它句柄时才允许。
    /// 清除期间新的视图映射返回 [`MapError::SectionBusy`](super::MapError::SectionBusy)。
    pub fn purge(&self) -> Result<(), PurgeError> {
        let _extend = self.extend_lock.lock();
        {
            let pfn = self.manager().lock_pfn();
            if self.has_other_users(&pfn) {
                return Err(PurgeError::InUse);
            }
            self.purging.store(true, Ordering::Release);
        }
        self.purge_contents();
        let _pfn = self.manager().lock_pfn();
        self.purging.store(false, Ordering::Release);
        Ok(())
    }
}

impl Mapping {
    /// 清除全部全局共享内容，调用者持有扩展锁且段上没有视图
    pub(super) fn purge_contents(&self) {
        self.was_purged.store(true, Ordering::Release);
        if !self.attributes().contains(SectionAttributes::GLOBAL_MEMORY) {
            return;
        }
        let mut reset = 0;
        for extent in self.chain.iter() {
            if extent.flags().contains(ExtentFlags::GLOBAL_MEMORY) {
                reset += self.purge_extent(extent);
            }
        }
        log::debug!("section {}: purged, {} resident pages released", self.id(), reset);
    }

    /// 清除一个 Extent，返回摘下的驻留页数
    fn purge_extent(&self, extent: &Extent) -> usize {
        // 清除期间持有一个视图计数，防止条目数组被后台回收
        {
            let pfn = self.manager().lock_pfn();
            if !extent.has_entries() {
                return 0;
            }
            extent.add_view(&pfn);
        }

        let mut released = 0;
        // SAFETY: 上面的视图计数保证数组存活
        if let Some(entries) = unsafe { extent.entries() } {
            for (index, cell) in entries.iter().enumerate() {
                if self.purge_entry(extent, index, cell) {
                    released += 1;
                }
            }
        }

        let mut pfn = self.manager().lock_pfn();
        extent.remove_view(&pfn);
        pfn.queue_unused(self.weak(), extent);
        released
    }

    /// 恢复一个条目；条目原来驻留时返回 true
    fn purge_entry(&self, extent: &Extent, index: usize, cell: &EntryCell) -> bool {
        let policy = self.manager().config().purge_retry;
        let mut attempt = 1;
        loop {
            let mut pfn = self.manager().lock_pfn();
            let TranslationEntry::Transition { ppn, .. } = cell.load() else {
                cell.store(extent.purge_template(index));
                return false;
            };
            self.check_owner(&pfn, ppn, extent.id(), index);

            let frame = *pfn.frames.frame(ppn);
            debug_assert_eq!(frame.share_count, 0, "purging a mapped page {}", ppn);
            if frame.reference_count > 0 {
                if policy.allows_retry_after(attempt) {
                    drop(pfn);
                    arch_ops().delay_short();
                    attempt += 1;
                    continue;
                }
                log::warn!(
                    "section {}: page {} still referenced after {} waits, leaving it afloat",
                    self.id(),
                    ppn,
                    attempt
                );
            }
            pfn.frames.unlink_page(ppn, frame.modified);
            cell.store(extent.purge_template(index));
            return true;
        }
    }
}

//! 延迟回收
//!
//! 视图计数归零的 Dynamic Extent 进入延迟回收队列，由周期性的回收过程分小批处理：
//! 失效或重新被引用的项直接跳过；最近访问过的给一次豁免重新排队；
//! 仍有修改页或 I/O 引用的重新排队；其余的干净驻留页归还空闲池，条目数组释放。

use alloc::boxed::Box;

use super::entry::TranslationEntry;
use super::extent::{EntryArray, ExtentId};
use super::mapping::Mapping;
use crate::manager::MemoryManager;

/// 一次回收过程的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrimOutcome {
    /// 释放了条目数组的 Extent 数
    pub released: usize,
    /// 重新排队的 Extent 数
    pub requeued: usize,
    /// 跳过的失效项数
    pub skipped: usize,
    /// 归还空闲池的驻留页数
    pub pages_freed: usize,
}

enum Verdict {
    Skip,
    Requeue,
    Release(Option<Box<EntryArray>>, usize),
}

impl MemoryManager {
    /// 处理延迟回收队列中最多 `budget` 项
    ///
    /// 本次重新排队的项不会在同一次过程中再被处理。
    pub fn trim_unused_extents(&self, budget: usize) -> TrimOutcome {
        let mut outcome = TrimOutcome::default();
        let pending = self.lock_pfn().unused.len();
        for _ in 0..budget.min(pending) {
            let Some(item) = self.lock_pfn().unused.pop_front() else {
                break;
            };
            // 段可能已经销毁；升级得到的引用在锁外释放
            let Some(mapping) = item.mapping.upgrade() else {
                outcome.skipped += 1;
                continue;
            };
            match mapping.trim_extent(item.extent) {
                Verdict::Skip => outcome.skipped += 1,
                Verdict::Requeue => outcome.requeued += 1,
                Verdict::Release(array, pages) => {
                    drop(array);
                    outcome.released += 1;
                    outcome.pages_freed += pages;
                }
            }
        }
        if outcome.released > 0 {
            log::debug!("trim: {:?}", outcome);
        }
        outcome
    }

    /// 按配置的批大小执行一次回收过程
    pub fn trim(&self) -> TrimOutcome {
        self.trim_unused_extents(self.config().trim_batch)
    }
}

impl Mapping {
    fn trim_extent(&self, id: ExtentId) -> Verdict {
        let mut pfn = self.manager().lock_pfn();
        let extent = self.chain.get(id);
        if !extent.take_queued(&pfn) || !extent.reclaimable() {
            return Verdict::Skip;
        }
        if extent.take_accessed(&pfn) {
            log::trace!("section {}: {:?} recently used, second chance", self.id(), id);
            pfn.queue_unused(self.weak(), extent);
            return Verdict::Requeue;
        }

        // SAFETY: 持有低层状态锁
        let Some(entries) = (unsafe { extent.entries() }) else {
            return Verdict::Skip;
        };
        let busy = entries.iter().enumerate().any(|(index, cell)| {
            let TranslationEntry::Transition { ppn, .. } = cell.load() else {
                return false;
            };
            self.check_owner(&pfn, ppn, id, index);
            let frame = pfn.frames.frame(ppn);
            debug_assert_eq!(frame.share_count, 0, "unreferenced extent maps page {}", ppn);
            frame.modified || frame.reference_count > 0 || frame.share_count > 0
        });
        if busy {
            log::trace!("section {}: {:?} holds modified pages, requeued", self.id(), id);
            pfn.queue_unused(self.weak(), extent);
            return Verdict::Requeue;
        }

        let mut pages = 0;
        for cell in entries {
            if let TranslationEntry::Transition { ppn, .. } = cell.load() {
                if pfn.frames.unlink_page(ppn, false) {
                    pages += 1;
                }
            }
        }
        log::trace!("section {}: released entries of {:?}", self.id(), id);
        Verdict::Release(extent.take_entries(&mut pfn), pages)
    }
}

//! 最小的缺页处理
//!
//! 只覆盖段视图：找到条目，必要时为其分配物理页（条目转为 Transition），
//! 再建立叶子映射。内容读入由 I/O 层负责，这里不涉及。

use super::space::Process;
use super::view::ViewState;
use crate::address::{PageNum, Ppn, Vpn};
use crate::frame_allocator::PageList;
use crate::page_table::{PageTableInner, PagingError, Protection, TableEntry};
use crate::section::{FaultError, TranslationEntry};

impl<PT: PageTableInner> Process<PT> {
    /// 处理 `address` 处的缺页，返回映射到的物理页
    pub fn resolve_fault(&self, address: usize, write: bool) -> Result<Ppn, FaultError> {
        let vpn = Vpn::from_addr_floor(address);
        let mut space = self.space.lock();
        let view = space.find_view(vpn).ok_or(FaultError::NotMapped)?.clone();
        if view.state() != ViewState::Active {
            return Err(FaultError::NotMapped);
        }
        if write && !view.protection().contains(Protection::WRITE) {
            return Err(FaultError::AccessViolation);
        }

        if let Some(TableEntry::Page { ppn, .. }) = space.page_table().get_table_entry(vpn, 0) {
            if write {
                space
                    .page_table_mut()
                    .set_dirty(vpn)
                    .map_err(|_| FaultError::AccessViolation)?;
            }
            return Ok(ppn);
        }

        let (extent, index) = view.locate(vpn).ok_or(FaultError::AccessViolation)?;
        let cell = view.locate_entry(vpn).ok_or(FaultError::AccessViolation)?;
        extent.touch();

        let ppn = {
            let mut pfn = self.mm.lock_pfn();
            match cell.load() {
                TranslationEntry::Transition { ppn, .. } => {
                    view.mapping().check_owner(&pfn, ppn, extent.id(), index);
                    pfn.frames.share_page(ppn);
                    ppn
                }
                entry @ (TranslationEntry::MappedAtOffset { .. }
                | TranslationEntry::DemandZero { .. }) => {
                    let ppn = pfn
                        .frames
                        .alloc_frame(PageList::Active)
                        .ok_or(FaultError::NoMemory)?;
                    let frame = pfn.frames.frame_mut(ppn);
                    frame.owner = Some(view.mapping().owner_of(extent.id(), index));
                    // 按需清零的页在后备存储中没有副本
                    frame.modified = matches!(entry, TranslationEntry::DemandZero { .. });
                    cell.store(TranslationEntry::Transition {
                        ppn,
                        protection: entry.protection(),
                    });
                    pfn.frames.share_page(ppn);
                    ppn
                }
                TranslationEntry::Invalid => return Err(FaultError::AccessViolation),
            }
        };

        let mm = &self.mm;
        let mapped = space.page_table_mut().map_page(
            vpn,
            ppn,
            view.protection(),
            write,
            &mut || mm.allocate_table_page(),
            &mut |table| mm.free_table_page(table),
        );
        if let Err(err) = mapped {
            self.mm.lock_pfn().frames.unshare_page(ppn, false);
            return Err(match err {
                PagingError::FrameAllocFailed => FaultError::NoMemory,
                _ => FaultError::AccessViolation,
            });
        }
        log::trace!(
            "process {}: {:#x} -> {} ({})",
            self.id(),
            vpn.start_addr(),
            ppn,
            if write { "write" } else { "read" }
        );
        Ok(ppn)
    }
}

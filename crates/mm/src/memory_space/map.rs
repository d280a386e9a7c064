//! 映射视图

use alloc::sync::Arc;

use super::space::Process;
use super::view::{View, ViewKind};
use crate::address::{page_size, PageNum};
use crate::page_table::{PageTableInner, Protection};
use crate::section::{MapError, SectionRef};

impl<PT: PageTableInner> Process<PT> {
    /// 把段中从 `offset` 字节开始的 `size` 字节映射进地址空间，返回起始虚拟地址
    ///
    /// `offset` 必须页对齐且落在段内；视图可以越过段的当前末尾，
    /// 之后的扩展会让越过的部分变得可访问。
    pub fn map_view(
        &self,
        section: &SectionRef,
        offset: u64,
        size: u64,
        protection: Protection,
        kind: ViewKind,
    ) -> Result<usize, MapError> {
        let page = page_size() as u64;
        if size == 0 || offset % page != 0 || !section.protection().contains(protection) {
            return Err(MapError::InvalidParameter);
        }
        let pages = usize::try_from(size.div_ceil(page)).map_err(|_| MapError::InvalidParameter)?;
        if self.is_terminating() {
            return Err(MapError::ProcessTerminating);
        }

        let mut space = self.space.lock();
        let range = space
            .allocate_virtual_range(pages)
            .ok_or(MapError::NoVirtualSpace)?;
        let first = section.reference_view(offset / page, pages as u64)?;
        let view = Arc::new(View::new(
            range,
            first,
            section.mapping().clone(),
            self.id(),
            protection,
            kind,
        ));
        space.insert_view(view);
        log::debug!(
            "process {}: mapped section {} at {:#x}, {} pages from {:?}",
            self.id(),
            section.id(),
            range.start.start_addr(),
            pages,
            first
        );
        Ok(range.start.start_addr())
    }
}

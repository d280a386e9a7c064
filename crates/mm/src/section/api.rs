//! 面向调用者的入口
//!
//! 两个入口都先校验参数（非空、大小与地址合理），再触碰共享状态。

use super::error::{ExtendError, UnmapError};
use super::mapping::SectionRef;
use crate::memory_space::Process;
use crate::mm_config;
use crate::page_table::PageTableInner;

/// 把句柄指向的段扩展到至少 `requested_size` 字节，返回实际大小
pub fn extend_mapping(section: Option<&SectionRef>, requested_size: i64) -> Result<u64, ExtendError> {
    let section = section.ok_or(ExtendError::InvalidParameter)?;
    let size = u64::try_from(requested_size).map_err(|_| ExtendError::InvalidParameter)?;
    section.extend(size, false)
}

/// 解除 `process` 中包含 `address` 的视图
pub fn unmap_view<PT: PageTableInner>(
    process: Option<&Process<PT>>,
    address: usize,
) -> Result<(), UnmapError> {
    let process = process.ok_or(UnmapError::InvalidParameter)?;
    let config = mm_config();
    if !(config.user_va_start()..config.user_va_end()).contains(&address) {
        return Err(UnmapError::InvalidParameter);
    }
    process.unmap_view_at(address)
}

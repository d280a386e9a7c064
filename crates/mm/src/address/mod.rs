//! 地址模块
//!
//! 提供页码抽象。地址本身直接使用 `usize`，页码通过 [`PageNum`] 与之互相转换。
//!
//! - [`Ppn`] - 物理页码（Physical Page Number）
//! - [`Vpn`] - 虚拟页码（Virtual Page Number）
//! - [`PpnRange`] / [`VpnRange`] - 半开区间 `[start, end)`

pub mod page_num;

pub use page_num::{PageNum, PageNumRange, Ppn, PpnRange, Vpn, VpnRange};

/// 当前平台的页大小
#[inline]
pub fn page_size() -> usize {
    crate::mm_config().page_size()
}

/// 字节数向上取整到页数
#[inline]
pub fn bytes_to_pages(bytes: u64) -> u64 {
    let page = page_size() as u64;
    bytes.div_ceil(page)
}

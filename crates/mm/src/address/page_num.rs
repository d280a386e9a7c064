//! 页码抽象模块
//!
//! 定义页码 Trait、具体的页码类型 (Ppn, Vpn)，以及连续页码的范围结构 (PageNumRange)。

use core::fmt;

use super::page_size;

/// 表示一个页码的 Trait。
pub trait PageNum: Copy + Ord + fmt::Debug {
    /// 页码数值
    fn as_usize(self) -> usize;

    /// 由数值构造页码
    fn from_usize(value: usize) -> Self;

    /// 向后偏移 `offset` 页
    fn add(self, offset: usize) -> Self {
        Self::from_usize(self.as_usize() + offset)
    }

    /// 两个页码之间的页数差（`self - other`）
    fn distance_from(self, other: Self) -> usize {
        debug_assert!(self >= other);
        self.as_usize() - other.as_usize()
    }

    /// 地址向下取整得到的页码
    fn from_addr_floor(addr: usize) -> Self {
        Self::from_usize(addr / page_size())
    }

    /// 地址向上取整得到的页码
    fn from_addr_ceil(addr: usize) -> Self {
        Self::from_usize(addr.div_ceil(page_size()))
    }

    /// 页的起始地址
    fn start_addr(self) -> usize {
        self.as_usize() * page_size()
    }
}

macro_rules! impl_page_num {
    ($type:ident) => {
        impl $type {
            /// 由数值构造页码
            pub const fn from_usize(value: usize) -> Self {
                Self(value)
            }

            /// 页码数值
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl PageNum for $type {
            fn as_usize(self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($type), self.0)
            }
        }
    };
}

/// 物理页码
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Ppn(pub usize);
impl_page_num!(Ppn);

/// 虚拟页码
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Vpn(pub usize);
impl_page_num!(Vpn);

/// 泛型页码范围结构，表示一个半开区间 `[start, end)`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageNumRange<T: PageNum> {
    /// 范围的起始页码 (包含)。
    pub start: T,
    /// 范围的结束页码 (不包含)。
    pub end: T,
}

impl<T: PageNum> PageNumRange<T> {
    /// 创建一个新的页码范围。
    pub fn new(start: T, end: T) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// 从起始页码和长度 (页数) 创建一个页码范围。
    pub fn from_start_len(start: T, len: usize) -> Self {
        Self {
            start,
            end: start.add(len),
        }
    }

    /// 获取范围内的页数。
    pub fn len(&self) -> usize {
        self.end.distance_from(self.start)
    }

    /// 检查范围是否为空。
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 检查范围是否包含给定的页码。
    pub fn contains(&self, page: T) -> bool {
        page >= self.start && page < self.end
    }

    /// 检查两个范围是否重叠；相邻的范围不视为重叠。
    pub fn overlaps(&self, other: &Self) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }

    /// 范围内最后一个页码
    pub fn last(&self) -> Option<T> {
        (!self.is_empty()).then(|| T::from_usize(self.end.as_usize() - 1))
    }

    /// 获取范围的迭代器。
    pub fn iter(&self) -> PageNumRangeIterator<T> {
        PageNumRangeIterator {
            current: self.start,
            end: self.end,
        }
    }
}

impl<T: PageNum> IntoIterator for PageNumRange<T> {
    type Item = T;
    type IntoIter = PageNumRangeIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 页码范围的迭代器，按升序返回范围内的每个页码。
pub struct PageNumRangeIterator<T: PageNum> {
    current: T,
    end: T,
}

impl<T: PageNum> Iterator for PageNumRangeIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }
        let result = self.current;
        self.current = self.current.add(1);
        Some(result)
    }
}

/// 物理页码范围的类型别名
pub type PpnRange = PageNumRange<Ppn>;
/// 虚拟页码范围的类型别名
pub type VpnRange = PageNumRange<Vpn>;

//! 页表模块
//!
//! 定义进程地址转换层次结构的接口 [`PageTableInner`]、叶子/中间表项 [`TableEntry`]，
//! 以及一个纯软件的多级基数树实现 [`RadixPageTable`]。

mod radix;
mod table;

pub use radix::RadixPageTable;
pub use table::*;

use bitflags::bitflags;

use crate::address::Ppn;

bitflags! {
    /// 页面保护属性
    ///
    /// 同时用于段条目（[`TranslationEntry`](crate::section::TranslationEntry)）
    /// 和进程页表的叶子表项。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u8 {
        /// 可读
        const READ = 1 << 0;
        /// 可写
        const WRITE = 1 << 1;
        /// 可执行
        const EXECUTE = 1 << 2;
        /// 写时复制
        const COPY_ON_WRITE = 1 << 3;
        /// 不经过缓存
        const NOCACHE = 1 << 4;
    }
}

impl Protection {
    /// 编码进条目时占用的位数
    pub const BITS: u32 = 5;

    /// 只读
    pub const fn read_only() -> Self {
        Self::READ
    }

    /// 读写
    pub const fn read_write() -> Self {
        Self::READ.union(Self::WRITE)
    }
}

/// 地址转换层次结构中的一个表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEntry {
    /// 叶子表项：映射一个物理页
    Page {
        /// 物理页码
        ppn: Ppn,
        /// 保护属性
        protection: Protection,
        /// 硬件脏位
        dirty: bool,
    },
    /// 中间表项：指向下一级页表页
    Table {
        /// 下一级页表页所在的物理页
        ppn: Ppn,
    },
}

/// 分页操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// 虚拟地址未被映射
    NotMapped,
    /// 虚拟地址已被映射
    AlreadyMapped,
    /// 提供了无效的地址或层级
    InvalidAddress,
    /// 页表页仍有有效表项，不能删除
    TableNotEmpty,
    /// 帧（Frame）分配失败
    FrameAllocFailed,
}

/// 分页操作的结果类型
pub type PagingResult<T> = Result<T, PagingError>;

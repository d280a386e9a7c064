//! 段条目
//!
//! 每个条目描述段中一页的状态，以 64 位整数原子地存放在 Extent 的条目数组里，
//! 缺页处理路径无锁读取，清除与缺页路径原子写入。
//!
//! 编码：
//! ```text
//!  63                      8 7       3 2   0
//! +-------------------------+---------+-----+
//! |         payload         |  prot   | tag |
//! +-------------------------+---------+-----+
//! ```

use core::sync::atomic::{AtomicU64, Ordering};

use crate::address::Ppn;
use crate::page_table::Protection;

const TAG_BITS: u32 = 3;
const TAG_MASK: u64 = (1 << TAG_BITS) - 1;
const PROT_SHIFT: u32 = TAG_BITS;
const PROT_MASK: u64 = (1 << Protection::BITS) - 1;
const PAYLOAD_SHIFT: u32 = 8;

const TAG_INVALID: u64 = 0;
const TAG_MAPPED: u64 = 1;
const TAG_TRANSITION: u64 = 2;
const TAG_DEMAND_ZERO: u64 = 3;

/// 段中一页的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationEntry {
    /// 无效
    Invalid,
    /// 内容位于后备存储的第 `page` 页，尚未驻留
    MappedAtOffset {
        /// 后备存储中的页偏移
        page: u64,
        /// 保护属性
        protection: Protection,
    },
    /// 内容驻留在物理页 `ppn` 中（可能仍被映射，也可能在 Standby/Modified 链表上）
    Transition {
        /// 物理页码
        ppn: Ppn,
        /// 保护属性
        protection: Protection,
    },
    /// 首次访问时提供全零页
    DemandZero {
        /// 保护属性
        protection: Protection,
    },
}

impl TranslationEntry {
    /// 保护属性；无效条目返回空集
    pub fn protection(&self) -> Protection {
        match *self {
            TranslationEntry::Invalid => Protection::empty(),
            TranslationEntry::MappedAtOffset { protection, .. }
            | TranslationEntry::Transition { protection, .. }
            | TranslationEntry::DemandZero { protection } => protection,
        }
    }

    /// 是否驻留
    pub fn is_transition(&self) -> bool {
        matches!(self, TranslationEntry::Transition { .. })
    }

    fn encode(self) -> u64 {
        let (tag, protection, payload) = match self {
            TranslationEntry::Invalid => (TAG_INVALID, Protection::empty(), 0),
            TranslationEntry::MappedAtOffset { page, protection } => (TAG_MAPPED, protection, page),
            TranslationEntry::Transition { ppn, protection } => {
                (TAG_TRANSITION, protection, ppn.0 as u64)
            }
            TranslationEntry::DemandZero { protection } => (TAG_DEMAND_ZERO, protection, 0),
        };
        debug_assert!(payload < (1 << (64 - PAYLOAD_SHIFT)));
        tag | ((protection.bits() as u64) << PROT_SHIFT) | (payload << PAYLOAD_SHIFT)
    }

    fn decode(raw: u64) -> Self {
        let protection = Protection::from_bits_truncate(((raw >> PROT_SHIFT) & PROT_MASK) as u8);
        let payload = raw >> PAYLOAD_SHIFT;
        match raw & TAG_MASK {
            TAG_MAPPED => TranslationEntry::MappedAtOffset {
                page: payload,
                protection,
            },
            TAG_TRANSITION => TranslationEntry::Transition {
                ppn: Ppn(payload as usize),
                protection,
            },
            TAG_DEMAND_ZERO => TranslationEntry::DemandZero { protection },
            _ => TranslationEntry::Invalid,
        }
    }
}

/// 存放一个 [`TranslationEntry`] 的原子单元
///
/// 单元的地址在其所属数组的生命周期内保持不变，可以作为条目的身份。
#[derive(Debug)]
#[repr(transparent)]
pub struct EntryCell(AtomicU64);

impl EntryCell {
    /// 以给定条目初始化
    pub fn new(entry: TranslationEntry) -> Self {
        Self(AtomicU64::new(entry.encode()))
    }

    /// 读取条目
    pub fn load(&self) -> TranslationEntry {
        TranslationEntry::decode(self.0.load(Ordering::Acquire))
    }

    /// 写入条目
    pub fn store(&self, entry: TranslationEntry) {
        self.0.store(entry.encode(), Ordering::Release);
    }

    /// 仅当当前值为 `current` 时写入 `new`
    pub fn compare_exchange(
        &self,
        current: TranslationEntry,
        new: TranslationEntry,
    ) -> Result<(), TranslationEntry> {
        self.0
            .compare_exchange(
                current.encode(),
                new.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(TranslationEntry::decode)
    }
}

//! 软件多级基数树页表
//!
//! 四级、每级 512 项，与常见的 48 位虚拟地址 MMU 布局相同。
//! 页表页本身只在软件中存在，但每一页都从物理页分配器取得一个 PPN，
//! 这样拆除时的"逐级回收空页表页"可以在物理页统计上被观察到。

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::{PageTableInner, PagingError, PagingResult, Protection, TableEntry};
use crate::address::{Ppn, Vpn};

const LEVELS: usize = 4;
const ENTRIES: usize = 512;
const INDEX_BITS: usize = 9;

enum Slot {
    Empty,
    Page {
        ppn: Ppn,
        protection: Protection,
        dirty: bool,
    },
    Table(Box<TableNode>),
}

struct TableNode {
    ppn: Ppn,
    used: usize,
    slots: Box<[Slot]>,
}

impl TableNode {
    fn new(ppn: Ppn) -> Self {
        let mut slots = Vec::with_capacity(ENTRIES);
        slots.resize_with(ENTRIES, || Slot::Empty);
        Self {
            ppn,
            used: 0,
            slots: slots.into_boxed_slice(),
        }
    }
}

#[inline]
fn index(vpn: Vpn, level: usize) -> usize {
    (vpn.0 >> (INDEX_BITS * level)) & (ENTRIES - 1)
}

/// 软件基数树页表
pub struct RadixPageTable {
    root: TableNode,
}

impl RadixPageTable {
    /// 以 `root_ppn` 作为根页表页创建空页表
    pub fn new(root_ppn: Ppn) -> Self {
        Self {
            root: TableNode::new(root_ppn),
        }
    }

    /// 找到 `level` 级表项所在的页表页
    fn table(&self, vpn: Vpn, level: usize) -> Option<&TableNode> {
        let mut node = &self.root;
        let mut current = LEVELS - 1;
        while current > level {
            match &node.slots[index(vpn, current)] {
                Slot::Table(child) => node = child,
                _ => return None,
            }
            current -= 1;
        }
        Some(node)
    }

    fn table_mut(&mut self, vpn: Vpn, level: usize) -> Option<&mut TableNode> {
        let mut node = &mut self.root;
        let mut current = LEVELS - 1;
        while current > level {
            match &mut node.slots[index(vpn, current)] {
                Slot::Table(child) => node = child,
                _ => return None,
            }
            current -= 1;
        }
        Some(node)
    }
}

impl PageTableInner for RadixPageTable {
    const LEVELS: usize = LEVELS;
    const ENTRIES_PER_TABLE: usize = ENTRIES;

    fn root_ppn(&self) -> Ppn {
        self.root.ppn
    }

    fn get_table_entry(&self, vpn: Vpn, level: usize) -> Option<TableEntry> {
        if level >= LEVELS {
            return None;
        }
        match &self.table(vpn, level)?.slots[index(vpn, level)] {
            Slot::Empty => None,
            Slot::Page {
                ppn,
                protection,
                dirty,
            } => Some(TableEntry::Page {
                ppn: *ppn,
                protection: *protection,
                dirty: *dirty,
            }),
            Slot::Table(child) => Some(TableEntry::Table { ppn: child.ppn }),
        }
    }

    fn delete_table_entry(&mut self, vpn: Vpn, level: usize) -> PagingResult<TableEntry> {
        if level >= LEVELS {
            return Err(PagingError::InvalidAddress);
        }
        let node = self.table_mut(vpn, level).ok_or(PagingError::NotMapped)?;
        let slot = &mut node.slots[index(vpn, level)];
        let old = match slot {
            Slot::Empty => return Err(PagingError::NotMapped),
            Slot::Table(child) if child.used != 0 => return Err(PagingError::TableNotEmpty),
            Slot::Table(child) => TableEntry::Table { ppn: child.ppn },
            Slot::Page {
                ppn,
                protection,
                dirty,
            } => TableEntry::Page {
                ppn: *ppn,
                protection: *protection,
                dirty: *dirty,
            },
        };
        *slot = Slot::Empty;
        node.used -= 1;
        Ok(old)
    }

    fn used_entries(&self, vpn: Vpn, level: usize) -> Option<usize> {
        if level >= LEVELS {
            return None;
        }
        self.table(vpn, level).map(|node| node.used)
    }

    fn map_page(
        &mut self,
        vpn: Vpn,
        ppn: Ppn,
        protection: Protection,
        dirty: bool,
        alloc_table: &mut dyn FnMut() -> Option<Ppn>,
        free_table: &mut dyn FnMut(Ppn),
    ) -> PagingResult<()> {
        // 先数出缺失的页表页并全部分配，之后才修改页表
        let mut missing = 0;
        let mut existing = Some(&self.root);
        for level in (1..LEVELS).rev() {
            let Some(node) = existing else {
                missing += 1;
                continue;
            };
            existing = match &node.slots[index(vpn, level)] {
                Slot::Page { .. } => return Err(PagingError::AlreadyMapped),
                Slot::Table(child) => Some(&**child),
                Slot::Empty => {
                    missing += 1;
                    None
                }
            };
        }
        if existing.is_some_and(|leaf| !matches!(leaf.slots[index(vpn, 0)], Slot::Empty)) {
            return Err(PagingError::AlreadyMapped);
        }

        let mut tables = Vec::with_capacity(missing);
        for _ in 0..missing {
            match alloc_table() {
                Some(table) => tables.push(table),
                None => {
                    for table in tables {
                        free_table(table);
                    }
                    return Err(PagingError::FrameAllocFailed);
                }
            }
        }

        let mut tables = tables.into_iter();
        let mut node = &mut self.root;
        for level in (1..LEVELS).rev() {
            let idx = index(vpn, level);
            if matches!(node.slots[idx], Slot::Empty) {
                let table = tables.next().ok_or(PagingError::FrameAllocFailed)?;
                node.slots[idx] = Slot::Table(Box::new(TableNode::new(table)));
                node.used += 1;
            }
            node = match &mut node.slots[idx] {
                Slot::Table(child) => child,
                _ => return Err(PagingError::InvalidAddress),
            };
        }
        node.slots[index(vpn, 0)] = Slot::Page {
            ppn,
            protection,
            dirty,
        };
        node.used += 1;
        Ok(())
    }

    fn table_pages(&self) -> Vec<Ppn> {
        fn walk(node: &TableNode, out: &mut Vec<Ppn>) {
            out.push(node.ppn);
            for slot in node.slots.iter() {
                if let Slot::Table(child) = slot {
                    walk(child, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    fn set_dirty(&mut self, vpn: Vpn) -> PagingResult<()> {
        let node = self.table_mut(vpn, 0).ok_or(PagingError::NotMapped)?;
        match &mut node.slots[index(vpn, 0)] {
            Slot::Page { dirty, .. } => {
                *dirty = true;
                Ok(())
            }
            _ => Err(PagingError::NotMapped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(next: &mut usize) -> impl FnMut() -> Option<Ppn> + '_ {
        move || {
            *next += 1;
            Some(Ppn(*next))
        }
    }

    #[test]
    fn test_map_creates_intermediate_tables() {
        let mut pt = RadixPageTable::new(Ppn(1000));
        let mut next = 0;
        pt.map_page(Vpn(0x1234), Ppn(77), Protection::read_only(), false, &mut allocator(&mut next), &mut |_| {})
            .unwrap();
        // 根之下新建了三级页表页
        assert_eq!(next, 3);
        assert_eq!(pt.table_pages().len(), 4);
        assert_eq!(
            pt.get_table_entry(Vpn(0x1234), 0),
            Some(TableEntry::Page {
                ppn: Ppn(77),
                protection: Protection::read_only(),
                dirty: false
            })
        );
        assert_eq!(pt.used_entries(Vpn(0x1234), 0), Some(1));
        assert_eq!(pt.used_entries(Vpn(0x1234), LEVELS - 1), Some(1));
    }

    #[test]
    fn test_map_failure_leaves_table_unchanged() {
        let mut pt = RadixPageTable::new(Ppn(1000));
        let mut next = 0;
        let mut freed = Vec::new();
        let mut alloc = || {
            next += 1;
            (next < 3).then_some(Ppn(next))
        };
        assert_eq!(
            pt.map_page(Vpn(0x1234), Ppn(77), Protection::READ, false, &mut alloc, &mut |ppn| {
                freed.push(ppn)
            }),
            Err(PagingError::FrameAllocFailed)
        );
        assert_eq!(freed, [Ppn(1), Ppn(2)]);
        assert_eq!(pt.table_pages(), [Ppn(1000)]);
        assert_eq!(pt.used_entries(Vpn(0x1234), LEVELS - 1), Some(0));
    }

    #[test]
    fn test_map_twice_fails() {
        let mut pt = RadixPageTable::new(Ppn(1000));
        let mut next = 0;
        let mut alloc = allocator(&mut next);
        pt.map_page(Vpn(5), Ppn(1), Protection::READ, false, &mut alloc, &mut |_| {}).unwrap();
        assert_eq!(
            pt.map_page(Vpn(5), Ppn(2), Protection::READ, false, &mut alloc, &mut |_| {}),
            Err(PagingError::AlreadyMapped)
        );
    }

    #[test]
    fn test_delete_table_requires_empty_child() {
        let mut pt = RadixPageTable::new(Ppn(1000));
        let mut next = 0;
        pt.map_page(Vpn(5), Ppn(1), Protection::READ, false, &mut allocator(&mut next), &mut |_| {})
            .unwrap();
        assert_eq!(pt.delete_table_entry(Vpn(5), 1), Err(PagingError::TableNotEmpty));
        assert!(matches!(
            pt.delete_table_entry(Vpn(5), 0),
            Ok(TableEntry::Page { ppn: Ppn(1), .. })
        ));
        assert_eq!(pt.used_entries(Vpn(5), 0), Some(0));
        assert!(matches!(pt.delete_table_entry(Vpn(5), 1), Ok(TableEntry::Table { .. })));
        assert_eq!(pt.used_entries(Vpn(5), 0), None);
    }

    #[test]
    fn test_set_dirty() {
        let mut pt = RadixPageTable::new(Ppn(1000));
        let mut next = 0;
        pt.map_page(Vpn(9), Ppn(3), Protection::read_write(), false, &mut allocator(&mut next), &mut |_| {})
            .unwrap();
        pt.set_dirty(Vpn(9)).unwrap();
        assert!(matches!(
            pt.get_table_entry(Vpn(9), 0),
            Some(TableEntry::Page { dirty: true, .. })
        ));
        assert_eq!(pt.set_dirty(Vpn(10)), Err(PagingError::NotMapped));
    }
}

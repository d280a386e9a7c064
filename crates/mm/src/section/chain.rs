//! Extent 链
//!
//! Extent 节点存放在按编号索引的 arena 中，链接关系通过 `next` 编号表达。
//! arena 由若干个按 2 的幂增长的桶组成，桶一旦分配就不再移动，
//! 因此读者可以在不加锁的情况下沿 `next` 遍历，同时另一个线程在链尾追加。
//!
//! 写者（创建与扩展路径）由扩展锁串行化；新节点在链接前必须完全初始化，
//! 链接使用 Release 写入，读者使用 Acquire 读取。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use super::extent::{Extent, ExtentId};
use crate::pool::{PagedPool, PoolCharge};

const FIRST_BUCKET_SHIFT: u32 = 4;
const FIRST_BUCKET: usize = 1 << FIRST_BUCKET_SHIFT;
const BUCKETS: usize = 28;

struct Bucket {
    slots: Box<[AtomicPtr<Extent>]>,
    _charge: PoolCharge,
}

/// 编号到 (桶, 桶内偏移) 的换算；第 b 个桶有 16 << b 个槽位
#[inline]
fn locate(index: usize) -> (usize, usize) {
    let n = index + FIRST_BUCKET;
    let bucket = (usize::BITS - 1 - n.leading_zeros() - FIRST_BUCKET_SHIFT) as usize;
    (bucket, n - (FIRST_BUCKET << bucket))
}

/// 段的 Extent 链
pub struct ExtentChain {
    buckets: [AtomicPtr<Bucket>; BUCKETS],
    len: AtomicUsize,
}

impl ExtentChain {
    pub(crate) fn new() -> Self {
        Self {
            buckets: [const { AtomicPtr::new(ptr::null_mut()) }; BUCKETS],
            len: AtomicUsize::new(0),
        }
    }

    /// 已安装的 Extent 个数
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// 链是否为空（只在段创建完成之前成立）
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按编号取 Extent
    ///
    /// # Panics
    /// 编号尚未安装时 panic：只有链上可达的编号才会被传入
    pub fn get(&self, id: ExtentId) -> &Extent {
        let (bucket, offset) = locate(id.index());
        let bucket = self.buckets[bucket].load(Ordering::Acquire);
        assert!(!bucket.is_null(), "extent {:?} not installed", id);
        // SAFETY: 桶在链销毁前不会释放
        let slot = unsafe { &(&(*bucket).slots)[offset] };
        let extent = slot.load(Ordering::Acquire);
        assert!(!extent.is_null(), "extent {:?} not installed", id);
        // SAFETY: 节点在链销毁前不会释放
        unsafe { &*extent }
    }

    /// 链头
    pub fn head(&self) -> &Extent {
        self.get(ExtentId::HEAD)
    }

    /// 从 `from` 开始沿 `next` 找到链尾
    pub fn tail_from(&self, from: ExtentId) -> &Extent {
        let mut extent = self.get(from);
        while let Some(next) = extent.next() {
            extent = self.get(next);
        }
        extent
    }

    /// 从 `from` 的第 `index` 个条目起向后数 `offset` 个条目，返回所在的 Extent 与其中的下标
    ///
    /// 不加锁，沿 `next` 逐个减去容量；越过链尾时返回 `None`。
    pub fn locate_from(&self, from: ExtentId, index: usize, offset: u64) -> Option<(&Extent, usize)> {
        let mut extent = self.get(from);
        let mut remaining = index as u64 + offset;
        loop {
            let capacity = extent.capacity() as u64;
            if remaining < capacity {
                return Some((extent, remaining as usize));
            }
            remaining -= capacity;
            extent = self.get(extent.next()?);
        }
    }

    /// 段内第 `page` 页所在的 Extent 与下标
    pub fn locate(&self, page: u64) -> Option<(&Extent, usize)> {
        if self.is_empty() {
            return None;
        }
        self.locate_from(ExtentId::HEAD, 0, page)
    }

    /// 从链头开始遍历
    pub fn iter(&self) -> ChainIter<'_> {
        self.iter_from(ExtentId::HEAD)
    }

    /// 从 `from` 开始遍历
    pub fn iter_from(&self, from: ExtentId) -> ChainIter<'_> {
        ChainIter {
            chain: self,
            next: (!self.is_empty()).then_some(from),
        }
    }

    /// 预先分配能容纳 `additional` 个新节点的桶
    ///
    /// 调用者必须持有扩展锁（或独占整个链）。
    pub(crate) fn reserve(&self, pool: &Arc<PagedPool>, additional: usize) -> Option<()> {
        if additional == 0 {
            return Some(());
        }
        let (last_bucket, _) = locate(self.len() + additional - 1);
        if last_bucket >= BUCKETS {
            return None;
        }
        // 全部分配成功之后才发布，失败时不留下任何新桶
        let mut fresh = Vec::new();
        for bucket in 0..=last_bucket {
            if !self.buckets[bucket].load(Ordering::Acquire).is_null() {
                continue;
            }
            let size = FIRST_BUCKET << bucket;
            let charge = pool.charge(size * size_of::<AtomicPtr<Extent>>() + size_of::<Bucket>())?;
            let mut slots = Vec::new();
            slots.try_reserve_exact(size).ok()?;
            slots.extend((0..size).map(|_| AtomicPtr::new(ptr::null_mut())));
            let new = Box::try_new(Bucket {
                slots: slots.into_boxed_slice(),
                _charge: charge,
            })
            .ok()?;
            fresh.try_reserve(1).ok()?;
            fresh.push((bucket, new));
        }
        for (bucket, new) in fresh {
            self.buckets[bucket].store(Box::into_raw(new), Ordering::Release);
        }
        Some(())
    }

    /// 安装一个已完全初始化的节点，编号必须等于当前长度
    ///
    /// 安装后节点可以按编号访问，但在前驱链接它之前读者无法沿链到达它。
    pub(crate) fn install(&self, extent: Box<Extent>) -> &Extent {
        let index = extent.id().index();
        assert_eq!(index, self.len(), "extents must be installed in order");
        let (bucket, offset) = locate(index);
        let bucket = self.buckets[bucket].load(Ordering::Acquire);
        assert!(!bucket.is_null(), "bucket not reserved for {:?}", extent.id());
        let raw = Box::into_raw(extent);
        // SAFETY: 桶已由 reserve 分配
        unsafe { (&(*bucket).slots)[offset].store(raw, Ordering::Release) };
        self.len.store(index + 1, Ordering::Release);
        // SAFETY: 刚刚安装，链销毁前有效
        unsafe { &*raw }
    }
}

impl Drop for ExtentChain {
    fn drop(&mut self) {
        for bucket in self.buckets.iter_mut() {
            let raw = *bucket.get_mut();
            if raw.is_null() {
                continue;
            }
            // SAFETY: 独占访问，raw 来自 Box::into_raw
            let bucket = unsafe { Box::from_raw(raw) };
            for slot in bucket.slots.iter() {
                let extent = slot.load(Ordering::Relaxed);
                if !extent.is_null() {
                    // SAFETY: 同上
                    drop(unsafe { Box::from_raw(extent) });
                }
            }
        }
    }
}

/// 沿 `next` 链接的无锁遍历
pub struct ChainIter<'a> {
    chain: &'a ExtentChain,
    next: Option<ExtentId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Extent;

    fn next(&mut self) -> Option<Self::Item> {
        let extent = self.chain.get(self.next?);
        self.next = extent.next();
        Some(extent)
    }
}

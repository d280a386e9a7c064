//! 后备存储的 Mock 实现
//!
//! 只模拟大小：查询、设置，以及可注入的锁冲突和 I/O 错误。

use core::sync::atomic::{AtomicIsize, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// 注入的失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// 锁冲突，可重试
    Conflict,
    /// I/O 错误，携带负的 errno
    Io(isize),
}

/// Mock 的后备存储
pub struct MockBackingStore {
    size: AtomicU64,
    conflicts: AtomicU32,
    io_error: AtomicIsize,
    queries: AtomicUsize,
    resizes: AtomicUsize,
}

impl MockBackingStore {
    pub const fn new(size: u64) -> Self {
        Self {
            size: AtomicU64::new(size),
            conflicts: AtomicU32::new(0),
            io_error: AtomicIsize::new(0),
            queries: AtomicUsize::new(0),
            resizes: AtomicUsize::new(0),
        }
    }

    /// 接下来的 `count` 次操作返回锁冲突
    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// 之后的操作都返回 I/O 错误；传入 0 清除
    pub fn inject_io_error(&self, errno: isize) {
        self.io_error.store(errno, Ordering::SeqCst);
    }

    fn fault(&self) -> Option<StoreFault> {
        let errno = self.io_error.load(Ordering::SeqCst);
        if errno != 0 {
            return Some(StoreFault::Io(errno));
        }
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| StoreFault::Conflict)
    }

    pub fn query_size(&self) -> Result<u64, StoreFault> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        match self.fault() {
            Some(fault) => Err(fault),
            None => Ok(self.size.load(Ordering::SeqCst)),
        }
    }

    pub fn set_size(&self, size: u64) -> Result<(), StoreFault> {
        self.resizes.fetch_add(1, Ordering::Relaxed);
        match self.fault() {
            Some(fault) => Err(fault),
            None => {
                self.size.store(size, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// 当前大小，不经过故障注入
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn resize_count(&self) -> usize {
        self.resizes.load(Ordering::Relaxed)
    }
}

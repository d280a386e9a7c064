//! 分页池记账
//!
//! 段引擎的所有内部分配（Extent 节点、arena 桶、条目数组）都先在池中记账，
//! 超出上限即视为分配失败。记账通过 RAII 的 [`PoolCharge`] 完成，
//! 释放对象时自动退还。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

/// 分页池
#[derive(Debug)]
pub struct PagedPool {
    limit: AtomicUsize,
    used: AtomicUsize,
    failures: AtomicUsize,
}

impl PagedPool {
    /// 创建上限为 `limit` 字节的池
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: AtomicUsize::new(limit),
            used: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }

    /// 记账 `bytes` 字节；超出上限时返回 `None`
    pub fn charge(self: &Arc<Self>, bytes: usize) -> Option<PoolCharge> {
        let limit = self.limit.load(Ordering::Relaxed);
        let result = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |used| {
                used.checked_add(bytes).filter(|&total| total <= limit)
            });
        match result {
            Ok(_) => Some(PoolCharge {
                pool: self.clone(),
                bytes,
            }),
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 调整上限
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// 当前上限
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// 已记账的字节数
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// 累计的记账失败次数
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

/// 一笔池记账，Drop 时退还
#[derive(Debug)]
pub struct PoolCharge {
    pool: Arc<PagedPool>,
    bytes: usize,
}

impl PoolCharge {
    /// 记账的字节数
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for PoolCharge {
    fn drop(&mut self) {
        self.pool.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

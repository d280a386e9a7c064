//! 架构相关内存管理操作 trait 定义和注册

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::address::Vpn;

/// 架构相关内存管理操作
///
/// os crate 需要为具体架构实现此 trait。
pub trait ArchMmOps: Send + Sync {
    /// 刷新单个虚拟页的地址转换缓存（所有 CPU）
    fn flush_tlb_page(&self, vpn: Vpn);

    /// 刷新全部地址转换缓存（所有 CPU）
    fn flush_tlb_all(&self);

    /// 短暂等待，用于重试循环；可以睡眠
    fn delay_short(&self);
}

/// 单次批量刷新最多记录的页数，超出则改为全部刷新
pub const FLUSH_LIST_CAPACITY: usize = 32;

/// 地址转换缓存刷新列表
///
/// 拆除页表时先收集被删除的虚拟页，释放页表页之前统一刷新。
pub struct TlbFlushList {
    pages: [Vpn; FLUSH_LIST_CAPACITY],
    count: usize,
    overflowed: bool,
}

impl TlbFlushList {
    /// 创建空列表
    pub const fn new() -> Self {
        Self {
            pages: [Vpn(0); FLUSH_LIST_CAPACITY],
            count: 0,
            overflowed: false,
        }
    }

    /// 记录一个需要刷新的虚拟页
    pub fn push(&mut self, vpn: Vpn) {
        if self.count < FLUSH_LIST_CAPACITY {
            self.pages[self.count] = vpn;
            self.count += 1;
        } else {
            self.overflowed = true;
        }
    }

    /// 是否没有需要刷新的页
    pub fn is_empty(&self) -> bool {
        self.count == 0 && !self.overflowed
    }

    /// 执行刷新并清空列表
    pub fn flush(&mut self) {
        if self.overflowed {
            arch_ops().flush_tlb_all();
        } else {
            for vpn in &self.pages[..self.count] {
                arch_ops().flush_tlb_page(*vpn);
            }
        }
        self.count = 0;
        self.overflowed = false;
    }
}

impl Default for TlbFlushList {
    fn default() -> Self {
        Self::new()
    }
}

static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在使用任何内存管理接口之前调用；重复注册时必须传入等价的实现
pub unsafe fn register_arch_ops(ops: &'static dyn ArchMmOps) {
    let ptr = ops as *const dyn ArchMmOps;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn ArchMmOps, (usize, usize)>(ptr) };
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
    ARCH_OPS_DATA.store(data, Ordering::Release);
}

/// 获取已注册的架构操作实现
///
/// # Panics
/// 如果尚未调用 [`register_arch_ops`] 注册实现，则 panic
#[inline]
pub fn arch_ops() -> &'static dyn ArchMmOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("mm: ArchMmOps not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchMmOps>((data, vtable)) }
}

//! 中断保护器
//!
//! 创建时禁用本地中断，销毁时恢复进入前的状态。
//!
//! 禁用中断只阻止本地 CPU 上"任务 vs 中断"的并发，
//! 多核共享数据仍需要配合 [`SpinLock`](crate::SpinLock)。

use crate::arch_ops;

/// 中断保护器，保存进入时的中断状态。
///
/// 可以嵌套使用：内层恢复的是"已禁用"状态，只有最外层才会重新开启中断。
#[must_use = "dropping the guard immediately re-enables interrupts"]
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 禁用中断并记录之前的状态
    pub fn new() -> Self {
        // SAFETY: 保存的 flags 只会在 Drop 中原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 进入前中断是否处于启用状态
    pub fn was_enabled(&self) -> bool {
        self.flags & arch_ops().sstatus_sie() != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 来自 read_and_disable_interrupts
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}

//! 可睡眠锁
//!
//! 基于 `lock_api` 构建的互斥锁。竞争时通过 [`ArchOps::yield_now`] 让出 CPU，
//! 而不是关中断自旋，因此持锁期间可以执行分配内存等较长的操作。
//!
//! 不可在中断上下文或持有 [`SpinLock`](crate::SpinLock) 时获取。
//!
//! [`ArchOps::yield_now`]: crate::ArchOps::yield_now

use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch_ops;

/// 让出 CPU 之前的自旋次数
const SPIN_BEFORE_YIELD: usize = 64;

/// 可睡眠锁的底层实现
///
/// 不可重入；不禁用中断。
#[derive(Debug)]
pub struct RawSleepLock {
    locked: AtomicBool,
}

unsafe impl lock_api::RawMutex for RawSleepLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSleepLock {
        locked: AtomicBool::new(false),
    };

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        let mut spins = 0;
        while !self.try_lock() {
            if spins < SPIN_BEFORE_YIELD {
                spins += 1;
                hint::spin_loop();
            } else {
                arch_ops().yield_now();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// 可睡眠互斥锁
///
/// # 示例
/// ```ignore
/// let lock = SleepLock::new(0);
/// {
///     let mut guard = lock.lock(); // 竞争时让出 CPU
///     *guard += 1;
/// }
/// ```
pub type SleepLock<T> = lock_api::Mutex<RawSleepLock, T>;

/// [`SleepLock`] 的 RAII 保护器
pub type SleepLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSleepLock, T>;

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::test_arch;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    #[test]
    fn test_sleep_lock_basic() {
        test_arch::init();
        let lock = SleepLock::new(5);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.is_locked());
            assert!(lock.try_lock().is_none());
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn test_sleep_lock_contended_counter() {
        test_arch::init();
        let lock = Arc::new(SleepLock::new(0usize));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}

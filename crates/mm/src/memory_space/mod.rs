//! 内存空间模块
//!
//! 进程的地址空间（页表 + 视图集合）以及视图的映射、解除和缺页处理。
//!
//! 锁顺序：地址空间锁（[`SleepLock`](sync::SleepLock)）在外，
//! 段的扩展锁和低层状态锁在内。

mod fault;
mod map;
mod space;
mod unmap;
mod view;

pub use space::{MemorySpace, Process};
pub use view::{View, ViewKind, ViewState};

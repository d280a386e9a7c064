//! 可增长的文件映射段
//!
//! 一个段（[`Mapping`]）的页状态保存在由 [`Extent`] 组成的单向链中，
//! 链只在尾部追加，读者可以在不加锁的情况下沿链查找条目。
//!
//! - 扩展：在扩展锁下分块构建新的 Extent 并发布到链尾，失败时整体回滚
//! - 解除视图：减少 Extent 的视图计数，计数归零的 Dynamic Extent 进入延迟回收队列
//! - 清除：把全局共享内容恢复为由后备存储推导出的状态
//! - 回收：分批释放无人引用的 Extent 的条目数组

mod api;
mod chain;
mod entry;
mod error;
mod extend;
mod extent;
mod mapping;
mod purge;
mod reclaim;

pub use api::{extend_mapping, unmap_view};
pub use chain::{ChainIter, ExtentChain};
pub use entry::{EntryCell, TranslationEntry};
pub use error::{ExtendError, FaultError, MapError, PurgeError, StillReferenced, UnmapError};
pub use extent::{Classification, Extent, ExtentFlags, ExtentId, ExtentInfo};
pub use mapping::{EntryRef, Mapping, SectionAttributes, SectionRef};
pub use reclaim::TrimOutcome;

//! 后备存储接口 trait 定义

/// 后备存储操作的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingStoreError {
    /// 与其它持有者的锁冲突，可以稍后重试
    LockConflict,
    /// 其它 I/O 错误，携带负的 errno
    Io(isize),
}

/// 段的后备存储（通常是一个文件）
///
/// 段引擎只关心大小：内容读写由缺页处理与回写路径负责。
/// 实现必须允许在没有任何内存管理锁的情况下被调用，可能睡眠。
pub trait BackingStore: Send + Sync {
    /// 查询当前大小（字节）
    fn query_size(&self) -> Result<u64, BackingStoreError>;

    /// 设置大小（字节）
    fn set_size(&self, size: u64) -> Result<(), BackingStoreError>;
}

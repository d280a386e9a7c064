//! 段引擎错误类型
//!
//! 各错误都可通过 `to_errno()` 转换为系统调用错误码（负的 POSIX errno）。

use crate::file::BackingStoreError;

/// 扩展段时的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendError {
    /// 请求的大小超过段大小上限 (-EFBIG)，未做任何修改
    TooLarge,
    /// 内部分配失败 (-ENOMEM)，已完整回滚
    InsufficientResources,
    /// 后备存储持续锁冲突，重试耗尽 (-EBUSY)
    BackingStoreConflict,
    /// 参数无效 (-EINVAL)
    InvalidParameter,
    /// 后备存储返回的其它错误，携带其 errno
    Io(isize),
}

impl ExtendError {
    /// 转换为系统调用错误码
    pub fn to_errno(&self) -> isize {
        match self {
            ExtendError::TooLarge => -27,
            ExtendError::InsufficientResources => -12,
            ExtendError::BackingStoreConflict => -16,
            ExtendError::InvalidParameter => -22,
            ExtendError::Io(errno) => *errno,
        }
    }
}

impl From<BackingStoreError> for ExtendError {
    fn from(err: BackingStoreError) -> Self {
        match err {
            BackingStoreError::LockConflict => ExtendError::BackingStoreConflict,
            BackingStoreError::Io(errno) => ExtendError::Io(errno),
        }
    }
}

/// 解除视图映射时的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapError {
    /// 地址处没有属于该进程的活动视图 (-EINVAL)
    NotMapped,
    /// 视图不允许手动解除 (-EACCES)
    AccessDenied,
    /// 进程正在退出 (-ESRCH)
    ProcessTerminating,
    /// 参数无效 (-EINVAL)
    InvalidParameter,
}

impl UnmapError {
    /// 转换为系统调用错误码
    pub fn to_errno(&self) -> isize {
        match self {
            UnmapError::NotMapped => -22,
            UnmapError::AccessDenied => -13,
            UnmapError::ProcessTerminating => -3,
            UnmapError::InvalidParameter => -22,
        }
    }
}

/// 映射视图时的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// 参数无效 (-EINVAL)
    InvalidParameter,
    /// 没有足够大的空闲虚拟地址区间 (-ENOMEM)
    NoVirtualSpace,
    /// 内部分配失败 (-ENOMEM)
    InsufficientResources,
    /// 进程正在退出 (-ESRCH)
    ProcessTerminating,
    /// 段正在被清除 (-EBUSY)
    SectionBusy,
}

impl MapError {
    /// 转换为系统调用错误码
    pub fn to_errno(&self) -> isize {
        match self {
            MapError::InvalidParameter => -22,
            MapError::NoVirtualSpace | MapError::InsufficientResources => -12,
            MapError::ProcessTerminating => -3,
            MapError::SectionBusy => -16,
        }
    }
}

/// 清除段时的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeError {
    /// 段仍有视图或外部引用 (-EBUSY)
    InUse,
}

impl PurgeError {
    /// 转换为系统调用错误码
    pub fn to_errno(&self) -> isize {
        match self {
            PurgeError::InUse => -16,
        }
    }
}

/// 缺页处理的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 地址不在任何视图内 (-EFAULT)
    NotMapped,
    /// 访问越过段末尾或违反保护属性 (-EFAULT)
    AccessViolation,
    /// 物理页耗尽 (-ENOMEM)
    NoMemory,
}

impl FaultError {
    /// 转换为系统调用错误码
    pub fn to_errno(&self) -> isize {
        match self {
            FaultError::NotMapped | FaultError::AccessViolation => -14,
            FaultError::NoMemory => -12,
        }
    }
}

/// Extent 仍被视图引用，不能转为 Dynamic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StillReferenced {
    /// 当时的活动视图计数
    pub active_views: isize,
}

//! 段扩展
//!
//! 扩展在扩展锁下进行，查询/设置后备存储大小之前释放扩展锁，之后重新获取并复查。
//! 新的 Extent 先在链外构建并互相链接（暂存子链），全部分配成功后才在低层状态锁下发布：
//! 先吸收链尾的预留容量，再安装新节点，最后以 Release 屏障写入链尾的 `next`。
//! 任何一步分配失败都会整体丢弃暂存子链，链尾的计数保持原样。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use super::error::ExtendError;
use super::extent::{Classification, Extent, ExtentFlags, ExtentId};
use super::mapping::Mapping;
use crate::address::page_size;
use crate::arch_ops::arch_ops;
use crate::config::{RetryPolicy, SectionConfig};
use crate::file::BackingStoreError;
use crate::page_table::Protection;
use crate::pool::PagedPool;

/// 按策略重试后备存储操作；只有锁冲突会被重试
pub(super) fn retry_backing<T>(
    policy: RetryPolicy,
    mut op: impl FnMut() -> Result<T, BackingStoreError>,
) -> Result<T, ExtendError> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(BackingStoreError::LockConflict) if policy.allows_retry_after(attempt) => {
                log::warn!("backing store busy (attempt {}), retrying", attempt);
                arch_ops().delay_short();
                attempt += 1;
            }
            Err(BackingStoreError::LockConflict) => {
                log::error!("backing store still busy after {} attempts", attempt);
                return Err(ExtendError::BackingStoreConflict);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// 在链外构建覆盖 `entries` 个条目的暂存子链
///
/// 每块最多 `allocation_fragment` 个条目；最后一块按 `entry_granularity` 向上取整，
/// 余量成为新链尾的预留容量。节点编号从 `first_id` 开始连续递增并依次链接。
#[allow(clippy::too_many_arguments)]
pub(super) fn stage_extents(
    pool: &Arc<PagedPool>,
    config: &SectionConfig,
    first_id: usize,
    backing_start: u64,
    entries: u64,
    data_pages: u64,
    flags: ExtentFlags,
    protection: Protection,
) -> Result<Vec<Box<Extent>>, ExtendError> {
    let fragment = config.allocation_fragment as u64;
    let count = entries.div_ceil(fragment) as usize;
    let mut staged: Vec<Box<Extent>> = Vec::new();
    staged
        .try_reserve_exact(count)
        .map_err(|_| ExtendError::InsufficientResources)?;

    let mut remaining = entries;
    let mut start = backing_start;
    for i in 0..count {
        let id = u32::try_from(first_id + i)
            .ok()
            .filter(|&id| id < u32::MAX)
            .ok_or(ExtendError::InsufficientResources)?;
        let capacity = remaining.min(fragment) as usize;
        let slots = capacity.next_multiple_of(config.entry_granularity);
        let extent = Extent::try_new(pool, ExtentId(id), slots, capacity, start, flags, protection)
            .ok_or(ExtendError::InsufficientResources)?;
        extent.update_occupied(data_pages);
        if let Some(prev) = staged.last() {
            prev.link_next(extent.id());
        }
        staged.push(extent);
        remaining -= capacity as u64;
        start += capacity as u64;
    }
    Ok(staged)
}

impl Mapping {
    /// 把段扩展到至少 `new_size` 字节，返回扩展后的逻辑大小
    ///
    /// 请求不大于当前大小且段未被清除过时什么也不做。`ignore_backing_size_check`
    /// 为真时不查询也不设置后备存储大小，整个新区间都视为有数据。
    pub fn extend(&self, new_size: u64, ignore_backing_size_check: bool) -> Result<u64, ExtendError> {
        let config = self.manager().config();
        let page = page_size() as u64;
        let target = new_size
            .div_ceil(page)
            .checked_mul(page)
            .filter(|&target| target <= config.maximum_section_size)
            .ok_or(ExtendError::TooLarge)?;

        let wanted = {
            let _extend = self.extend_lock.lock();
            let current = self.logical_size();
            if target <= current && !self.was_purged() {
                return Ok(current);
            }
            target.max(current)
        };

        // 后备存储操作可能睡眠，不能持有扩展锁
        let data_size = if ignore_backing_size_check {
            wanted
        } else {
            self.ensure_backing_size(wanted)?
        };
        let data_pages = data_size.div_ceil(page);

        let _extend = self.extend_lock.lock();
        let current = self.logical_size();
        if target <= current {
            for extent in self.chain.iter() {
                extent.update_occupied(data_pages);
            }
            self.was_purged.store(false, Ordering::Release);
            return Ok(current);
        }
        // 失败时清除标记保持不变，下一次扩展仍会复查后备存储
        self.grow_chain(target, data_pages)?;
        self.was_purged.store(false, Ordering::Release);
        Ok(self.logical_size())
    }

    /// 保证后备存储至少有 `size` 字节，返回其实际大小
    fn ensure_backing_size(&self, size: u64) -> Result<u64, ExtendError> {
        let policy = self.manager().config().backing_store_retry;
        let current = retry_backing(policy, || self.backing.query_size())?;
        if current >= size {
            return Ok(current);
        }
        retry_backing(policy, || self.backing.set_size(size))?;
        Ok(size)
    }

    /// 增长链以容纳 `target` 字节，调用者持有扩展锁
    fn grow_chain(&self, target: u64, data_pages: u64) -> Result<(), ExtendError> {
        let mm = self.manager();
        let needed = target / page_size() as u64;
        let mut required = needed - self.total_entries();

        let tail = self.chain.tail_from(self.last_extent());
        let absorbed = required.min(tail.unused() as u64) as usize;
        required -= absorbed as u64;

        let staged = if required > 0 {
            stage_extents(
                mm.pool(),
                mm.config(),
                self.chain.len(),
                tail.backing_start() + tail.slots() as u64,
                required,
                data_pages,
                tail.flags(),
                self.protection(),
            )
            .inspect_err(|_| {
                log::warn!("section {}: cannot stage {} entries, rolled back", self.id(), required)
            })?
        } else {
            Vec::new()
        };

        // 已有视图时新节点必须带条目数组；先看一眼，发布时还会复查
        let mut with_entries = false;
        if !staged.is_empty() && self.mapped_views() > 0 {
            self.allocate_staged_entries(&staged)?;
            with_entries = true;
        }
        if self.chain.reserve(mm.pool(), staged.len()).is_none() {
            log::warn!("section {}: cannot grow extent arena, rolled back", self.id());
            return Err(ExtendError::InsufficientResources);
        }

        loop {
            let mut pfn = mm.lock_pfn();
            let views = self.mapped_views();
            if views > 0 && !staged.is_empty() && !with_entries {
                // 第一次发布失败：有视图但新节点没有条目数组；锁外补齐后重试
                drop(pfn);
                self.allocate_staged_entries(&staged)?;
                with_entries = true;
                continue;
            }

            let classification = if views == 0 {
                Classification::Dynamic
            } else {
                Classification::Static
            };
            tail.absorb_unused(absorbed, &pfn);
            tail.update_occupied(data_pages);

            let mut first_new = None;
            let mut last = tail.id();
            for extent in staged {
                extent.set_classification(classification, &pfn);
                let extent = self.chain.install(extent);
                first_new.get_or_insert(extent.id());
                last = extent.id();
                if classification == Classification::Dynamic {
                    pfn.queue_unused(self.weak(), extent);
                }
            }
            if let Some(first_new) = first_new {
                // 新节点完全初始化之后才对无锁读者可见
                fence(Ordering::Release);
                tail.link_next(first_new);
            }

            self.last_extent.store(last.0, Ordering::Release);
            self.total_entries.store(needed, Ordering::Release);
            self.logical_size.store(target, Ordering::Release);
            log::debug!(
                "section {}: extended to {} bytes, absorbed {}, {} extents {:?}",
                self.id(),
                target,
                absorbed,
                self.chain.len(),
                classification
            );
            return Ok(());
        }
    }

    /// 为暂存的每个节点分配条目数组
    fn allocate_staged_entries(&self, staged: &[Box<Extent>]) -> Result<(), ExtendError> {
        let pool = self.manager().pool();
        for extent in staged.iter() {
            if extent.has_entries() {
                continue;
            }
            let array = extent.allocate_entries(pool).ok_or_else(|| {
                log::warn!(
                    "section {}: no pool space for staged entries, rolled back",
                    self.id()
                );
                ExtendError::InsufficientResources
            })?;
            // 暂存节点尚未发布，安装不会冲突
            if extent.install_entries(array).is_err() {
                unreachable!("staged extent already has entries");
            }
        }
        Ok(())
    }
}

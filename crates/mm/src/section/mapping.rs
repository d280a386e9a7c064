//! 段（Mapping）与段句柄
//!
//! [`Mapping`] 描述一个后备文件的映射：逻辑大小、条目总数、Extent 链以及链尾缓存。
//! 所有视图共享同一个 `Arc<Mapping>`；用户句柄 [`SectionRef`] 另外维护一个句柄计数，
//! 句柄计数与视图计数同时归零时段进入拆除流程。
//!
//! 视图计数、句柄计数和 `purging` 只在低层状态锁下修改。

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;
use sync::SleepLock;

use super::chain::ExtentChain;
use super::entry::TranslationEntry;
use super::error::{ExtendError, MapError};
use super::extend::{retry_backing, stage_extents};
use super::extent::{Classification, Extent, ExtentFlags, ExtentId, ExtentInfo};
use crate::address::{page_size, Ppn};
use crate::file::BackingStore;
use crate::frame_allocator::PageOwner;
use crate::manager::{MemoryManager, PfnState};
use crate::page_table::Protection;

bitflags! {
    /// 段属性
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionAttributes: u8 {
        /// 内容为全局共享：最后一个引用消失时清除
        const GLOBAL_MEMORY = 1 << 0;
    }
}

/// 视图起点：第一个条目所在的 Extent 与下标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef {
    /// 所在 Extent
    pub extent: ExtentId,
    /// Extent 内的下标
    pub index: usize,
}

/// 一个后备文件的映射
pub struct Mapping {
    id: u64,
    me: Weak<Mapping>,
    mm: Arc<MemoryManager>,
    pub(super) backing: Arc<dyn BackingStore>,
    attributes: SectionAttributes,
    protection: Protection,
    /// 扩展锁：串行化链的修改，可以睡眠
    pub(super) extend_lock: SleepLock<()>,
    pub(super) logical_size: AtomicU64,
    pub(super) total_entries: AtomicU64,
    pub(super) chain: ExtentChain,
    pub(super) last_extent: AtomicU32,
    pub(super) was_purged: AtomicBool,
    mapped_views: AtomicUsize,
    user_refs: AtomicUsize,
    pub(super) purging: AtomicBool,
}

impl MemoryManager {
    /// 为后备存储创建一个段
    ///
    /// `size` 为 `None` 时使用后备存储的当前大小；给出且大于文件时先把文件扩大。
    /// 初始的 Extent 全部为 Dynamic，且不带条目数组。
    pub fn create_section(
        self: &Arc<Self>,
        backing: Arc<dyn BackingStore>,
        size: Option<u64>,
        protection: Protection,
        attributes: SectionAttributes,
    ) -> Result<SectionRef, ExtendError> {
        let config = self.config();
        let page = page_size() as u64;
        // 上限按页对齐后的大小比较，与链实际覆盖的范围一致
        let fits = |size: u64| {
            size.div_ceil(page)
                .checked_mul(page)
                .is_some_and(|rounded| rounded <= config.maximum_section_size)
        };
        if size.is_some_and(|size| !fits(size)) {
            return Err(ExtendError::TooLarge);
        }

        let file_size = retry_backing(config.backing_store_retry, || backing.query_size())?;
        let logical_size = match size {
            Some(size) => {
                if file_size < size {
                    retry_backing(config.backing_store_retry, || backing.set_size(size))?;
                }
                size
            }
            None => file_size,
        };
        if !fits(logical_size) {
            return Err(ExtendError::TooLarge);
        }

        let entries = logical_size.div_ceil(page);
        let data_pages = file_size.max(logical_size).div_ceil(page);
        let flags = if attributes.contains(SectionAttributes::GLOBAL_MEMORY) {
            ExtentFlags::GLOBAL_MEMORY
        } else {
            ExtentFlags::empty()
        };

        let staged = if entries == 0 {
            let head = Extent::try_new(self.pool(), ExtentId::HEAD, 0, 0, 0, flags, protection)
                .ok_or(ExtendError::InsufficientResources)?;
            let mut staged = Vec::new();
            staged
                .try_reserve(1)
                .map_err(|_| ExtendError::InsufficientResources)?;
            staged.push(head);
            staged
        } else {
            stage_extents(self.pool(), config, 0, 0, entries, data_pages, flags, protection)?
        };

        let mapping = Arc::new_cyclic(|me| Mapping {
            id: self.allocate_mapping_id(),
            me: me.clone(),
            mm: self.clone(),
            backing,
            attributes,
            protection,
            extend_lock: SleepLock::new(()),
            logical_size: AtomicU64::new(entries * page),
            total_entries: AtomicU64::new(entries),
            chain: ExtentChain::new(),
            last_extent: AtomicU32::new(0),
            was_purged: AtomicBool::new(false),
            mapped_views: AtomicUsize::new(0),
            user_refs: AtomicUsize::new(1),
            purging: AtomicBool::new(false),
        });

        mapping
            .chain
            .reserve(self.pool(), staged.len())
            .ok_or(ExtendError::InsufficientResources)?;
        let mut last = ExtentId::HEAD;
        for extent in staged {
            last = mapping.chain.install(extent).id();
        }
        mapping.last_extent.store(last.0, Ordering::Release);

        log::debug!(
            "section {}: created, {} bytes in {} extents",
            mapping.id,
            mapping.logical_size(),
            mapping.chain.len()
        );
        Ok(SectionRef { mapping })
    }
}

impl Mapping {
    /// 段编号
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 所属的内存管理器
    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.mm
    }

    /// 属性
    pub fn attributes(&self) -> SectionAttributes {
        self.attributes
    }

    /// 段的最大保护属性
    pub fn protection(&self) -> Protection {
        self.protection
    }

    /// 逻辑大小（字节，页对齐）
    pub fn logical_size(&self) -> u64 {
        self.logical_size.load(Ordering::Acquire)
    }

    /// 计入段的条目总数
    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::Acquire)
    }

    /// Extent 链
    pub fn chain(&self) -> &ExtentChain {
        &self.chain
    }

    /// 链尾缓存
    pub fn last_extent(&self) -> ExtentId {
        ExtentId(self.last_extent.load(Ordering::Acquire))
    }

    /// 链上所有 Extent 的快照
    pub fn extents(&self) -> Vec<ExtentInfo> {
        self.chain.iter().map(Extent::info).collect()
    }

    /// 映射了该段的视图数
    pub fn mapped_views(&self) -> usize {
        self.mapped_views.load(Ordering::Acquire)
    }

    /// 用户句柄数
    pub fn user_refs(&self) -> usize {
        self.user_refs.load(Ordering::Acquire)
    }

    /// 自上次扩展以来是否被清除过
    pub fn was_purged(&self) -> bool {
        self.was_purged.load(Ordering::Acquire)
    }

    pub(crate) fn weak(&self) -> &Weak<Mapping> {
        &self.me
    }

    /// 条目 (extent, index) 上的驻留页应当回指的位置
    pub(crate) fn owner_of(&self, extent: ExtentId, index: usize) -> PageOwner {
        PageOwner {
            mapping: self.id,
            extent: extent.0,
            index,
        }
    }

    /// 检查驻留页的回指；不一致说明条目或页帧数据库已损坏
    pub(crate) fn check_owner(&self, pfn: &PfnState, ppn: Ppn, extent: ExtentId, index: usize) {
        let owner = pfn.frames.frame(ppn).owner;
        if owner != Some(self.owner_of(extent, index)) {
            panic!(
                "section {}: page {} back-link {:?} does not match entry {:?}[{}]",
                self.id, ppn, owner, extent, index
            );
        }
    }

    /// 为一个新视图增加计数，返回视图第一个条目的位置
    ///
    /// 先增加段的视图计数，再沿链给覆盖范围内（最多到链尾）的每个 Extent 增加计数，
    /// 这样并发的扩展一定能看到这个视图。缺少条目数组的 Extent 在锁外补齐，
    /// 分配失败时撤销已经增加的全部计数。
    pub(crate) fn reference_view(&self, offset: u64, pages: u64) -> Result<EntryRef, MapError> {
        let (first, last) = {
            let pfn = self.mm.lock_pfn();
            if self.purging.load(Ordering::Acquire) {
                return Err(MapError::SectionBusy);
            }
            let Some((extent, index)) = self.chain.locate(offset) else {
                return Err(MapError::InvalidParameter);
            };
            self.mapped_views.fetch_add(1, Ordering::AcqRel);

            let first = EntryRef {
                extent: extent.id(),
                index,
            };
            let mut remaining = index as u64 + pages;
            let mut extent = extent;
            loop {
                extent.add_view(&pfn);
                let capacity = extent.capacity() as u64;
                if remaining <= capacity {
                    break;
                }
                remaining -= capacity;
                match extent.next() {
                    Some(next) => extent = self.chain.get(next),
                    None => break,
                }
            }
            (first, extent.id())
        };

        for id in first.extent.0..=last.0 {
            let extent = self.chain.get(ExtentId(id));
            if extent.has_entries() {
                continue;
            }
            let Some(array) = extent.allocate_entries(self.mm.pool()) else {
                log::warn!(
                    "section {}: no pool space for entries of {:?}, undoing view",
                    self.id,
                    extent.id()
                );
                self.decrement_extents(first.extent, last);
                self.dereference_view();
                return Err(MapError::InsufficientResources);
            };
            // 另一个视图抢先安装时丢弃自己的
            drop(extent.install_entries(array));
        }
        Ok(first)
    }

    /// 给 `first..=last` 上的每个 Extent 减少一个视图计数
    ///
    /// Dynamic 的 Extent 计数归零后进入延迟回收队列。
    pub(crate) fn decrement_extents(&self, first: ExtentId, last: ExtentId) {
        let mut pfn = self.mm.lock_pfn();
        for id in first.0..=last.0 {
            let extent = self.chain.get(ExtentId(id));
            let remaining = extent.remove_view(&pfn);
            if remaining == 0 && extent.classification() == Classification::Dynamic {
                pfn.queue_unused(&self.me, extent);
            }
        }
    }

    /// 减少段的视图计数
    ///
    /// 归零时所有 Static 的 Extent 转为 Dynamic，带条目数组的进入回收队列；
    /// 若同时已没有用户句柄则拆除段。
    pub(crate) fn dereference_view(&self) {
        let teardown = {
            let mut pfn = self.mm.lock_pfn();
            let remaining = self.mapped_views.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining == 0 {
                self.convert_static_extents(&mut pfn);
            }
            remaining == 0 && self.user_refs() == 0
        };
        if teardown {
            self.teardown();
        }
    }

    fn convert_static_extents(&self, pfn: &mut PfnState) {
        for extent in self.chain.iter() {
            if extent.classification() != Classification::Static {
                continue;
            }
            if let Err(err) = extent.convert_to_dynamic(pfn) {
                panic!(
                    "section {}: {:?} still has {} views after the last view went away",
                    self.id,
                    extent.id(),
                    err.active_views
                );
            }
            log::trace!("section {}: {:?} is dynamic again", self.id, extent.id());
            pfn.queue_unused(&self.me, extent);
        }
    }

    /// 最后一个视图与句柄都已消失
    fn teardown(&self) {
        log::debug!("section {}: no views or handles left", self.id);
        if self.attributes.contains(SectionAttributes::GLOBAL_MEMORY) {
            let _extend = self.extend_lock.lock();
            self.purge_contents();
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // 驻留页脱离段；无人使用的立即归还，其余等最后的引用释放
        let mut pfn = self.mm.lock_pfn();
        for extent in self.chain.iter() {
            // SAFETY: 段已无任何引用，独占整个链
            let Some(entries) = (unsafe { extent.entries() }) else {
                continue;
            };
            for (index, cell) in entries.iter().enumerate() {
                if let TranslationEntry::Transition { ppn, .. } = cell.load() {
                    self.check_owner(&pfn, ppn, extent.id(), index);
                    pfn.frames.unlink_page(ppn, false);
                }
            }
        }
    }
}

/// 用户持有的段句柄
///
/// 克隆增加句柄计数，Drop 减少；最后一个句柄关闭且没有视图时拆除段。
pub struct SectionRef {
    mapping: Arc<Mapping>,
}

impl SectionRef {
    /// 句柄指向的段
    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }
}

impl Deref for SectionRef {
    type Target = Mapping;

    fn deref(&self) -> &Mapping {
        &self.mapping
    }
}

impl Clone for SectionRef {
    fn clone(&self) -> Self {
        let _pfn = self.mapping.mm.lock_pfn();
        self.mapping.user_refs.fetch_add(1, Ordering::AcqRel);
        Self {
            mapping: self.mapping.clone(),
        }
    }
}

impl Drop for SectionRef {
    fn drop(&mut self) {
        let teardown = {
            let _pfn = self.mapping.mm.lock_pfn();
            let remaining = self.mapping.user_refs.fetch_sub(1, Ordering::AcqRel) - 1;
            remaining == 0 && self.mapping.mapped_views() == 0
        };
        if teardown {
            self.mapping.teardown();
        }
    }
}

impl SectionRef {
    /// 除调用者的句柄外是否还有其它用户，调用者须持有低层状态锁
    pub(super) fn has_other_users(&self, _pfn: &PfnState) -> bool {
        self.mapping.user_refs() > 1 || self.mapping.mapped_views() > 0
    }
}

//! Shared setup for the mm integration tests: trait registration over the
//! test-support mocks, a mock backing file and small helpers.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use mm::{
    ArchMmOps, BackingStore, BackingStoreError, MemoryManager, MmConfig, Ppn, Process,
    Protection, RadixPageTable, SectionAttributes, SectionConfig, SectionRef, Vpn,
};
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::mm::{MOCK_MM_CONFIG, MOCK_MM_OPS};
use test_support::mock::store::{MockBackingStore, StoreFault};

pub const PAGE: u64 = 4096;

static INIT: Once = Once::new();

struct TestArch;

impl sync::ArchOps for TestArch {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.read_and_disable_interrupts() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore_interrupts(flags) }
    }

    fn sstatus_sie(&self) -> usize {
        MOCK_ARCH_OPS.sstatus_sie()
    }

    fn yield_now(&self) {
        MOCK_ARCH_OPS.note_yield();
        std::thread::yield_now();
    }

    fn cpu_id(&self) -> usize {
        MOCK_ARCH_OPS.cpu_id()
    }

    fn max_cpu_count(&self) -> usize {
        MOCK_ARCH_OPS.max_cpu_count()
    }
}

impl ArchMmOps for TestArch {
    fn flush_tlb_page(&self, vpn: Vpn) {
        MOCK_MM_OPS.flush_tlb_page(vpn.0);
    }

    fn flush_tlb_all(&self) {
        MOCK_MM_OPS.flush_tlb_all();
    }

    fn delay_short(&self) {
        MOCK_MM_OPS.delay_short();
        std::thread::yield_now();
    }
}

impl MmConfig for TestArch {
    fn page_size(&self) -> usize {
        MOCK_MM_CONFIG.page_size()
    }

    fn user_va_start(&self) -> usize {
        MOCK_MM_CONFIG.user_va_start()
    }

    fn user_va_end(&self) -> usize {
        MOCK_MM_CONFIG.user_va_end()
    }
}

static TEST_ARCH: TestArch = TestArch;

pub fn init() {
    INIT.call_once(|| unsafe {
        sync::register_arch_ops(&TEST_ARCH);
        mm::register_arch_ops(&TEST_ARCH);
        mm::register_config(&TEST_ARCH);
    });
}

/// A backing file that only tracks its size.
pub struct FileBacking(pub MockBackingStore);

impl FileBacking {
    pub fn new(size: u64) -> Arc<Self> {
        Arc::new(Self(MockBackingStore::new(size)))
    }
}

fn to_store_error(fault: StoreFault) -> BackingStoreError {
    match fault {
        StoreFault::Conflict => BackingStoreError::LockConflict,
        StoreFault::Io(errno) => BackingStoreError::Io(errno),
    }
}

impl BackingStore for FileBacking {
    fn query_size(&self) -> Result<u64, BackingStoreError> {
        self.0.query_size().map_err(to_store_error)
    }

    fn set_size(&self, size: u64) -> Result<(), BackingStoreError> {
        self.0.set_size(size).map_err(to_store_error)
    }
}

/// Two entries per extent, no rounding: small sizes already span several extents.
pub fn small_config() -> SectionConfig {
    SectionConfig {
        allocation_fragment: 2,
        entry_granularity: 1,
        ..SectionConfig::default()
    }
}

pub fn manager(config: SectionConfig) -> Arc<MemoryManager> {
    manager_with_frames(config, 1024)
}

pub fn manager_with_frames(config: SectionConfig, frames: usize) -> Arc<MemoryManager> {
    init();
    MemoryManager::new(config, Ppn(0x10_000), frames, usize::MAX)
}

pub fn process(mm: &Arc<MemoryManager>) -> Process<RadixPageTable> {
    Process::new(mm, RadixPageTable::new).unwrap()
}

pub fn section(
    mm: &Arc<MemoryManager>,
    pages: u64,
    attributes: SectionAttributes,
) -> (Arc<FileBacking>, SectionRef) {
    let file = FileBacking::new(pages * PAGE);
    let section = mm
        .create_section(file.clone(), None, Protection::READ | Protection::WRITE, attributes)
        .unwrap();
    (file, section)
}

/// Sum of extent capacities must always equal the mapping's entry count.
pub fn assert_chain_consistent(section: &SectionRef) {
    let extents = section.extents();
    let capacity: u64 = extents.iter().map(|e| e.capacity as u64).sum();
    assert_eq!(capacity, section.total_entries());
    assert_eq!(section.logical_size(), section.total_entries() * PAGE);
    for e in &extents {
        assert!(e.occupied <= e.capacity);
    }
    for pair in extents.windows(2) {
        assert_eq!(pair[0].sector_range.end, pair[1].sector_range.start);
    }
    assert_eq!(extents.last().unwrap().id, section.last_extent());
}

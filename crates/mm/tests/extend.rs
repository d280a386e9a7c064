//! 段扩展的集成测试

mod common;

use common::{PAGE, assert_chain_consistent, manager, process, section, small_config};
use std::ptr;

use mm::{
    Classification, EntryCell, ExtendError, PageNum, Protection, SectionAttributes, SectionConfig, ViewKind,
    extend_mapping,
};
use test_support::mock::mm::MOCK_MM_OPS;

#[test]
fn test_extend_without_views_appends_dynamic_extents() {
    let mm = manager(small_config());
    let (file, s) = section(&mm, 1, SectionAttributes::empty());
    assert_eq!(s.extents().len(), 1);

    assert_eq!(s.extend(3 * PAGE, false), Ok(3 * PAGE));
    assert_eq!(file.0.size(), 3 * PAGE);

    let extents = s.extents();
    assert_eq!(extents.len(), 2);
    let new = &extents[1];
    assert_eq!(new.classification, Classification::Dynamic);
    assert_eq!(new.capacity, 2);
    assert_eq!(new.occupied, 2);
    assert!(!new.has_entries);
    assert_eq!(s.last_extent(), new.id);
    assert_chain_consistent(&s);
}

#[test]
fn test_extend_with_view_appends_static_extents() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let p = process(&mm);
    let addr = p
        .map_view(&s, 0, PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();

    s.extend(3 * PAGE, false).unwrap();
    let extents = s.extents();
    assert_eq!(extents.len(), 2);
    assert_eq!(extents[1].classification, Classification::Static);
    assert!(extents[1].has_entries);
    assert_chain_consistent(&s);

    // 最后一个视图消失后重新变为 Dynamic，并带着条目数组进入回收队列
    p.unmap_view_at(addr).unwrap();
    let extents = s.extents();
    assert!(extents.iter().all(|e| e.classification == Classification::Dynamic));
    assert!(extents.iter().all(|e| e.active_views == 0));
    assert_eq!(mm.unused_queue_len(), 2);
}

#[test]
fn test_extend_absorbs_tail_unused_first() {
    let config = SectionConfig {
        allocation_fragment: 8,
        entry_granularity: 4,
        ..SectionConfig::default()
    };
    let mm = manager(config);
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    assert_eq!(s.extents()[0].unused, 3);

    s.extend(3 * PAGE, false).unwrap();
    let extents = s.extents();
    assert_eq!(extents.len(), 1);
    assert_eq!(extents[0].capacity, 3);
    assert_eq!(extents[0].unused, 1);

    // 吸收剩下的 1 个，再追加 8 + 2（取整到 4）
    s.extend(14 * PAGE, false).unwrap();
    let extents = s.extents();
    assert_eq!(extents.len(), 3);
    assert_eq!(extents[0].capacity, 4);
    assert_eq!(extents[0].unused, 0);
    assert_eq!(extents[1].capacity, 8);
    assert_eq!(extents[2].capacity, 2);
    assert_eq!(extents[2].unused, 2);
    assert_chain_consistent(&s);
}

#[test]
fn test_extend_below_current_size_is_noop() {
    let mm = manager(small_config());
    let (file, s) = section(&mm, 4, SectionAttributes::empty());
    let queries = file.0.query_count();

    assert_eq!(s.extend(2 * PAGE, false), Ok(4 * PAGE));
    assert_eq!(s.extend(4 * PAGE, false), Ok(4 * PAGE));
    assert_eq!(file.0.query_count(), queries);
    assert_eq!(s.extents().len(), 2);
}

#[test]
fn test_extend_rounds_up_to_page() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    assert_eq!(s.extend(PAGE + 1, false), Ok(2 * PAGE));
    assert_eq!(s.total_entries(), 2);
}

#[test]
fn test_extend_too_large_changes_nothing() {
    let config = SectionConfig {
        maximum_section_size: 16 * PAGE,
        ..small_config()
    };
    let mm = manager(config);
    let (file, s) = section(&mm, 2, SectionAttributes::empty());
    let queries = file.0.query_count();

    assert_eq!(s.extend(16 * PAGE + 1, false), Err(ExtendError::TooLarge));
    assert_eq!(s.logical_size(), 2 * PAGE);
    assert_eq!(s.extents().len(), 1);
    assert_eq!(file.0.query_count(), queries);
    assert_eq!(s.extend(16 * PAGE, false), Ok(16 * PAGE));
}

#[test]
fn test_ceiling_applies_to_page_rounded_size() {
    let config = SectionConfig {
        maximum_section_size: 16 * PAGE + 100,
        ..small_config()
    };
    let mm = manager(config);
    let (_file, s) = section(&mm, 2, SectionAttributes::empty());

    assert_eq!(s.extend(16 * PAGE + 1, false), Err(ExtendError::TooLarge));
    assert_eq!(s.logical_size(), 2 * PAGE);
    assert_eq!(s.extend(16 * PAGE, false), Ok(16 * PAGE));

    let file = common::FileBacking::new(0);
    assert_eq!(
        mm.create_section(file, Some(16 * PAGE + 1), Protection::READ, SectionAttributes::empty())
            .err(),
        Some(ExtendError::TooLarge)
    );
}

#[test]
fn test_extend_growth_is_monotonic() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let mut last = s.logical_size();
    for pages in [5, 3, 9, 9, 2, 17] {
        let size = s.extend(pages * PAGE, false).unwrap();
        assert!(size >= last);
        assert!(size >= pages * PAGE);
        last = size;
        assert_chain_consistent(&s);
    }
    assert_eq!(last, 17 * PAGE);
}

#[test]
fn test_extend_can_skip_backing_store() {
    let mm = manager(small_config());
    let (file, s) = section(&mm, 1, SectionAttributes::empty());
    let queries = file.0.query_count();
    let resizes = file.0.resize_count();

    // 不查询也不设置后备存储，整个新区间都视为有数据
    s.extend(3 * PAGE, true).unwrap();
    assert_eq!(file.0.size(), PAGE);
    assert_eq!(file.0.query_count(), queries);
    assert_eq!(file.0.resize_count(), resizes);
    assert_eq!(s.extents()[1].occupied, 2);

    // 文件已经够大时只查询不设置
    file.0.set_size(8 * PAGE).unwrap();
    let resizes = file.0.resize_count();
    s.extend(5 * PAGE, false).unwrap();
    assert_eq!(file.0.resize_count(), resizes);
    assert_eq!(file.0.size(), 8 * PAGE);
    assert_chain_consistent(&s);
}

#[test]
fn test_extend_rollback_under_pool_pressure() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let p = process(&mm);
    p.map_view(&s, 0, 64 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();

    let before = s.extents();
    let used = mm.pool().used();
    let mut limit = used;
    let grown = loop {
        mm.pool().set_limit(limit);
        match s.extend(40 * PAGE, true) {
            Ok(size) => break size,
            Err(err) => {
                assert_eq!(err, ExtendError::InsufficientResources);
                assert_eq!(mm.pool().used(), used, "leak at limit {}", limit);
                assert_eq!(s.extents(), before);
                assert_eq!(s.logical_size(), PAGE);
                limit += 64;
            }
        }
    };
    assert_eq!(grown, 40 * PAGE);
    assert!(mm.pool().failures() > 0);
    assert_chain_consistent(&s);
    assert!(s.extents()[1..].iter().all(|e| e.has_entries));
}

#[test]
fn test_extend_backing_conflict_retries() {
    let mm = manager(small_config());
    let (file, s) = section(&mm, 1, SectionAttributes::empty());
    let delays = MOCK_MM_OPS.delay_count();

    // 两次冲突之后第三次成功
    file.0.inject_conflicts(2);
    assert_eq!(s.extend(2 * PAGE, false), Ok(2 * PAGE));
    assert!(MOCK_MM_OPS.delay_count() >= delays + 2);

    // 默认最多尝试三次
    file.0.inject_conflicts(3);
    let queries = file.0.query_count();
    assert_eq!(
        s.extend(4 * PAGE, false),
        Err(ExtendError::BackingStoreConflict)
    );
    assert_eq!(file.0.query_count(), queries + 3);
    assert_eq!(s.logical_size(), 2 * PAGE);
}

#[test]
fn test_extend_io_error_is_not_retried() {
    let mm = manager(small_config());
    let (file, s) = section(&mm, 1, SectionAttributes::empty());
    file.0.inject_io_error(-5);
    let queries = file.0.query_count();
    assert_eq!(s.extend(2 * PAGE, false), Err(ExtendError::Io(-5)));
    assert_eq!(file.0.query_count(), queries + 1);
    assert_eq!(s.total_entries(), 1);
}

#[test]
fn test_extend_mapping_validates_arguments() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    assert_eq!(extend_mapping(None, 4096), Err(ExtendError::InvalidParameter));
    assert_eq!(extend_mapping(Some(&s), -1), Err(ExtendError::InvalidParameter));
    assert_eq!(extend_mapping(Some(&s), 3 * PAGE as i64), Ok(3 * PAGE));
    assert_eq!(
        extend_mapping(Some(&s), i64::MAX),
        Err(ExtendError::TooLarge)
    );
    assert_eq!(ExtendError::TooLarge.to_errno(), -27);
}

#[test]
fn test_empty_section_grows_from_zero() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 0, SectionAttributes::empty());
    assert_eq!(s.total_entries(), 0);
    assert_eq!(s.extents().len(), 1);

    s.extend(3 * PAGE, false).unwrap();
    let extents = s.extents();
    assert_eq!(extents.len(), 3);
    assert_eq!(extents[0].capacity, 0);
    assert_chain_consistent(&s);
}

#[test]
fn test_view_sees_extension_concurrently() {
    use std::sync::Arc;
    use std::thread;

    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let p = Arc::new(process(&mm));
    let addr = p
        .map_view(&s, 0, 32 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();

    let s = Arc::new(s);
    let grower = {
        let s = s.clone();
        thread::spawn(move || {
            for pages in 2..=32 {
                s.extend(pages * PAGE, true).unwrap();
            }
        })
    };
    let reader = {
        let p = p.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let view = p.find_view(addr).unwrap();
                let visible = (0..32)
                    .take_while(|&page| view.locate_entry(view.range().start.add(page)).is_some())
                    .count();
                assert!(visible >= 1);
            }
        })
    };
    grower.join().unwrap();
    reader.join().unwrap();

    let view = p.find_view(addr).unwrap();
    for page in 0..32 {
        assert!(view.locate_entry(view.range().start.add(page)).is_some());
    }
    assert_chain_consistent(&s);
    drop(view);
    p.unmap_view_at(addr).unwrap();
    assert!(s.extents().iter().all(|e| e.active_views == 0));
}

fn entry_addresses(view: &mm::View, pages: core::ops::Range<usize>) -> Vec<*const EntryCell> {
    pages
        .map(|page| {
            let cell = view.locate_entry(view.range().start.add(page)).unwrap();
            cell as *const EntryCell
        })
        .collect()
}

#[test]
fn test_view_keeps_entries_across_static_extension() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 3, SectionAttributes::empty());
    let p = process(&mm);
    let addr = p
        .map_view(&s, 0, 12 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    let view = p.find_view(addr).unwrap();

    let before = entry_addresses(&view, 0..3);
    s.extend(8 * PAGE, false).unwrap();
    assert_eq!(entry_addresses(&view, 0..3), before);

    let appended = entry_addresses(&view, 3..8);
    s.extend(12 * PAGE, false).unwrap();
    assert_eq!(entry_addresses(&view, 0..3), before);
    assert_eq!(entry_addresses(&view, 3..8), appended);
    assert!(view.locate_entry(view.range().start.add(11)).is_some());
}

#[test]
fn test_view_keeps_entries_when_tail_absorbs() {
    let config = SectionConfig {
        allocation_fragment: 8,
        entry_granularity: 4,
        ..SectionConfig::default()
    };
    let mm = manager(config);
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let p = process(&mm);
    let addr = p
        .map_view(&s, 0, 4 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    let view = p.find_view(addr).unwrap();
    let first = entry_addresses(&view, 0..1)[0];
    assert!(view.locate_entry(view.range().start.add(1)).is_none());

    s.extend(3 * PAGE, false).unwrap();
    assert_eq!(s.extents().len(), 1);
    let after = entry_addresses(&view, 0..3);
    assert!(ptr::eq(after[0], first));
    // 吸收的条目位于同一个数组中，紧跟原来的条目
    assert!(ptr::eq(after[1], first.wrapping_add(1)));
    assert!(ptr::eq(after[2], first.wrapping_add(2)));
}

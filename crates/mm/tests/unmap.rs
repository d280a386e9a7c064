//! 视图映射、缺页与解除的集成测试

mod common;

use common::{PAGE, manager, manager_with_frames, process, section, small_config};
use mm::{
    Classification, FaultError, MapError, PageList, Protection, RadixPageTable,
    SectionAttributes, UnmapError, ViewKind, ViewState, unmap_view,
};
use test_support::mock::mm::MOCK_MM_OPS;

#[test]
fn test_map_view_counts_extents() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 6, SectionAttributes::empty());
    let p = process(&mm);

    // 第 3 页起 3 页：落在 Extent 1、2
    let addr = p
        .map_view(&s, 3 * PAGE, 3 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    assert_eq!(s.mapped_views(), 1);
    let views: Vec<isize> = s.extents().iter().map(|e| e.active_views).collect();
    assert_eq!(views, [0, 1, 1]);
    let entries: Vec<bool> = s.extents().iter().map(|e| e.has_entries).collect();
    assert_eq!(entries, [false, true, true]);

    let view = p.find_view(addr).unwrap();
    assert_eq!(view.start_address(), addr);
    assert_eq!(view.range().len(), 3);
    assert_eq!(view.first_entry().index, 1);

    p.unmap_view_at(addr).unwrap();
    assert_eq!(view.state(), ViewState::Released);
    assert_eq!(s.mapped_views(), 0);
    assert!(s.extents().iter().all(|e| e.active_views == 0));
    assert!(p.find_view(addr).is_none());
}

#[test]
fn test_map_view_rejects_bad_arguments() {
    let mm = manager(small_config());
    let file = common::FileBacking::new(2 * PAGE);
    let s = mm
        .create_section(file, None, Protection::READ, SectionAttributes::empty())
        .unwrap();
    let p = process(&mm);

    assert_eq!(
        p.map_view(&s, 0, 0, Protection::READ, ViewKind::Normal),
        Err(MapError::InvalidParameter)
    );
    assert_eq!(
        p.map_view(&s, 100, PAGE, Protection::READ, ViewKind::Normal),
        Err(MapError::InvalidParameter)
    );
    assert_eq!(
        p.map_view(&s, 0, PAGE, Protection::READ | Protection::WRITE, ViewKind::Normal),
        Err(MapError::InvalidParameter)
    );
    assert_eq!(
        p.map_view(&s, 2 * PAGE, PAGE, Protection::READ, ViewKind::Normal),
        Err(MapError::InvalidParameter)
    );
    assert_eq!(s.mapped_views(), 0);
}

#[test]
fn test_views_get_disjoint_ranges() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 4, SectionAttributes::empty());
    let p = process(&mm);

    let a = p
        .map_view(&s, 0, 2 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    let b = p
        .map_view(&s, 0, 4 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    assert_eq!(b, a + 2 * PAGE as usize);

    // 释放的区间可以重新使用
    p.unmap_view_at(a).unwrap();
    let c = p
        .map_view(&s, 2 * PAGE, PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    assert_eq!(c, a);
    assert_eq!(s.mapped_views(), 2);
}

#[test]
fn test_fault_then_unmap_releases_translations() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 4, SectionAttributes::empty());
    let p = process(&mm);
    assert_eq!(mm.frames_on(PageList::PageTable), 1);

    let addr = p
        .map_view(&s, 0, 4 * PAGE, Protection::READ | Protection::WRITE, ViewKind::Normal)
        .unwrap();
    let clean = p.resolve_fault(addr, false).unwrap();
    let dirty = p.resolve_fault(addr + PAGE as usize, true).unwrap();
    // 已映射的页再次缺页返回同一页
    assert_eq!(p.resolve_fault(addr, false), Ok(clean));

    let frame = mm.frame_info(clean);
    assert_eq!(frame.list, PageList::Active);
    assert_eq!(frame.share_count, 1);
    assert!(frame.owner.is_some());
    assert_eq!(mm.frames_on(PageList::PageTable), 4);

    let flushes = MOCK_MM_OPS.page_flush_count();
    p.unmap_view_at(addr).unwrap();
    assert!(MOCK_MM_OPS.page_flush_count() >= flushes + 2);

    // 页表只剩根，页面保留在段中等待复用
    assert_eq!(mm.frames_on(PageList::PageTable), 1);
    assert_eq!(mm.frame_info(clean).list, PageList::Standby);
    assert_eq!(mm.frame_info(dirty).list, PageList::Modified);
    assert_eq!(mm.frame_info(clean).share_count, 0);

    // 重新映射后命中同一个驻留页
    let addr = p
        .map_view(&s, 0, PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    assert_eq!(p.resolve_fault(addr, false), Ok(clean));
    assert_eq!(mm.frame_info(clean).list, PageList::Active);
}

#[test]
fn test_fault_checks_view_and_protection() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let p = process(&mm);

    assert_eq!(p.resolve_fault(0x1000_0000, false), Err(FaultError::NotMapped));
    let addr = p
        .map_view(&s, 0, 3 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    assert_eq!(p.resolve_fault(addr, true), Err(FaultError::AccessViolation));

    // 越过段末尾的部分在扩展之后才可访问
    let beyond = addr + 2 * PAGE as usize;
    assert_eq!(p.resolve_fault(beyond, false), Err(FaultError::AccessViolation));
    s.extend(3 * PAGE, false).unwrap();
    assert!(p.resolve_fault(beyond, false).is_ok());
    assert_eq!(s.extents()[1].classification, Classification::Static);
}

#[test]
fn test_unmap_twice_reports_not_mapped() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 2, SectionAttributes::empty());
    let p = process(&mm);
    let addr = p
        .map_view(&s, 0, 2 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    let view = p.find_view(addr).unwrap();

    p.unmap_view(&view).unwrap();
    assert_eq!(p.unmap_view(&view), Err(UnmapError::NotMapped));
    assert_eq!(p.unmap_view_at(addr), Err(UnmapError::NotMapped));
    assert_eq!(s.mapped_views(), 0);
    assert!(s.extents().iter().all(|e| e.active_views == 0));
}

#[test]
fn test_unmap_view_of_other_process() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 2, SectionAttributes::empty());
    let a = process(&mm);
    let b = process(&mm);
    let addr = a
        .map_view(&s, 0, PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    let view = a.find_view(addr).unwrap();

    assert_eq!(b.unmap_view(&view), Err(UnmapError::NotMapped));
    assert_eq!(view.state(), ViewState::Active);
    a.unmap_view(&view).unwrap();
}

#[test]
fn test_secured_view_survives_until_exit() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 2, SectionAttributes::empty());
    let p = process(&mm);
    let addr = p
        .map_view(&s, 0, 2 * PAGE, Protection::READ, ViewKind::Secured)
        .unwrap();
    p.resolve_fault(addr, false).unwrap();

    assert_eq!(p.unmap_view_at(addr), Err(UnmapError::AccessDenied));
    assert_eq!(UnmapError::AccessDenied.to_errno(), -13);
    assert_eq!(s.mapped_views(), 1);

    let view = p.find_view(addr).unwrap();
    p.terminate();
    assert!(p.is_terminating());
    assert_eq!(view.state(), ViewState::Released);
    assert_eq!(s.mapped_views(), 0);
    assert_eq!(mm.frames_on(PageList::PageTable), 1);

    assert_eq!(p.unmap_view_at(addr), Err(UnmapError::ProcessTerminating));
    assert_eq!(
        p.map_view(&s, 0, PAGE, Protection::READ, ViewKind::Normal),
        Err(MapError::ProcessTerminating)
    );
}

#[test]
fn test_process_drop_returns_all_table_pages() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 4, SectionAttributes::empty());
    let free = mm.free_frames();
    {
        let p = process(&mm);
        let addr = p
            .map_view(&s, 0, 4 * PAGE, Protection::READ, ViewKind::Normal)
            .unwrap();
        for page in 0..4 {
            p.resolve_fault(addr + page * PAGE as usize, false).unwrap();
        }
    }
    assert_eq!(mm.frames_on(PageList::PageTable), 0);
    assert_eq!(mm.frames_on(PageList::Standby), 4);
    assert_eq!(mm.free_frames(), free - 4);
    assert_eq!(s.mapped_views(), 0);
}

#[test]
fn test_unmap_view_validates_arguments() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let p = process(&mm);
    let addr = p
        .map_view(&s, 0, PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();

    assert_eq!(
        unmap_view::<RadixPageTable>(None, addr),
        Err(UnmapError::InvalidParameter)
    );
    assert_eq!(unmap_view(Some(&p), 0), Err(UnmapError::InvalidParameter));
    assert_eq!(
        unmap_view(Some(&p), 0x80_0000_0000),
        Err(UnmapError::InvalidParameter)
    );
    assert_eq!(
        unmap_view(Some(&p), addr + 16 * PAGE as usize),
        Err(UnmapError::NotMapped)
    );
    // 视图内任意地址都可以
    assert_eq!(unmap_view(Some(&p), addr + 5), Ok(()));
}

#[test]
fn test_unmap_after_extension_settles_static_counts() {
    let mm = manager(small_config());
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let p = process(&mm);
    let short = p
        .map_view(&s, 0, PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    let long = p
        .map_view(&s, 0, 8 * PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();

    s.extend(8 * PAGE, false).unwrap();
    assert!(s.extents()[1..]
        .iter()
        .all(|e| e.classification == Classification::Static && e.active_views == 0));

    // 长视图解除时按当时的链计算范围，Static 的计数可以变为负数
    p.unmap_view_at(long).unwrap();
    assert!(s.extents()[1..].iter().all(|e| e.active_views == -1));
    assert_eq!(s.extents()[0].active_views, 1);

    p.unmap_view_at(short).unwrap();
    let extents = s.extents();
    assert!(extents.iter().all(|e| e.classification == Classification::Dynamic));
    assert!(extents.iter().all(|e| e.active_views == 0));
}

#[test]
fn test_failed_fault_leaves_no_table_pages() {
    // 根页表 + 数据页 + 两级中间页表之后物理页耗尽
    let mm = manager_with_frames(small_config(), 4);
    let (_file, s) = section(&mm, 1, SectionAttributes::empty());
    let p = process(&mm);
    let addr = p
        .map_view(&s, 0, PAGE, Protection::READ, ViewKind::Normal)
        .unwrap();
    let free = mm.free_frames();

    assert_eq!(p.resolve_fault(addr, false), Err(FaultError::NoMemory));
    assert_eq!(mm.frames_on(PageList::PageTable), 1);
    // 数据页留在段中，中间页表页全部归还
    assert_eq!(mm.free_frames(), free - 1);

    p.unmap_view_at(addr).unwrap();
    assert_eq!(mm.frames_on(PageList::PageTable), 1);
    drop(p);
    assert_eq!(mm.frames_on(PageList::PageTable), 0);
    assert_eq!(mm.free_frames(), free);
}

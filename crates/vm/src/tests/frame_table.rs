use super::{layout, test_frame_table};
use crate::address::Vpn;

#[test]
fn test_init_builds_free_list() {
    let ft = test_frame_table(8, 2);
    assert_eq!(ft.total_frames(), 8);
    assert_eq!(ft.kernel_frames(), 2);
    assert_eq!(ft.free_frames(), 6);

    // Free list is built in ascending frame order, after the reserved prefix.
    assert_eq!(ft.pop_free(), Some(2));
    assert_eq!(ft.pop_free(), Some(3));
    assert_eq!(ft.free_frames(), 4);
}

#[test]
fn test_claim_and_lookup() {
    let ft = test_frame_table(6, 1);
    ft.register_process(7, layout(0, 2));

    ft.claim(2, Vpn::from_usize(10), 7);
    ft.claim(3, Vpn::from_usize(11), 7);

    assert_eq!(ft.lookup(Vpn::from_usize(10), 7), Some(2));
    assert_eq!(ft.lookup(Vpn::from_usize(11), 7), Some(3));
    assert_eq!(ft.lookup(Vpn::from_usize(12), 7), None);
    assert_eq!(ft.resident_count(7), 2);
    assert_eq!(ft.free_frames(), 3);
}

#[test]
fn test_claim_from_middle_of_free_list() {
    let ft = test_frame_table(6, 0);
    ft.register_process(1, layout(0, 1));

    // Claiming a frame that sits mid-list must splice, not pop.
    ft.claim(3, Vpn::from_usize(5), 1);
    assert_eq!(ft.free_frames(), 5);

    let mut popped = alloc::vec::Vec::new();
    while let Some(f) = ft.pop_free() {
        popped.push(f);
    }
    assert_eq!(popped, [0, 1, 2, 4, 5]);
}

#[test]
fn test_release_patches_resident_list() {
    let ft = test_frame_table(6, 0);
    ft.register_process(1, layout(0, 1));
    ft.claim(0, Vpn::from_usize(10), 1);
    ft.claim(1, Vpn::from_usize(11), 1);
    ft.claim(2, Vpn::from_usize(12), 1);

    // Middle of the resident list.
    ft.release(1);
    assert_eq!(ft.lookup(Vpn::from_usize(11), 1), None);
    assert_eq!(ft.lookup(Vpn::from_usize(10), 1), Some(0));
    assert_eq!(ft.lookup(Vpn::from_usize(12), 1), Some(2));
    assert_eq!(ft.resident_count(1), 2);

    // Head, then tail.
    ft.release(0);
    ft.release(2);
    assert_eq!(ft.resident_count(1), 0);
    assert_eq!(ft.free_frames(), 6);

    // Released frames are claimable again.
    ft.claim(1, Vpn::from_usize(20), 1);
    assert_eq!(ft.lookup(Vpn::from_usize(20), 1), Some(1));
}

#[test]
fn test_lookup_scoped_to_owner() {
    let ft = test_frame_table(6, 0);
    ft.register_process(1, layout(0, 1));
    ft.register_process(2, layout(0, 1));

    ft.claim(0, Vpn::from_usize(10), 1);
    ft.claim(1, Vpn::from_usize(10), 2);

    assert_eq!(ft.lookup(Vpn::from_usize(10), 1), Some(0));
    assert_eq!(ft.lookup(Vpn::from_usize(10), 2), Some(1));
}

#[test]
fn test_conservation_invariant() {
    let ft = test_frame_table(10, 2);
    ft.register_process(1, layout(0, 1));
    ft.register_process(2, layout(0, 1));

    let check = |ft: &crate::FrameTable| {
        let (total, free, kernel, resident) = ft.get_stats();
        assert_eq!(free + kernel + resident, total);
    };

    check(&ft);
    ft.claim(2, Vpn::from_usize(1), 1);
    check(&ft);
    ft.claim(5, Vpn::from_usize(2), 1);
    check(&ft);
    ft.claim(3, Vpn::from_usize(1), 2);
    check(&ft);
    ft.release(5);
    check(&ft);
    ft.claim(5, Vpn::from_usize(9), 2);
    check(&ft);
    ft.release(2);
    ft.release(3);
    check(&ft);
    ft.release(5);
    check(&ft);
    assert_eq!(ft.free_frames(), 8);
}

#[test]
fn test_choose_victim_skips_kernel() {
    let ft = test_frame_table(4, 1);
    ft.register_process(5, layout(0, 1));
    ft.claim(1, Vpn::from_usize(10), 5);
    ft.claim(2, Vpn::from_usize(11), 5);
    ft.claim(3, Vpn::from_usize(12), 5);

    for _ in 0..64 {
        let (frame, vpn, pid) = ft.choose_victim().unwrap();
        assert!(frame >= 1, "kernel frame selected as victim");
        assert_eq!(pid, 5);
        assert!((10..=12).contains(&vpn.as_usize()));
    }
}

#[test]
fn test_choose_victim_none_when_nothing_evictable() {
    let ft = test_frame_table(4, 1);
    ft.register_process(5, layout(0, 1));
    // Nothing resident yet.
    assert!(ft.choose_victim().is_none());

    // Entirely kernel-reserved table.
    let ft = test_frame_table(3, 3);
    assert!(ft.choose_victim().is_none());
}

#[test]
fn test_find_contiguous_free_run() {
    let ft = test_frame_table(8, 2);
    let run = ft.find_contiguous(3).unwrap();
    assert_eq!(run.start, 2);
    assert!(run.victims.is_empty());
}

#[test]
fn test_find_contiguous_reports_victims() {
    let ft = test_frame_table(6, 1);
    ft.register_process(1, layout(0, 1));
    for (frame, page) in (1..6).zip(10..) {
        ft.claim(frame, Vpn::from_usize(page), 1);
    }

    let run = ft.find_contiguous(3).unwrap();
    assert!(run.start >= 1);
    assert_eq!(run.victims.len(), 3);
    for (frame, _, pid) in &run.victims {
        assert!(*frame >= run.start && *frame < run.start + 3);
        assert_eq!(*pid, 1);
    }
}

#[test]
fn test_find_contiguous_too_large() {
    let ft = test_frame_table(4, 1);
    // Only 3 non-kernel frames exist.
    assert!(ft.find_contiguous(4).is_none());
}

#[test]
fn test_kernel_run_claim_and_release() {
    let ft = test_frame_table(8, 2);
    let run = ft.find_contiguous(3).unwrap();
    ft.claim_kernel_run(run.start, 3);
    assert_eq!(ft.kernel_frames(), 5);
    assert_eq!(ft.free_frames(), 3);

    ft.release_run(run.start, 3);
    assert_eq!(ft.kernel_frames(), 2);
    assert_eq!(ft.free_frames(), 6);

    let (total, free, kernel, resident) = ft.get_stats();
    assert_eq!(free + kernel + resident, total);
}

#[test]
fn test_remove_process_releases_everything() {
    let ft = test_frame_table(6, 1);
    ft.register_process(4, layout(0, 1));
    ft.claim(1, Vpn::from_usize(10), 4);
    ft.claim(2, Vpn::from_usize(11), 4);

    let freed = ft.remove_process(4);
    assert_eq!(freed.len(), 2);
    assert_eq!(ft.free_frames(), 5);
}

#[test]
fn test_resident_pages_in_claim_order() {
    let ft = test_frame_table(6, 0);
    ft.register_process(1, layout(0, 1));
    ft.claim(4, Vpn::from_usize(30), 1);
    ft.claim(0, Vpn::from_usize(31), 1);
    ft.claim(2, Vpn::from_usize(32), 1);

    let pages: alloc::vec::Vec<usize> = ft
        .resident_pages(1)
        .iter()
        .map(|&(_, vpn)| vpn.as_usize())
        .collect();
    assert_eq!(pages, [30, 31, 32]);
}

#[test]
#[should_panic(expected = "claim of non-free frame")]
fn test_claim_occupied_frame_panics() {
    let ft = test_frame_table(4, 0);
    ft.register_process(1, layout(0, 1));
    ft.claim(2, Vpn::from_usize(1), 1);
    ft.claim(2, Vpn::from_usize(2), 1);
}

#[test]
#[should_panic(expected = "release of boot-reserved frame")]
fn test_release_boot_reserved_run_panics() {
    let ft = test_frame_table(4, 2);
    ft.release_run(0, 1);
}

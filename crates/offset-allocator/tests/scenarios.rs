#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use offset_allocator::{Allocation, OffsetAllocator, Region, StorageReport};

fn free_region(offset: u32, size: u32) -> Region {
    Region {
        offset,
        size,
        used: false,
    }
}

/// Checks that the regions tile `[0, size)` and that the free ones add up to
/// the reported free space.
fn assert_partition(allocator: &OffsetAllocator) {
    let mut end = 0;
    let mut free = 0;
    for region in allocator.regions() {
        assert_eq!(region.offset, end, "gap or overlap at {region:?}");
        end = region.end();
        if !region.used {
            free += region.size;
        }
    }
    assert_eq!(end, allocator.size());
    assert_eq!(free, allocator.storage_report().total_free_space);
}

#[test]
fn fill_free_and_refill() {
    let mut allocator = OffsetAllocator::new(64, 4);

    let first = allocator.allocate(32).unwrap();
    let second = allocator.allocate(32).unwrap();
    assert_eq!(first.offset, 0);
    assert_eq!(second.offset, 32);

    let err = allocator.allocate(32).unwrap_err();
    assert!(err.is_out_of_space());
    assert_eq!(allocator.storage_report().total_free_space, 0);

    allocator.free(first);
    let first = allocator.allocate(32).unwrap();
    assert_eq!(first.offset, 0);
    assert_partition(&allocator);

    allocator.free(first);
    allocator.free(second);
    assert_eq!(
        allocator.regions().collect::<Vec<_>>(),
        [free_region(0, 64)]
    );
}

#[test]
fn fragmented_space_rejects_larger_request() {
    let mut allocator = OffsetAllocator::new(64, 4);

    let a0 = allocator.allocate(32).unwrap();
    let a1 = allocator.allocate(32).unwrap();
    allocator.free(a1);
    let a1 = allocator.allocate(32).unwrap();
    allocator.free(a0);
    let a0 = allocator.allocate(32).unwrap();
    allocator.free(a1);

    // 32 bytes are free, but 34 rounds up past every free class.
    assert!(allocator.allocate(34).unwrap_err().is_out_of_space());
    assert_partition(&allocator);

    allocator.free(a0);
    assert_eq!(allocator.allocate(34).unwrap().offset, 0);
}

#[test]
fn free_space_is_exact() {
    let mut allocator = OffsetAllocator::new(1024, 8);
    let a = allocator.allocate(100).unwrap();
    let b = allocator.allocate(50).unwrap();
    assert_eq!((a.offset, b.offset), (0, 100));

    let report = allocator.storage_report();
    assert_eq!(report.total_free_space, 1024 - 150);
    assert!(report.largest_free_region <= 1024 - 150);
    assert_partition(&allocator);
}

#[test]
fn round_trip_restores_free_space() {
    let mut allocator = OffsetAllocator::new(4096, 16);
    let anchor = allocator.allocate(512).unwrap();
    let before = allocator.storage_report();

    for size in [1, 7, 64, 100, 1000, 3584] {
        let allocation = allocator.allocate(size).unwrap();
        allocator.free(allocation);
        assert_eq!(allocator.storage_report(), before, "size {size}");
    }

    allocator.free(anchor);
    assert_eq!(
        allocator.storage_report(),
        StorageReport {
            total_free_space: 4096,
            largest_free_region: 4096,
        }
    );
}

#[test]
fn live_allocations_never_overlap() {
    let mut rng = fastrand::Rng::with_seed(7);
    let mut allocator = OffsetAllocator::new(1 << 16, 128);
    let mut live: Vec<Allocation> = Vec::new();

    for _ in 0..2_000 {
        if live.len() > 32 || (!live.is_empty() && rng.bool()) {
            let allocation = live.swap_remove(rng.usize(..live.len()));
            allocator.free(allocation);
        } else if let Ok(allocation) = allocator.allocate(rng.u32(1..2048)) {
            live.push(allocation);
        }

        let mut ranges = live
            .iter()
            .map(|a| (a.offset, a.offset + allocator.allocation_size(*a)))
            .collect::<Vec<_>>();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{pair:?} overlap");
        }

        let used = ranges.iter().map(|(start, end)| end - start).sum::<u32>();
        assert_eq!(
            allocator.storage_report().total_free_space + used,
            allocator.size()
        );
    }

    for allocation in live {
        allocator.free(allocation);
    }
    assert_eq!(
        allocator.regions().collect::<Vec<_>>(),
        [free_region(0, 1 << 16)]
    );
}

#[test]
fn node_slots_run_out_before_bytes() {
    let mut allocator = OffsetAllocator::new(1 << 20, 8);
    let mut live = Vec::new();
    let err = loop {
        match allocator.allocate(16) {
            Ok(allocation) => live.push(allocation),
            Err(err) => break err,
        }
    };
    assert!(err.is_node_pool_exhausted());
    // the free tail occupies the last slot
    assert_eq!(live.len(), 7);
    assert!(allocator.storage_report().total_free_space > 0);

    allocator.free(live.pop().unwrap());
    assert!(allocator.allocate(16).is_ok());
}

#[test]
fn full_report_counts_holes() {
    let mut allocator = OffsetAllocator::new(1024, 16);
    let holes = (0..4)
        .map(|_| {
            let hole = allocator.allocate(64).unwrap();
            let _fence = allocator.allocate(16).unwrap();
            hole
        })
        .collect::<Vec<_>>();
    for hole in holes {
        allocator.free(hole);
    }

    let report = allocator.storage_report_full();
    assert_eq!(report.region_count(), 5);
    let sixty_four = report
        .non_empty()
        .find(|regions| regions.size == 64)
        .unwrap();
    assert_eq!(sixty_four.count, 4);
}

#[test]
fn reset_forgets_allocations() {
    let mut allocator = OffsetAllocator::new(256, 4);
    let _ = allocator.allocate(100).unwrap();
    let _ = allocator.allocate(100).unwrap();
    allocator.reset();
    assert_eq!(
        allocator.regions().collect::<Vec<_>>(),
        [free_region(0, 256)]
    );
    assert_eq!(allocator.allocate(256).unwrap().offset, 0);
}

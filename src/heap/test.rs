use super::*;
use crate::constants::{HEAP_BLOCKS, HEAP_SPLIT, VM_ALIGNMENT};

const BASE: u32 = 64;
const LIMIT: u32 = 64 + 1024;

fn heap() -> Heap {
    Heap::new(BASE, LIMIT, HEAP_BLOCKS, HEAP_SPLIT, VM_ALIGNMENT as u32)
}

#[test]
fn alloc_bumps_and_aligns() {
    let mut heap = heap();

    let p = heap.alloc(3);
    let q = heap.alloc(13);
    let r = heap.alloc(8);

    assert_eq!(p, BASE);
    assert_eq!(q, BASE + 8);
    assert_eq!(r, BASE + 8 + 16);

    for addr in &[p, q, r] {
        assert_eq!(addr % VM_ALIGNMENT as u32, 0);
    }
}

#[test]
fn live_allocations_are_disjoint() {
    let mut heap = heap();

    let mut live: Vec<(u32, u32)> = Vec::new();
    for (i, &size) in [64u32, 8, 120, 16, 48, 8, 8, 200].iter().enumerate() {
        let addr = heap.alloc(size);
        assert_ne!(addr, 0);

        for &(other, other_size) in &live {
            let end = addr + ((size + 7) & !7);
            let other_end = other + other_size;
            assert!(end <= other || addr >= other_end);
        }
        live.push((addr, (size + 7) & !7));

        // Free every other allocation to stir the free list.
        if i % 2 == 1 {
            let (victim, _) = live.remove(i / 2 % live.len());
            assert!(heap.free(victim));
        }
    }
}

#[test]
fn free_all_leaves_one_block() {
    let mut heap = heap();

    let mut addrs = Vec::new();
    for &size in &[64u32, 32, 96, 8, 16] {
        addrs.push(heap.alloc(size));
    }

    // Free out of order.
    for &addr in &[addrs[3], addrs[0], addrs[4], addrs[2], addrs[1]] {
        assert!(heap.free(addr));
    }

    let free = heap.free_blocks();
    assert_eq!(free.len(), 1);
    assert_eq!(free[0], (BASE, 64 + 32 + 96 + 8 + 16));
    assert!(heap.used_blocks().is_empty());
}

#[test]
fn freed_space_is_reused_after_compaction() {
    let mut heap = heap();

    let p = heap.alloc(64);
    let q = heap.alloc(32);
    assert!(heap.free(p));
    assert!(heap.free(q));

    // Both ranges merged; a larger request fits where `p` was.
    assert_eq!(heap.alloc(96), p);
}

#[test]
fn split_returns_the_tail() {
    let mut heap = heap();

    let p = heap.alloc(128);
    heap.alloc(8); // pin the top so `p` cannot grow in place
    assert!(heap.free(p));

    let r = heap.alloc(32);
    assert_eq!(r, p);
    assert_eq!(heap.free_blocks(), vec![(p + 32, 96)]);
}

#[test]
fn undersized_blocks_are_skipped() {
    let mut heap = heap();

    let p = heap.alloc(16);
    let q = heap.alloc(64);
    let top = heap.alloc(8);
    assert!(heap.free(p));

    // 16 bytes at `p` cannot hold 64; allocation comes from the top.
    let r = heap.alloc(64);
    assert!(r > top);
    assert_eq!(heap.free_blocks(), vec![(p, 16)]);

    assert!(heap.free(q));
    assert!(heap.free(top));
    assert!(heap.free(r));
}

#[test]
fn exhaustion_returns_null() {
    let mut heap = heap();

    assert_ne!(heap.alloc(1000), 0);
    assert_eq!(heap.alloc(64), 0);
}

#[test]
fn descriptor_pool_exhaustion_returns_null() {
    let mut heap = Heap::new(BASE, LIMIT, 2, HEAP_SPLIT, VM_ALIGNMENT as u32);

    assert_ne!(heap.alloc(8), 0);
    assert_ne!(heap.alloc(8), 0);
    assert_eq!(heap.alloc(8), 0);
}

#[test]
fn free_null_and_unknown_addresses() {
    let mut heap = heap();

    assert!(!heap.free(0));

    let p = heap.alloc(16);
    assert!(!heap.free(p + 8));
    assert!(heap.free(p));
    assert!(!heap.free(p));
}

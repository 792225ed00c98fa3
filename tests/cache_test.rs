//! Integration tests for the slab cache.
//!
//! Walks the cache through the full occupancy-state machine with a
//! recording page source, checking list membership, page-source traffic
//! and address layout after every step.

#![no_std]

extern crate alloc;

use alloc::vec::Vec;
use core::alloc::Layout;
use core::ptr::NonNull;
use slab_object_cache::{
    CacheError, PageSource, SlabCache, PAGE_SIZE, SLAB_HEADER_SIZE,
};

/// Page source backed by the host allocator that records every
/// acquire/release, so tests can observe the cache's traffic.
struct RecordingPageSource {
    outstanding: Vec<(usize, Layout)>,
    acquires: usize,
    releases: usize,
    remaining: usize,
}

impl RecordingPageSource {
    fn new() -> Self {
        Self::with_budget(usize::MAX)
    }

    /// A source that fails after `budget` successful acquisitions.
    fn with_budget(budget: usize) -> Self {
        Self {
            outstanding: Vec::new(),
            acquires: 0,
            releases: 0,
            remaining: budget,
        }
    }

    fn outstanding_slabs(&self) -> usize {
        self.outstanding.len()
    }
}

unsafe impl PageSource for RecordingPageSource {
    fn acquire(&mut self, order: usize) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let bytes = PAGE_SIZE << order;
        let layout = Layout::from_size_align(bytes, bytes).unwrap();
        let base = unsafe { alloc::alloc::alloc(layout) } as usize;
        if base == 0 {
            return None;
        }
        self.outstanding.push((base, layout));
        self.acquires += 1;
        Some(base)
    }

    fn release(&mut self, base: usize) {
        let idx = self
            .outstanding
            .iter()
            .position(|&(addr, _)| addr == base)
            .expect("released a slab that was never acquired");
        let (_, layout) = self.outstanding.swap_remove(idx);
        self.releases += 1;
        unsafe { alloc::alloc::dealloc(base as *mut u8, layout) };
    }
}

fn addr(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr() as usize
}

/// Walk-through for 41-byte objects: fill one slab, watch it travel
/// partial -> full -> partial -> free, then shrink it away.
#[test]
fn test_occupancy_state_walkthrough() {
    let mut cache = SlabCache::new(41).unwrap();
    let mut pages = RecordingPageSource::new();

    let capacity = cache.slots_per_slab();
    assert_eq!(capacity, (PAGE_SIZE - SLAB_HEADER_SIZE) / 41);

    // Filling exactly one slab requests exactly one slab.
    let mut objects = Vec::new();
    for i in 0..capacity {
        let ptr = cache.allocate(&mut pages).unwrap();
        objects.push(ptr);
        assert_eq!(pages.acquires, 1);
        if i + 1 < capacity {
            assert_eq!(cache.partial_slabs(), 1);
            assert_eq!(cache.full_slabs(), 0);
        }
    }
    // The last allocation moved the slab Partial -> Full.
    assert_eq!(cache.partial_slabs(), 0);
    assert_eq!(cache.full_slabs(), 1);

    // Only the (capacity + 1)-th allocation needs a second slab.
    let overflow = cache.allocate(&mut pages).unwrap();
    assert_eq!(pages.acquires, 2);
    assert_eq!(cache.partial_slabs(), 1);
    assert_eq!(cache.full_slabs(), 1);

    // Freeing one object from the full slab moves it Full -> Partial.
    let reopened = objects.pop().unwrap();
    cache.free(reopened);
    assert_eq!(cache.full_slabs(), 0);
    assert_eq!(cache.partial_slabs(), 2);

    // Draining the rest moves it to the free list.
    for ptr in objects.drain(..) {
        cache.free(ptr);
    }
    assert_eq!(cache.free_slabs(), 1);
    assert_eq!(cache.partial_slabs(), 1);

    // Shrink releases exactly that one slab and empties the free list.
    assert_eq!(cache.shrink(&mut pages), 1);
    assert_eq!(pages.releases, 1);
    assert_eq!(cache.free_slabs(), 0);

    cache.free(overflow);
    cache.teardown(&mut pages);
    assert_eq!(pages.outstanding_slabs(), 0);
}

#[test]
fn test_addresses_are_slot_aligned_and_unique() {
    let mut cache = SlabCache::new(41).unwrap();
    let mut pages = RecordingPageSource::new();

    let capacity = cache.slots_per_slab();
    let mut objects = Vec::new();
    for _ in 0..capacity {
        objects.push(addr(cache.allocate(&mut pages).unwrap()));
    }

    // All within one slab, at header + i * object_size.
    let base = objects[0] - SLAB_HEADER_SIZE;
    for (i, &a) in objects.iter().enumerate() {
        assert_eq!(a, base + SLAB_HEADER_SIZE + i * 41);
    }

    for (i, &a) in objects.iter().enumerate() {
        for &b in objects.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }

    cache.teardown(&mut pages);
    assert_eq!(pages.outstanding_slabs(), 0);
}

/// Regression for the naive occupancy-counter addressing scheme: a slot
/// freed out of LIFO order while the slab stays partial must be handed
/// out again instead of a live slot's address.
#[test]
fn test_freed_slot_reused_without_aliasing() {
    let mut cache = SlabCache::new(64).unwrap();
    let mut pages = RecordingPageSource::new();

    let a = cache.allocate(&mut pages).unwrap();
    let b = cache.allocate(&mut pages).unwrap();
    let c = cache.allocate(&mut pages).unwrap();

    cache.free(b);
    let reused = cache.allocate(&mut pages).unwrap();
    assert_eq!(reused, b);
    assert_ne!(reused, a);
    assert_ne!(reused, c);

    // And the next allocation continues past the highest live slot.
    let d = cache.allocate(&mut pages).unwrap();
    assert_eq!(addr(d), addr(c) + 64);

    cache.teardown(&mut pages);
    assert_eq!(pages.outstanding_slabs(), 0);
}

#[test]
fn test_shrink_is_idempotent() {
    let mut cache = SlabCache::new(128).unwrap();
    let mut pages = RecordingPageSource::new();

    // Shrinking an empty cache is a no-op.
    assert_eq!(cache.shrink(&mut pages), 0);

    let ptr = cache.allocate(&mut pages).unwrap();
    cache.free(ptr);
    assert_eq!(cache.free_slabs(), 1);

    assert_eq!(cache.shrink(&mut pages), 1);
    assert_eq!(cache.shrink(&mut pages), 0);
    assert_eq!(pages.releases, 1);
    assert_eq!(pages.outstanding_slabs(), 0);
}

#[test]
fn test_teardown_releases_all_occupancy_states() {
    let mut cache = SlabCache::new(64).unwrap();
    let mut pages = RecordingPageSource::new();
    let capacity = cache.slots_per_slab();

    // Build one slab per occupancy state: full, partial, free.
    let mut held = Vec::new();
    for _ in 0..capacity {
        held.push(cache.allocate(&mut pages).unwrap());
    }
    let partial = cache.allocate(&mut pages).unwrap();
    for _ in 0..capacity {
        held.push(cache.allocate(&mut pages).unwrap());
    }
    let emptied = held.split_off(capacity);
    for ptr in emptied {
        cache.free(ptr);
    }
    assert_eq!(cache.full_slabs(), 1);
    assert_eq!(cache.partial_slabs(), 1);
    assert_eq!(cache.free_slabs(), 1);
    let _ = partial;

    // Bulk shutdown ignores live objects.
    assert_eq!(cache.teardown(&mut pages), 3);
    assert!(cache.is_empty());
    assert_eq!(pages.outstanding_slabs(), 0);

    // And again: nothing left.
    assert_eq!(cache.teardown(&mut pages), 0);
}

#[test]
fn test_exhausted_source_reported_not_retried() {
    let mut cache = SlabCache::new(64).unwrap();
    let mut pages = RecordingPageSource::with_budget(1);
    let capacity = cache.slots_per_slab();

    let mut held = Vec::new();
    for _ in 0..capacity {
        held.push(cache.allocate(&mut pages).unwrap());
    }

    // The slab is full and the source has no budget left.
    assert_eq!(
        cache.allocate(&mut pages).unwrap_err(),
        CacheError::OutOfMemory
    );
    assert_eq!(pages.acquires, 1);

    // Recoverable: freeing makes the cache serviceable again.
    cache.free(held.pop().unwrap());
    assert!(cache.allocate(&mut pages).is_ok());

    cache.teardown(&mut pages);
    assert_eq!(pages.outstanding_slabs(), 0);
}

#[test]
fn test_large_object_cache() {
    // Objects bigger than a page get order-1 slabs with a single slot.
    let mut cache = SlabCache::new(5000).unwrap();
    let mut pages = RecordingPageSource::new();

    assert_eq!(cache.slab_order(), 1);
    assert_eq!(cache.slab_bytes(), 2 * PAGE_SIZE);
    assert_eq!(cache.slots_per_slab(), 1);

    let a = cache.allocate(&mut pages).unwrap();
    let b = cache.allocate(&mut pages).unwrap();
    assert_eq!(cache.full_slabs(), 2);
    assert_eq!(pages.acquires, 2);

    // Each object lives in its own self-aligned slab.
    assert_eq!(addr(a) % (2 * PAGE_SIZE), SLAB_HEADER_SIZE);
    assert_eq!(addr(b) % (2 * PAGE_SIZE), SLAB_HEADER_SIZE);

    cache.free(a);
    assert_eq!(cache.free_slabs(), 1);
    assert_eq!(cache.full_slabs(), 1);

    cache.free(b);
    assert_eq!(cache.shrink(&mut pages), 2);
    assert_eq!(pages.outstanding_slabs(), 0);
}

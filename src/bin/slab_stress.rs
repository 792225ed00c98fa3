//! Host stress/soak tool: random alloc/free sequences against a `SlabCache`.
//!
//! Typical usage:
//! - `cargo run --release --features host --bin slab_stress -- --iters 500000 --max-live 4096 --size 64 --seed 1`
//! - `valgrind --leak-check=full target/release/slab_stress --iters 200000`
//!
//! Depends only on std + the crate itself, so it runs under valgrind/miri
//! on a Linux host.

use slab_object_cache::{CacheError, PageSource, SlabCache, PAGE_SIZE};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::alloc::Layout;
use std::collections::HashMap;
use std::env;
use std::ptr::NonNull;
use std::time::Instant;

struct HostPageSource {
    outstanding: HashMap<usize, Layout>,
}

impl HostPageSource {
    fn new() -> Self {
        Self {
            outstanding: HashMap::with_capacity(1 << 10),
        }
    }

    fn currently_allocated(&self) -> usize {
        self.outstanding.len()
    }
}

unsafe impl PageSource for HostPageSource {
    fn acquire(&mut self, order: usize) -> Option<usize> {
        let bytes = PAGE_SIZE << order;
        let layout = Layout::from_size_align(bytes, bytes).unwrap();
        let p = unsafe { std::alloc::alloc(layout) };
        if p.is_null() {
            return None;
        }
        self.outstanding.insert(p as usize, layout);
        Some(p as usize)
    }

    fn release(&mut self, base: usize) {
        let layout = self
            .outstanding
            .remove(&base)
            .unwrap_or_else(|| panic!("releasing unknown slab {:#x}", base));
        unsafe { std::alloc::dealloc(base as *mut u8, layout) };
    }
}

fn arg_u64(name: &str, default: u64) -> u64 {
    let mut it = env::args().skip(1);
    while let Some(a) = it.next() {
        if a == name {
            return it
                .next()
                .unwrap_or_else(|| panic!("missing value for {}", name))
                .parse::<u64>()
                .unwrap_or_else(|_| panic!("invalid u64 for {}", name));
        }
    }
    default
}

fn arg_usize(name: &str, default: usize) -> usize {
    arg_u64(name, default as u64) as usize
}

fn main() {
    let iters = arg_u64("--iters", 200_000) as usize;
    let max_live = arg_usize("--max-live", 4096);
    let size = arg_usize("--size", 64);
    let seed = arg_u64("--seed", 1);

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut pages = HostPageSource::new();
    let mut cache = SlabCache::new(size).expect("invalid --size");

    let mut live: Vec<NonNull<u8>> = Vec::with_capacity(max_live);
    let start = Instant::now();
    let mut allocs = 0usize;
    let mut frees = 0usize;
    let mut shrinks = 0usize;

    for i in 0..iters {
        let do_alloc = live.is_empty() || (live.len() < max_live && rng.gen_bool(0.60));
        if do_alloc {
            match cache.allocate(&mut pages) {
                Ok(p) => {
                    live.push(p);
                    allocs += 1;
                }
                Err(CacheError::OutOfMemory) => panic!("host page source exhausted"),
                Err(CacheError::InvalidObjectSize) => unreachable!(),
            }
        } else {
            let idx = rng.gen_range(0..live.len());
            let p = live.swap_remove(idx);
            cache.free(p);
            frees += 1;
        }

        // Periodically hand empty slabs back, exercising the reclaim path.
        if (i & 0x3fff) == 0x3fff {
            shrinks += cache.shrink(&mut pages);
        }
    }

    for p in live.drain(..) {
        cache.free(p);
        frees += 1;
    }

    let released = cache.teardown(&mut pages);

    let dur = start.elapsed();
    println!(
        "slab_stress done: iters={} size={} allocs={} frees={} shrinks={} teardown={} slabs_left={} elapsed={:?}",
        iters,
        size,
        allocs,
        frees,
        shrinks,
        released,
        pages.currently_allocated(),
        dur
    );

    assert!(cache.is_empty(), "cache still owns slabs");
    assert_eq!(pages.currently_allocated(), 0, "leaked slabs");
}

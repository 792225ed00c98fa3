//! A caching allocator for fixed-size objects ("slab cache").
//!
//! The cache sits on top of a page source that hands out power-of-two
//! multiples of a 4 KiB page, aligned to their own size. Each such block
//! (a "slab") is carved into fixed-size object slots; the cache tracks
//! slab occupancy so that most allocations and frees never touch the
//! page source.
//!
//! The organization is as follows:
//!
//!  * A [`SlabCache`] serves objects of exactly one size, chosen at setup.
//!    It keeps every slab it owns on one of three intrusive lists
//!    (free, partial, full) according to how many live objects the slab
//!    holds, and moves slabs between the lists in O(1) on every
//!    allocate/free.
//!  * A trait [`PageSource`] supplies and reclaims whole aligned slabs.
//!    Slabs are only returned to it by [`SlabCache::shrink`] and
//!    [`SlabCache::teardown`].
//!
//! The cache is single-threaded by contract; wrap it in a lock if it has
//! to be shared.

#![no_std]

extern crate alloc;

mod cache;
mod list;
mod slab;

pub use cache::SlabCache;
pub use slab::SLAB_HEADER_SIZE;

/// Size of the smallest slab (one page of the page source).
pub const PAGE_SIZE: usize = 4096;

/// Largest order the page source accepts: slabs span at most
/// `PAGE_SIZE << MAX_SLAB_ORDER` bytes (4 MiB).
pub const MAX_SLAB_ORDER: usize = 10;

/// Error that can be returned for cache setup and allocation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// The requested `object_size` is zero or does not fit in a slab of
    /// the largest allowed order.
    InvalidObjectSize,
    /// The page source could not supply a new slab.
    OutOfMemory,
}

/// A [`Result`] type with [`CacheError`] as the error type.
pub type CacheResult<T = ()> = Result<T, CacheError>;

/// Provider of whole aligned memory blocks, consumed by [`SlabCache`].
///
/// # Safety
///
/// Implementations must guarantee that a successful `acquire(order)`
/// returns the base address of a readable and writable block of
/// `PAGE_SIZE << order` bytes, aligned to its own size, that stays valid
/// until it is passed back to `release`. The cache stores its slab
/// headers inside acquired blocks, so an implementation that violates
/// this causes undefined behavior.
pub unsafe trait PageSource {
    /// Allocate a block of `PAGE_SIZE << order` bytes aligned to that
    /// same size, or `None` if the source is exhausted.
    /// `order` is at most [`MAX_SLAB_ORDER`].
    fn acquire(&mut self, order: usize) -> Option<usize>;

    /// Return a block previously obtained from `acquire`. Passing any
    /// other address is undefined behavior.
    fn release(&mut self, base: usize);
}

#[inline]
pub(crate) const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
pub(crate) const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

//! The slab cache: occupancy-state management for one object size.
//!
//! Every slab the cache owns sits on exactly one of three intrusive
//! lists:
//!
//!  * `free`    — no live objects; candidates for reuse and for
//!    [`SlabCache::shrink`].
//!  * `partial` — some but not all slots live; preferred source of new
//!    allocations.
//!  * `full`    — every slot live.
//!
//! Allocate and free mutate exactly one slab's occupancy and perform at
//! most one list move, so both are O(1) and never touch the page source
//! except when a brand-new slab is needed.

use core::fmt;
use core::ptr::NonNull;

use log::{debug, trace};

use crate::list::SlabList;
use crate::slab::{Slab, SLAB_HEADER_SIZE};
use crate::{is_aligned, CacheError, CacheResult, PageSource, MAX_SLAB_ORDER, PAGE_SIZE};

/// A caching allocator for objects of one fixed size.
pub struct SlabCache {
    object_size: usize,
    slab_order: usize,
    slots_per_slab: usize,
    live_objects: usize,
    free: SlabList,
    partial: SlabList,
    full: SlabList,
}

impl SlabCache {
    /// Set up a cache for objects of `object_size` bytes.
    ///
    /// Picks the smallest slab order whose slab fits the header plus at
    /// least one object. At order 0 the slab is packed with as many
    /// objects as fit; once a larger order is needed the slab holds
    /// exactly one object.
    ///
    /// Fails with [`CacheError::InvalidObjectSize`] if `object_size` is
    /// zero or does not fit in a slab of [`MAX_SLAB_ORDER`].
    pub fn new(object_size: usize) -> CacheResult<Self> {
        if object_size == 0 {
            return Err(CacheError::InvalidObjectSize);
        }
        let needed = SLAB_HEADER_SIZE
            .checked_add(object_size)
            .ok_or(CacheError::InvalidObjectSize)?;

        let mut slab_order = 0;
        while (PAGE_SIZE << slab_order) < needed {
            slab_order += 1;
            if slab_order > MAX_SLAB_ORDER {
                return Err(CacheError::InvalidObjectSize);
            }
        }

        let slots_per_slab = if slab_order == 0 {
            (PAGE_SIZE - SLAB_HEADER_SIZE) / object_size
        } else {
            // Past one page per slab we stop packing: one object per slab.
            1
        };

        debug!(
            "slab cache: object_size={} slab_order={} slots_per_slab={}",
            object_size, slab_order, slots_per_slab
        );

        Ok(Self {
            object_size,
            slab_order,
            slots_per_slab,
            live_objects: 0,
            free: SlabList::new(),
            partial: SlabList::new(),
            full: SlabList::new(),
        })
    }

    /// Allocate one object slot.
    ///
    /// Partial slabs are preferred, then slabs parked on the free list;
    /// only when both are empty is a new slab requested from `pages`,
    /// surfacing [`CacheError::OutOfMemory`] if the source is exhausted.
    pub fn allocate(&mut self, pages: &mut dyn PageSource) -> CacheResult<NonNull<u8>> {
        if let Some(base) = self.partial.back() {
            let mut slab = Slab::new(base);
            let Some(index) = slab.acquire_slot() else {
                panic!("partial slab has no free slot, slot bitmap is inconsistent");
            };
            self.live_objects += 1;
            if slab.live() == self.slots_per_slab {
                self.partial.remove(base);
                self.full.push_back(base);
                trace!("slab {:#x}: partial -> full", base);
            }
            return Ok(self.object_ptr(&slab, index));
        }

        if let Some(base) = self.free.pop_back() {
            let mut slab = Slab::new(base);
            let Some(index) = slab.acquire_slot() else {
                panic!("free slab has no free slot, slot bitmap is inconsistent");
            };
            self.live_objects += 1;
            self.link_after_first_allocation(base);
            return Ok(self.object_ptr(&slab, index));
        }

        let base = pages
            .acquire(self.slab_order)
            .ok_or(CacheError::OutOfMemory)?;
        debug_assert!(
            is_aligned(base, self.slab_bytes()),
            "page source returned a misaligned slab"
        );
        trace!("slab {:#x}: acquired at order {}", base, self.slab_order);

        let mut slab = Slab::new(base);
        slab.init(self.slots_per_slab);
        let Some(index) = slab.acquire_slot() else {
            panic!("fresh slab has no free slot, slot bitmap is inconsistent");
        };
        self.live_objects += 1;
        self.link_after_first_allocation(base);
        Ok(self.object_ptr(&slab, index))
    }

    /// Release one object previously returned by [`SlabCache::allocate`].
    ///
    /// The slab never goes back to the page source here: an emptied slab
    /// parks on the free list until [`SlabCache::shrink`] is called.
    ///
    /// Freeing an address this cache did not return, or freeing the same
    /// address twice, is undefined behavior.
    pub fn free(&mut self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let mut slab = Slab::from_object_addr(addr, self.slab_bytes());
        let base = slab.base();

        let was_full = slab.live() == self.slots_per_slab;
        let index = slab.slot_index(addr, self.object_size);
        slab.release_slot(index);
        debug_assert!(self.live_objects > 0);
        self.live_objects -= 1;

        if slab.live() == 0 {
            if was_full {
                self.full.remove(base);
            } else {
                self.partial.remove(base);
            }
            self.free.push_back(base);
            trace!("slab {:#x}: -> free", base);
        } else if was_full {
            self.full.remove(base);
            self.partial.push_back(base);
            trace!("slab {:#x}: full -> partial", base);
        }
    }

    /// Return every slab with zero live objects to the page source.
    ///
    /// Partial and full slabs are untouched. Safe to call repeatedly;
    /// with nothing on the free list it is a no-op. Returns the number
    /// of slabs released.
    pub fn shrink(&mut self, pages: &mut dyn PageSource) -> usize {
        let mut released = 0;
        while let Some(base) = self.free.pop_back() {
            trace!("slab {:#x}: released", base);
            pages.release(base);
            released += 1;
        }
        released
    }

    /// Return every slab to the page source, live objects included.
    ///
    /// This is a bulk shutdown: objects still referenced by the caller
    /// are not individually notified. Afterwards the cache holds no
    /// slabs and behaves as freshly set up; a second teardown is a
    /// no-op. Returns the number of slabs released.
    pub fn teardown(&mut self, pages: &mut dyn PageSource) -> usize {
        let mut released = self.shrink(pages);
        while let Some(base) = self.partial.pop_back() {
            trace!("slab {:#x}: released with live objects", base);
            pages.release(base);
            released += 1;
        }
        while let Some(base) = self.full.pop_back() {
            trace!("slab {:#x}: released with live objects", base);
            pages.release(base);
            released += 1;
        }
        self.live_objects = 0;
        released
    }

    fn object_ptr(&self, slab: &Slab, index: usize) -> NonNull<u8> {
        let addr = slab.object_addr(index, self.object_size);
        // SAFETY: slab bases come from the page source and are never 0,
        // and the object offset is strictly positive.
        unsafe { NonNull::new_unchecked(addr as *mut u8) }
    }

    /// A slab that just served its first allocation leaves the free
    /// path; single-slot slabs are already full at that point.
    fn link_after_first_allocation(&mut self, base: usize) {
        if self.slots_per_slab == 1 {
            self.full.push_back(base);
            trace!("slab {:#x}: -> full", base);
        } else {
            self.partial.push_back(base);
            trace!("slab {:#x}: -> partial", base);
        }
    }

    /// Size of the objects served by this cache.
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Page-source order of this cache's slabs.
    pub fn slab_order(&self) -> usize {
        self.slab_order
    }

    /// Bytes spanned by one slab.
    pub fn slab_bytes(&self) -> usize {
        PAGE_SIZE << self.slab_order
    }

    /// Object slots per slab.
    pub fn slots_per_slab(&self) -> usize {
        self.slots_per_slab
    }

    /// Slabs with zero live objects.
    pub fn free_slabs(&self) -> usize {
        self.free.len()
    }

    /// Slabs with some but not all slots live.
    pub fn partial_slabs(&self) -> usize {
        self.partial.len()
    }

    /// Slabs with every slot live.
    pub fn full_slabs(&self) -> usize {
        self.full.len()
    }

    /// Slabs currently owned by the cache, over all three lists.
    pub fn slab_count(&self) -> usize {
        self.free.len() + self.partial.len() + self.full.len()
    }

    /// Whether the cache holds no slabs at all.
    pub fn is_empty(&self) -> bool {
        self.free.is_empty() && self.partial.is_empty() && self.full.is_empty()
    }

    /// Total bytes held from the page source.
    pub fn total_bytes(&self) -> usize {
        self.slab_count() * self.slab_bytes()
    }

    /// Bytes occupied by live objects.
    pub fn used_bytes(&self) -> usize {
        self.live_objects * self.object_size
    }

    /// Bytes available for objects without growing the cache.
    pub fn available_bytes(&self) -> usize {
        let usable = self.slab_count() * self.slots_per_slab * self.object_size;
        usable - self.used_bytes()
    }
}

impl fmt::Debug for SlabCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabCache")
            .field("object_size", &self.object_size)
            .field("slab_order", &self.slab_order)
            .field("slots_per_slab", &self.slots_per_slab)
            .field("live_objects", &self.live_objects)
            .field("free", &self.free.len())
            .field("partial", &self.partial.len())
            .field("full", &self.full.len())
            .finish()
    }
}

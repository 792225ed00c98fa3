//! In-slab bookkeeping: the slab header and per-slot state.
//!
//! Every slab starts with a [`SlabHeader`] written at its base address,
//! followed by `capacity` object slots of the cache's object size. All
//! raw-pointer work of the crate is confined to this module: header
//! access through casts of the base address, and recovery of a slab base
//! from an object address by alignment masking.

use crate::{align_down, is_aligned, PAGE_SIZE};

/// Words in the per-slab free-slot bitmap.
const SLOT_BITMAP_WORDS: usize = 64;

/// Header stored at the base of every slab.
///
/// `prev`/`next` are the intrusive list links (0 means "none"; the page
/// source never hands out address 0 as a valid slab). One bitmap bit per
/// slot, set = free; allocation always takes the lowest set bit, so a
/// fresh slab hands out slot 0 first and reproduces bump order.
#[repr(C)]
struct SlabHeader {
    prev: usize,
    next: usize,
    live: u32,
    _reserved: u32,
    free_slots: [u64; SLOT_BITMAP_WORDS],
}

/// How many bytes of each slab are used by the header.
pub const SLAB_HEADER_SIZE: usize = core::mem::size_of::<SlabHeader>();

// The bitmap must cover the densest possible slab: 1-byte objects in an
// order-0 slab.
const _: () = assert!(PAGE_SIZE - SLAB_HEADER_SIZE <= SLOT_BITMAP_WORDS * 64);

/// Handle to one slab, identified by its base address.
///
/// The handle itself owns nothing; all state lives in the header inside
/// the slab's memory.
#[derive(Clone, Copy)]
pub(crate) struct Slab {
    base: usize,
}

impl Slab {
    pub(crate) const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Recover the owning slab of an object address.
    ///
    /// Slabs are aligned to their own size, so masking the low bits of
    /// the address yields the slab base.
    pub(crate) fn from_object_addr(addr: usize, slab_bytes: usize) -> Self {
        debug_assert!(slab_bytes.is_power_of_two());
        let base = align_down(addr, slab_bytes);
        debug_assert!(is_aligned(base, slab_bytes));
        debug_assert!(addr >= base + SLAB_HEADER_SIZE, "address inside slab header");
        Self { base }
    }

    pub(crate) fn base(&self) -> usize {
        self.base
    }

    fn header(&self) -> &SlabHeader {
        // SAFETY: `base` is the start of a live slab acquired from the
        // page source; the cache wrote a header there before publishing
        // the slab on any list.
        unsafe { &*(self.base as *const SlabHeader) }
    }

    fn header_mut(&mut self) -> &mut SlabHeader {
        // SAFETY: same as `header`; the cache is single-threaded, so no
        // aliasing mutable access exists.
        unsafe { &mut *(self.base as *mut SlabHeader) }
    }

    /// Write a fresh header: no live objects, slots `0..capacity` free.
    pub(crate) fn init(&mut self, capacity: usize) {
        debug_assert!(capacity >= 1 && capacity <= SLOT_BITMAP_WORDS * 64);

        let mut free_slots = [0u64; SLOT_BITMAP_WORDS];
        let full_words = capacity / 64;
        let rem_bits = capacity % 64;
        for word in free_slots.iter_mut().take(full_words) {
            *word = u64::MAX;
        }
        if rem_bits > 0 {
            free_slots[full_words] = (1u64 << rem_bits) - 1;
        }

        *self.header_mut() = SlabHeader {
            prev: 0,
            next: 0,
            live: 0,
            _reserved: 0,
            free_slots,
        };
    }

    /// Number of slots currently holding a live object.
    pub(crate) fn live(&self) -> usize {
        self.header().live as usize
    }

    /// Take the lowest free slot, or `None` if the slab is full.
    pub(crate) fn acquire_slot(&mut self) -> Option<usize> {
        let header = self.header_mut();
        for (word_idx, word) in header.free_slots.iter_mut().enumerate() {
            if *word != 0 {
                let bit = word.trailing_zeros() as usize;
                *word &= !(1u64 << bit);
                header.live += 1;
                return Some(word_idx * 64 + bit);
            }
        }
        None
    }

    /// Mark a slot free again.
    pub(crate) fn release_slot(&mut self, index: usize) {
        let header = self.header_mut();
        let word_idx = index / 64;
        let mask = 1u64 << (index % 64);
        debug_assert_eq!(
            header.free_slots[word_idx] & mask,
            0,
            "releasing a slot that is already free"
        );
        debug_assert!(header.live > 0);
        header.free_slots[word_idx] |= mask;
        header.live -= 1;
    }

    /// Address of the object in slot `index`.
    pub(crate) fn object_addr(&self, index: usize, object_size: usize) -> usize {
        self.base + SLAB_HEADER_SIZE + index * object_size
    }

    /// Slot index of the object at `addr`.
    pub(crate) fn slot_index(&self, addr: usize, object_size: usize) -> usize {
        let offset = addr - self.base - SLAB_HEADER_SIZE;
        debug_assert_eq!(offset % object_size, 0, "address is not a slot boundary");
        offset / object_size
    }

    pub(crate) fn prev(&self) -> Option<usize> {
        match self.header().prev {
            0 => None,
            prev => Some(prev),
        }
    }

    pub(crate) fn next(&self) -> Option<usize> {
        match self.header().next {
            0 => None,
            next => Some(next),
        }
    }

    pub(crate) fn set_prev(&mut self, prev: Option<usize>) {
        self.header_mut().prev = prev.unwrap_or(0);
    }

    pub(crate) fn set_next(&mut self, next: Option<usize>) {
        self.header_mut().next = next.unwrap_or(0);
    }
}

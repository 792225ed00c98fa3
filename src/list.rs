//! Intrusive doubly-linked list of slabs.
//!
//! The list owns no nodes: link words live in each slab's header, the
//! list itself is just head/tail addresses and a length. Push, pop and
//! remove are O(1) and allocation-free, which is what lets the cache
//! move a slab between occupancy lists on every allocate/free.

use crate::slab::Slab;

pub(crate) struct SlabList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl SlabList {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn back(&self) -> Option<usize> {
        self.tail
    }

    pub(crate) fn push_back(&mut self, slab_base: usize) {
        let mut slab = Slab::new(slab_base);
        slab.set_prev(self.tail);
        slab.set_next(None);

        if let Some(tail) = self.tail {
            Slab::new(tail).set_next(Some(slab_base));
        } else {
            self.head = Some(slab_base);
        }

        self.tail = Some(slab_base);
        self.len += 1;
    }

    pub(crate) fn pop_back(&mut self) -> Option<usize> {
        let tail = self.tail?;
        self.remove(tail);
        Some(tail)
    }

    /// Unlink `slab_base` from this list. The slab must be on it.
    pub(crate) fn remove(&mut self, slab_base: usize) {
        let mut slab = Slab::new(slab_base);
        let prev = slab.prev();
        let next = slab.next();

        if let Some(prev_base) = prev {
            Slab::new(prev_base).set_next(next);
        } else {
            debug_assert_eq!(self.head, Some(slab_base), "slab not on this list");
            self.head = next;
        }

        if let Some(next_base) = next {
            Slab::new(next_base).set_prev(prev);
        } else {
            debug_assert_eq!(self.tail, Some(slab_base), "slab not on this list");
            self.tail = prev;
        }

        slab.set_prev(None);
        slab.set_next(None);
        self.len -= 1;
    }
}

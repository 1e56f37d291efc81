//! Size classification and the per-class Superblock list
//!
//! Block sizes are powers of two; a request of `sz` bytes lands in class
//! `ceil(log2(sz))`. Within a Heap every class keeps its Superblocks on a
//! circular doubly linked list ordered from fullest to emptiest, so allocations
//! can be steered into the fullest Superblock with room (keeping the empty ones
//! empty) while the emptiest member stays one hop away at the tail.

use super::block::BlockHeader;
use super::superblock::Superblock;

/// Returns the size class index for an allocation of `size` bytes
pub(crate) fn index_for(size: usize) -> usize {
    size.max(1).next_power_of_two().trailing_zeros() as usize
}

/// Returns the block size in bytes served by the given class
pub(crate) fn bytes_for(index: usize) -> usize {
    1 << index
}

/// All Superblocks of one block size within a single Heap
#[derive(Debug)]
pub(crate) struct SizeClass {
    block_size: usize,
    first: *mut Superblock,
    length: usize,
}

impl SizeClass {
    pub(crate) const fn new(block_size: usize) -> Self {
        Self {
            block_size,
            first: std::ptr::null_mut(),
            length: 0,
        }
    }

    /// Unlinks a Superblock from the list
    ///
    /// # Safety
    /// The owning Heap's lock must be held and the Superblock must currently be a
    /// member of this list.
    pub(crate) unsafe fn remove(&mut self, superblock: *mut Superblock) {
        unsafe {
            if (*superblock).next == superblock {
                // sole member
                self.first = std::ptr::null_mut();
                self.length = 0;
            } else {
                let previous = (*superblock).prev;
                let next = (*superblock).next;
                (*previous).next = next;
                (*next).prev = previous;

                if self.first == superblock {
                    self.first = next;
                }
                self.length -= 1;
            }

            (*superblock).next = std::ptr::null_mut();
            (*superblock).prev = std::ptr::null_mut();
        }
    }

    /// Links a Superblock into the list at its rank position
    ///
    /// # Safety
    /// The owning Heap's lock must be held and the Superblock must not currently
    /// be on any list.
    pub(crate) unsafe fn insert(&mut self, superblock: *mut Superblock) {
        unsafe {
            debug_assert!(Superblock::block_size(superblock) == self.block_size);

            if self.first.is_null() {
                (*superblock).next = superblock;
                (*superblock).prev = superblock;
                self.first = superblock;
                self.length = 1;
                return;
            }

            let fullness = Superblock::fullness(superblock);

            // find the first member strictly less full than the newcomer; a full
            // lap means it is the emptiest and belongs at the tail
            let mut place_before = self.first;
            let mut steps = 0;
            while steps < self.length && Superblock::fullness(place_before) >= fullness {
                place_before = (*place_before).next;
                steps += 1;
            }

            let place_after = (*place_before).prev;
            (*place_after).next = superblock;
            (*superblock).prev = place_after;
            (*superblock).next = place_before;
            (*place_before).prev = superblock;

            if steps == 0 {
                // strictly fuller than the old head, the newcomer anchors the order
                self.first = superblock;
            }
            self.length += 1;
        }
    }

    /// Returns the fullest Superblock that still has a free block, or null
    ///
    /// # Safety
    /// The owning Heap's lock must be held.
    pub(crate) unsafe fn find_available(&self) -> *mut Superblock {
        let mut current = self.first;
        for _ in 0..self.length {
            unsafe {
                if Superblock::free_count(current) > 0 {
                    return current;
                }
                current = (*current).next;
            }
        }

        std::ptr::null_mut()
    }

    /// Returns the emptiest member, which the rank order keeps at the tail
    ///
    /// # Safety
    /// The owning Heap's lock must be held.
    pub(crate) unsafe fn find_mostly_empty(&self) -> *mut Superblock {
        if self.first.is_null() {
            return std::ptr::null_mut();
        }

        unsafe { (*self.first).prev }
    }

    /// Pops a block out of the given member and restores the rank order
    ///
    /// # Safety
    /// The owning Heap's lock must be held and the Superblock must be a member of
    /// this list.
    pub(crate) unsafe fn allocate_block(&mut self, superblock: *mut Superblock) -> *mut BlockHeader {
        let block = unsafe { Superblock::pop_block(superblock) };
        if block.is_null() {
            return std::ptr::null_mut();
        }

        // unlink + relink is all it takes to re-sort a single changed member
        unsafe {
            self.remove(superblock);
            self.insert(superblock);
        }

        block
    }

    /// Pushes a block back into the given member and restores the rank order
    ///
    /// # Safety
    /// The owning Heap's lock must be held, the Superblock must be a member of
    /// this list and `block` must have been carved out of it.
    pub(crate) unsafe fn free_block(&mut self, superblock: *mut Superblock, block: *mut BlockHeader) {
        unsafe {
            Superblock::push_block(superblock, block);
            self.remove(superblock);
            self.insert(superblock);
        }
    }
}

#[cfg(test)]
impl SizeClass {
    pub(crate) fn len(&self) -> usize {
        self.length
    }
}

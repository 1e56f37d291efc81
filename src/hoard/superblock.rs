//! Superblocks: the fixed-size regions all small allocations are carved out of
//!
//! A Superblock is one anonymous mapping holding its own metadata followed by a
//! [`SUPERBLOCK_SIZE`] byte buffer, partitioned into equal blocks of a single size
//! class. Free blocks sit on a LIFO stack threaded through their headers. Once
//! mapped, a Superblock lives for the rest of the process; it only ever changes
//! which Heap it is attached to.

use std::sync::{Mutex, MutexGuard};

use super::block::{BlockHeader, BLOCK_ALIGN, HEADER_SIZE};
use super::{fatal, pages, SUPERBLOCK_SIZE};

/// Marker for a Superblock that is attached to no Heap
pub(crate) const NO_OWNER: usize = usize::MAX;

/// The metadata at the start of every Superblock mapping, directly followed by
/// the block buffer
///
/// The fields fall under two different locks: the list links, counters and the
/// block stack belong to whichever Heap currently owns the Superblock and are
/// only touched with that Heap's lock held, while `owner_heap` is guarded by the
/// Superblock's own mutex so that a free racing a transfer can still resolve the
/// owner.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct Superblock {
    total_blocks: usize,
    free_blocks: usize,
    block_size: usize,
    pub(crate) next: *mut Superblock,
    pub(crate) prev: *mut Superblock,
    owner_heap: usize,
    free_stack: *mut BlockHeader,
    lock: Mutex<()>,
}

/// The distance between the starts of two adjacent blocks: the block size rounded
/// up to whole headers, plus the header riding in front of every block
pub(crate) fn block_stride(block_size: usize) -> usize {
    let headers = (block_size + 2 * HEADER_SIZE - 1) / HEADER_SIZE;
    headers * HEADER_SIZE
}

/// Where the block buffer starts relative to the mapping, keeping block alignment
const fn buffer_offset() -> usize {
    let meta = std::mem::size_of::<Superblock>();
    ((meta + BLOCK_ALIGN - 1) / BLOCK_ALIGN) * BLOCK_ALIGN
}

impl Superblock {
    /// Maps a fresh Superblock for the given size class and stages every block on
    /// the free stack, lowest address on top
    ///
    /// Returns null if the page provider refuses the mapping.
    pub(crate) fn acquire(block_size: usize) -> *mut Superblock {
        let stride = block_stride(block_size);
        let total_blocks = SUPERBLOCK_SIZE / stride;

        let raw = pages::acquire(buffer_offset() + SUPERBLOCK_SIZE);
        if raw.is_null() {
            return std::ptr::null_mut();
        }

        let superblock = raw as *mut Superblock;
        unsafe {
            superblock.write(Superblock {
                total_blocks,
                free_blocks: total_blocks,
                block_size,
                next: std::ptr::null_mut(),
                prev: std::ptr::null_mut(),
                owner_heap: NO_OWNER,
                free_stack: std::ptr::null_mut(),
                lock: Mutex::new(()),
            });

            let buffer = raw.add(buffer_offset());
            for index in 0..total_blocks {
                let block = buffer.add(index * stride) as *mut BlockHeader;
                (*block).owner = superblock;
                (*block).size = block_size;
                (*block).next = if index + 1 < total_blocks {
                    buffer.add((index + 1) * stride) as *mut BlockHeader
                } else {
                    std::ptr::null_mut()
                };
            }
            (*superblock).free_stack = buffer as *mut BlockHeader;
        }

        superblock
    }

    /// Detaches the top of the free stack, or returns null when every block is
    /// handed out
    ///
    /// The caller is responsible for restoring the Superblock's position in its
    /// size class list afterwards.
    ///
    /// # Safety
    /// The owning Heap's lock must be held.
    pub(crate) unsafe fn pop_block(this: *mut Superblock) -> *mut BlockHeader {
        unsafe {
            if (*this).free_blocks == 0 {
                return std::ptr::null_mut();
            }

            let block = (*this).free_stack;
            (*this).free_stack = (*block).next;
            (*this).free_blocks -= 1;

            // the owner stays in place for the eventual free
            (*block).next = std::ptr::null_mut();

            block
        }
    }

    /// Returns a block to the top of the free stack
    ///
    /// The caller is responsible for restoring the Superblock's position in its
    /// size class list afterwards.
    ///
    /// # Safety
    /// The owning Heap's lock must be held and `block` must have been carved out
    /// of this Superblock.
    pub(crate) unsafe fn push_block(this: *mut Superblock, block: *mut BlockHeader) {
        unsafe {
            if (*block).owner != this {
                fatal("hoardalloc: freed block belongs to a different superblock\n");
            }
            if (*this).free_blocks == (*this).total_blocks {
                fatal("hoardalloc: free stack overflow\n");
            }

            (*block).next = (*this).free_stack;
            (*this).free_stack = block;
            (*this).free_blocks += 1;
        }
    }

    /// The used fraction of this Superblock, in `[0, 1]`
    ///
    /// # Safety
    /// The owning Heap's lock must be held.
    pub(crate) unsafe fn fullness(this: *const Superblock) -> f64 {
        unsafe {
            let total = (*this).total_blocks as f64;
            let free = (*this).free_blocks as f64;
            (total - free) / total
        }
    }

    /// Bytes consumed by the handed-out blocks, counted in whole strides
    ///
    /// # Safety
    /// The owning Heap's lock must be held.
    pub(crate) unsafe fn bytes_used(this: *const Superblock) -> usize {
        unsafe {
            ((*this).total_blocks - (*this).free_blocks) * block_stride((*this).block_size)
        }
    }

    /// # Safety
    /// The owning Heap's lock must be held.
    pub(crate) unsafe fn free_count(this: *const Superblock) -> usize {
        unsafe { (*this).free_blocks }
    }

    /// # Safety
    /// `this` must point into a live Superblock mapping.
    pub(crate) unsafe fn block_size(this: *const Superblock) -> usize {
        unsafe { (*this).block_size }
    }

    /// Reads the id of the owning Heap under the Superblock mutex
    ///
    /// # Safety
    /// `this` must point into a live Superblock mapping.
    pub(crate) unsafe fn owner(this: *const Superblock) -> usize {
        let _guard = unsafe { Superblock::lock_meta(this as *mut Superblock) };
        unsafe { (*this).owner_heap }
    }

    /// Locks the Superblock for a transfer between two Heaps; the guard must be
    /// held across the paired remove and add so that no concurrent free observes
    /// the half-moved state
    ///
    /// # Safety
    /// `this` must point into a live Superblock mapping. Superblocks are never
    /// unmapped, so the guard may outlive any particular borrow of the pointer.
    pub(crate) unsafe fn lock_meta<'a>(this: *mut Superblock) -> MutexGuard<'a, ()> {
        let mutex = unsafe { &(*this).lock };
        match mutex.lock() {
            Ok(guard) => guard,
            Err(_) => fatal("hoardalloc: superblock mutex poisoned\n"),
        }
    }

    /// Records the Heap this Superblock is attached to
    ///
    /// # Safety
    /// The Superblock mutex must be held, unless the Superblock is not yet
    /// reachable by any other thread.
    pub(crate) unsafe fn set_owner(this: *mut Superblock, heap: usize) {
        unsafe { (*this).owner_heap = heap };
    }
}

#[cfg(test)]
impl Superblock {
    pub(crate) unsafe fn total_count(this: *const Superblock) -> usize {
        unsafe { (*this).total_blocks }
    }
}

//! Per-CPU Heaps and the transfer policy counters
//!
//! A Heap owns one size class list per class plus the two aggregate counters the
//! Hoard policy is built on: `bytes_used` (what callers are actually holding) and
//! `bytes_available` (what the Heap's Superblocks could hold). A per-CPU Heap
//! whose usage drops far enough below its capacity is under-utilized and starts
//! shedding its emptiest Superblocks to the global Heap.

use std::sync::{Mutex, MutexGuard};

use super::block::BlockHeader;
use super::size_class::{self, SizeClass};
use super::superblock::{Superblock, NO_OWNER};
use super::{fatal, HOARD_EMPTY_FRACTION, HOARD_K, NUMBER_OF_SIZE_CLASSES, SUPERBLOCK_SIZE};

/// One Heap: an array of size classes plus the aggregate usage counters
#[derive(Debug)]
pub(crate) struct CpuHeap {
    id: usize,
    bytes_used: usize,
    bytes_available: usize,
    size_classes: [SizeClass; NUMBER_OF_SIZE_CLASSES],
}

// The raw Superblock pointers inside the size class lists are only dereferenced
// by the thread holding this Heap's lock, and the mappings behind them stay alive
// for the rest of the process.
unsafe impl Send for CpuHeap {}

impl CpuHeap {
    pub(crate) const fn new(id: usize) -> Self {
        let size_classes = [
            SizeClass::new(1),
            SizeClass::new(2),
            SizeClass::new(4),
            SizeClass::new(8),
            SizeClass::new(16),
            SizeClass::new(32),
            SizeClass::new(64),
            SizeClass::new(128),
            SizeClass::new(256),
            SizeClass::new(512),
            SizeClass::new(1024),
            SizeClass::new(2048),
            SizeClass::new(4096),
            SizeClass::new(8192),
            SizeClass::new(16384),
            SizeClass::new(32768),
        ];

        Self {
            id,
            bytes_used: 0,
            bytes_available: 0,
            size_classes,
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Attaches a Superblock to this Heap and accounts for its capacity
    ///
    /// # Safety
    /// This Heap's lock must be held. For a transfer between two Heaps the
    /// Superblock mutex must additionally be held across the paired remove and
    /// add.
    pub(crate) unsafe fn add_superblock(&mut self, class_index: usize, superblock: *mut Superblock) {
        unsafe {
            self.size_classes[class_index].insert(superblock);
            Superblock::set_owner(superblock, self.id);
            self.bytes_available += SUPERBLOCK_SIZE;
            self.bytes_used += Superblock::bytes_used(superblock);
        }
    }

    /// Detaches a Superblock from this Heap
    ///
    /// # Safety
    /// Same locking rules as [`CpuHeap::add_superblock`].
    pub(crate) unsafe fn remove_superblock(
        &mut self,
        class_index: usize,
        superblock: *mut Superblock,
    ) {
        unsafe {
            self.size_classes[class_index].remove(superblock);
            Superblock::set_owner(superblock, NO_OWNER);
            self.bytes_available -= SUPERBLOCK_SIZE;
            self.bytes_used -= Superblock::bytes_used(superblock);
        }
    }

    /// Returns the fullest Superblock of the class that still has room, or null
    ///
    /// # Safety
    /// This Heap's lock must be held.
    pub(crate) unsafe fn find_available(&self, class_index: usize) -> *mut Superblock {
        unsafe { self.size_classes[class_index].find_available() }
    }

    /// Pops a block out of the given Superblock, keeping the usage counter in step
    ///
    /// Returns the user pointer, or null if the Superblock had nothing left.
    ///
    /// # Safety
    /// This Heap's lock must be held and the Superblock must be owned by this
    /// Heap.
    pub(crate) unsafe fn allocate_from(&mut self, superblock: *mut Superblock) -> *mut u8 {
        unsafe {
            let class_index = size_class::index_for(Superblock::block_size(superblock));

            let used_before = Superblock::bytes_used(superblock);
            let block = self.size_classes[class_index].allocate_block(superblock);
            self.bytes_used += Superblock::bytes_used(superblock) - used_before;

            if block.is_null() {
                return std::ptr::null_mut();
            }
            BlockHeader::user(block)
        }
    }

    /// Pushes a block back into its Superblock, keeping the usage counter in step
    ///
    /// # Safety
    /// This Heap's lock must be held and the block's Superblock must be owned by
    /// this Heap.
    pub(crate) unsafe fn free_into(&mut self, block: *mut BlockHeader) {
        unsafe {
            let superblock = (*block).owner;
            let class_index = size_class::index_for(Superblock::block_size(superblock));

            let used_before = Superblock::bytes_used(superblock);
            self.size_classes[class_index].free_block(superblock, block);
            self.bytes_used -= used_before - Superblock::bytes_used(superblock);
        }
    }

    /// The Hoard transfer condition: the Heap holds noticeably more memory than
    /// its threads are using
    pub(crate) fn under_utilized(&self) -> bool {
        let used = self.bytes_used as f64;
        let available = self.bytes_available as f64;

        used < available * (1.0 - HOARD_EMPTY_FRACTION)
            && self.bytes_used < self.bytes_available.saturating_sub(HOARD_K * SUPERBLOCK_SIZE)
    }

    /// Scans every size class for the overall least full Superblock
    ///
    /// # Safety
    /// This Heap's lock must be held.
    pub(crate) unsafe fn find_mostly_empty_superblock(&self) -> *mut Superblock {
        let mut least = std::ptr::null_mut();
        // above every real fullness, so even a completely full member can move
        let mut least_fullness = 2.0;

        for class in self.size_classes.iter() {
            let candidate = unsafe { class.find_mostly_empty() };
            if candidate.is_null() {
                continue;
            }

            let fullness = unsafe { Superblock::fullness(candidate) };
            if fullness < least_fullness {
                least = candidate;
                least_fullness = fullness;
            }
        }

        least
    }
}

#[cfg(test)]
impl CpuHeap {
    pub(crate) fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub(crate) fn bytes_available(&self) -> usize {
        self.bytes_available
    }

    pub(crate) fn class_len(&self, class_index: usize) -> usize {
        self.size_classes[class_index].len()
    }
}

/// A Heap behind its mutex
///
/// Lock poisoning is not a state the allocator can continue from, so a poisoned
/// Heap mutex aborts instead of propagating an error nobody can handle.
#[derive(Debug)]
pub(crate) struct HeapLock {
    inner: Mutex<CpuHeap>,
}

impl HeapLock {
    pub(crate) const fn new(heap: CpuHeap) -> Self {
        Self {
            inner: Mutex::new(heap),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CpuHeap> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => fatal("hoardalloc: heap mutex poisoned\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::superblock::block_stride;
    use super::*;

    #[test]
    fn counters_follow_the_attached_superblocks() {
        let mut heap = CpuHeap::new(1);
        let class_index = size_class::index_for(64);
        let superblock = Superblock::acquire(64);
        assert!(!superblock.is_null());

        unsafe {
            heap.add_superblock(class_index, superblock);
            assert_eq!(SUPERBLOCK_SIZE, heap.bytes_available());
            assert_eq!(0, heap.bytes_used());
            assert_eq!(1, Superblock::owner(superblock));

            let ptr = heap.allocate_from(superblock);
            assert!(!ptr.is_null());
            assert_eq!(block_stride(64), heap.bytes_used());

            heap.free_into(BlockHeader::from_user(ptr));
            assert_eq!(0, heap.bytes_used());

            heap.remove_superblock(class_index, superblock);
            assert_eq!(0, heap.bytes_available());
            assert_eq!(NO_OWNER, Superblock::owner(superblock));
        }
    }

    #[test]
    fn transferred_usage_moves_between_heaps() {
        let mut source = CpuHeap::new(1);
        let mut target = CpuHeap::new(2);
        let class_index = size_class::index_for(512);
        let superblock = Superblock::acquire(512);

        unsafe {
            source.add_superblock(class_index, superblock);
            let first = source.allocate_from(superblock);
            let second = source.allocate_from(superblock);
            assert!(!first.is_null() && !second.is_null());

            let moved = source.bytes_used();
            source.remove_superblock(class_index, superblock);
            target.add_superblock(class_index, superblock);

            assert_eq!(0, source.bytes_used());
            assert_eq!(0, source.bytes_available());
            assert_eq!(moved, target.bytes_used());
            assert_eq!(SUPERBLOCK_SIZE, target.bytes_available());
            assert_eq!(2, Superblock::owner(superblock));
        }
    }

    #[test]
    fn under_utilized_tracks_the_empty_fraction() {
        let mut heap = CpuHeap::new(1);
        assert!(!heap.under_utilized());

        let class_index = size_class::index_for(4096);
        let superblock = Superblock::acquire(4096);
        unsafe { heap.add_superblock(class_index, superblock) };

        // entirely free: trivially under the threshold
        assert!(heap.under_utilized());

        let total = SUPERBLOCK_SIZE / block_stride(4096);
        let pointers: Vec<*mut u8> = (0..total)
            .map(|_| unsafe { heap.allocate_from(superblock) })
            .collect();
        assert!(!heap.under_utilized());

        // drop back under 75% usage
        for pointer in pointers.iter().take(total - 3) {
            unsafe { heap.free_into(BlockHeader::from_user(*pointer)) };
        }
        assert!(heap.under_utilized());
    }

    #[test]
    fn least_full_superblock_wins_across_classes() {
        let mut heap = CpuHeap::new(1);

        let crowded = Superblock::acquire(1024);
        let quiet = Superblock::acquire(4096);

        unsafe {
            heap.add_superblock(size_class::index_for(1024), crowded);
            heap.add_superblock(size_class::index_for(4096), quiet);

            for _ in 0..10 {
                assert!(!heap.allocate_from(crowded).is_null());
            }
            assert!(!heap.allocate_from(quiet).is_null());

            assert_eq!(quiet, heap.find_mostly_empty_superblock());
        }
    }
}

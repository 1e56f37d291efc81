use super::superblock::Superblock;

/// The fixed prefix sitting in front of every allocation handed to a caller
///
/// For small blocks `owner` points at the carrying Superblock and `size` records
/// the block's size class in bytes. Large blocks keep a null `owner` and their
/// exact request size, which is all `free` needs to route them. `next` only means
/// something while the block sits on its Superblock's free stack.
#[repr(C, align(16))]
#[derive(Debug)]
pub(crate) struct BlockHeader {
    pub(crate) next: *mut BlockHeader,
    pub(crate) owner: *mut Superblock,
    pub(crate) size: usize,
}

/// Bytes occupied by a header, which is also the granularity blocks are laid out in
pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();

/// Alignment of every pointer the allocator returns
pub(crate) const BLOCK_ALIGN: usize = std::mem::align_of::<BlockHeader>();

impl BlockHeader {
    /// Returns the header sitting in front of a user pointer
    ///
    /// # Safety
    /// `ptr` must have been produced by [`BlockHeader::user`].
    pub(crate) unsafe fn from_user(ptr: *mut u8) -> *mut BlockHeader {
        unsafe { ptr.sub(HEADER_SIZE) as *mut BlockHeader }
    }

    /// Returns the user pointer of a block, directly behind its header
    ///
    /// # Safety
    /// `this` must point at a block header inside a live mapping with at least
    /// `HEADER_SIZE` usable bytes behind it.
    pub(crate) unsafe fn user(this: *mut BlockHeader) -> *mut u8 {
        unsafe { (this as *mut u8).add(HEADER_SIZE) }
    }
}

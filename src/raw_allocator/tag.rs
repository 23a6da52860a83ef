//! The boundary tag stored at both ends of every block.

/// A single boundary tag: the size of a block and whether it is allocated.
///
/// The tag is packed into one 4-byte word. The size of a block is always a
/// multiple of 8, so the lowest three bits of the size are known to be zero
/// and can carry flags instead. Only bit 0 is used: it is set for allocated
/// blocks.
/// ```text
/// 31                             3  2  1  0
/// +-------------------------------+--+--+--+
/// |       size (bits 31..3)       | 0| 0| a|
/// +-------------------------------+--+--+--+
/// ```
/// The same tag is written as the header (right before the payload) and as
/// the footer (the last word of the block), which allows navigating to both
/// neighbors of a block in constant time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(u32);
impl Tag {
    /// The header of the epilogue: a zero-sized allocated block.
    pub const EPILOGUE: Self = Self::used(0);

    const ALLOCATED: u32 = 0x1;
    const SIZE_MASK: u32 = !0x7;

    /// Create a tag for a free block of the given total size.
    pub const fn free(size: usize) -> Self {
        Self::pack(size, false)
    }

    /// Create a tag for an allocated block of the given total size.
    pub const fn used(size: usize) -> Self {
        Self::pack(size, true)
    }

    const fn pack(size: usize, allocated: bool) -> Self {
        debug_assert!(size % 8 == 0, "block sizes are multiples of 8");
        debug_assert!(size <= u32::MAX as usize, "block size exceeds a tag");
        let flag = if allocated { Self::ALLOCATED } else { 0 };
        Self(size as u32 | flag)
    }

    /// The total size of the block including header and footer.
    pub const fn size(self) -> usize {
        (self.0 & Self::SIZE_MASK) as usize
    }

    /// Whether the block is handed out to a user (or is a sentinel).
    pub const fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED != 0
    }

    /// Whether the block can be used to satisfy an allocation.
    pub const fn is_free(self) -> bool {
        !self.is_allocated()
    }

    /// Reinterpret a raw word as a tag.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw word as stored in the heap.
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

//! Interpretation of the raw arena bytes as a sequence of tagged blocks.
//!
//! This is the only place where the heap memory is reinterpreted. Everything
//! above works with [`Block`]-handles and [`Tag`]s.
use super::tag::Tag;

use core::mem::{self, MaybeUninit};
use core::ptr::NonNull;

/// The size of a boundary tag or a free-list link.
pub const WORD: usize = 4;
/// The alignment unit of all blocks and payloads.
pub const DOUBLE: usize = 8;
/// The smallest block: header, two links and footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DOUBLE;

/// A handle to a block, i.e. the offset of its payload inside the arena.
///
/// The header of the block is located one [`WORD`] before that offset. Block
/// handles are ordered by their address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Block(u32);
impl Block {
    /// The prologue block, which is always the first block in the arena.
    ///
    /// It is preceded by a word of padding and its own header, so that its
    /// payload (and the payload of every following block) is 8-byte aligned.
    pub const PROLOGUE: Self = Self(DOUBLE as u32);

    /// Create a block handle from a payload offset.
    pub const fn at(offset: usize) -> Self {
        debug_assert!(offset <= u32::MAX as usize, "offset exceeds the arena");
        Self(offset as u32)
    }

    /// The offset of the payload from the start of the arena.
    pub const fn offset(self) -> usize {
        self.0 as usize
    }
}

/// Which of the two links of a free block is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// The predecessor, stored in the first payload word.
    Prev,
    /// The successor, stored in the second payload word.
    Next,
}

/// Plain 4-byte values which may be stored in heap words.
///
/// # Safety
/// Implementors must be `repr(transparent)` wrappers around `u32`, so that
/// every bit pattern written by the allocator can be read back.
unsafe trait Word: Copy {}
// SAFETY: `Tag` is a transparent `u32`
unsafe impl Word for Tag {}
// SAFETY: `Block` is a transparent `u32`
unsafe impl Word for Block {}

/// The grown part of the arena, viewed as blocks.
pub struct Buffer<'memory>(&'memory mut [MaybeUninit<u8>]);
impl<'memory> Buffer<'memory> {
    /// View the given arena memory as a heap.
    ///
    /// # Panics
    /// This function panics if the memory does not start at an 8-byte aligned
    /// address.
    pub fn new(memory: &'memory mut [MaybeUninit<u8>]) -> Self {
        assert!(
            memory.as_ptr() as usize % DOUBLE == 0,
            "arena memory must be 8-byte aligned"
        );
        Self(memory)
    }

    /// The number of bytes the arena has grown to so far.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing of the arena is used so far.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Obtain a reference to a word inside of the buffer.
    ///
    /// The returned memory points into the buffer itself. The caller has to
    /// guarantee, that a valid value was written to this word before reading
    /// it, which is why a [`MaybeUninit`] is returned.
    ///
    /// # Panics
    /// This function panics if the offset is not properly aligned for the word
    /// or if reading the word would read past the end of the buffer.
    fn at<T: Word>(&self, offset: usize) -> &MaybeUninit<T> {
        assert!(offset % mem::align_of::<T>() == 0);
        assert!(offset + mem::size_of::<T>() <= self.0.len());

        // SAFETY: the word is in bounds of the buffer memory, as checked by the
        // assertion above. The buffer start is 8-byte aligned (checked in
        // `new()`) and the offset is a multiple of the word alignment, so the
        // resulting pointer is aligned as well. `T` is a plain 4-byte value
        // (see `Word`), so reinterpreting the bytes is fine as long as the
        // caller only reads words that were written before.
        unsafe {
            let memory = self.0[offset..offset + mem::size_of::<T>()].as_ptr();
            #[allow(clippy::cast_ptr_alignment)] // alignment is asserted above
            &*memory.cast::<MaybeUninit<T>>()
        }
    }

    /// Obtain a mutable reference to a word inside of the buffer.
    ///
    /// Please see [`at()`](Self::at) for details.
    fn at_mut<T: Word>(&mut self, offset: usize) -> &mut MaybeUninit<T> {
        assert!(offset % mem::align_of::<T>() == 0);
        assert!(offset + mem::size_of::<T>() <= self.0.len());

        // SAFETY: same as `at()`
        unsafe {
            let memory = self.0[offset..offset + mem::size_of::<T>()].as_mut_ptr();
            #[allow(clippy::cast_ptr_alignment)] // alignment is asserted above
            &mut *memory.cast::<MaybeUninit<T>>()
        }
    }

    fn tag(&self, offset: usize) -> Tag {
        // SAFETY: every header and footer offset derived from a valid block is
        // written before it is read (heap invariant)
        unsafe { self.at::<Tag>(offset).assume_init() }
    }

    /// Write the padding word, the prologue and the epilogue header.
    ///
    /// This lays out the initial heap, which has to be exactly
    /// `prologue_size + DOUBLE` bytes long.
    pub fn init_sentinels(&mut self, prologue_size: usize) {
        debug_assert_eq!(self.len(), prologue_size + DOUBLE);
        self.at_mut::<Tag>(0).write(Tag::free(0));
        self.set_tags(Block::PROLOGUE, Tag::used(prologue_size));
        let epilogue = self.next(Block::PROLOGUE);
        self.set_header(epilogue, Tag::EPILOGUE);
    }

    /// Read the header of a block.
    pub fn header(&self, block: Block) -> Tag {
        self.tag(block.offset() - WORD)
    }

    /// Read the footer of a block, located via the size in its header.
    pub fn footer(&self, block: Block) -> Tag {
        let size = self.header(block).size();
        self.tag(block.offset() + size - DOUBLE)
    }

    /// Read the footer of the block physically preceding `block`.
    pub fn prev_footer(&self, block: Block) -> Tag {
        self.tag(block.offset() - DOUBLE)
    }

    /// Overwrite only the header of a block.
    pub fn set_header(&mut self, block: Block, tag: Tag) {
        self.at_mut(block.offset() - WORD).write(tag);
    }

    /// Write the header and the footer of a block.
    ///
    /// The footer position is derived from the size in `tag`, not from the
    /// current header. This is what makes it possible to grow a block over its
    /// neighbor in a single step.
    pub fn set_tags(&mut self, block: Block, tag: Tag) {
        self.set_header(block, tag);
        self.at_mut(block.offset() + tag.size() - DOUBLE).write(tag);
    }

    /// The block physically following `block`.
    pub fn next(&self, block: Block) -> Block {
        Block::at(block.offset() + self.header(block).size())
    }

    /// The block physically preceding `block`.
    ///
    /// This reads the footer of the previous block, which is always present.
    pub fn prev(&self, block: Block) -> Block {
        Block::at(block.offset() - self.prev_footer(block).size())
    }

    /// The first block after the prologue.
    pub fn first(&self) -> Block {
        self.next(Block::PROLOGUE)
    }

    /// Read a free-list link of a block.
    pub fn link(&self, block: Block, link: Link) -> Block {
        // SAFETY: links are only read from blocks in the free list, whose links
        // were written on insertion
        unsafe { self.at::<Block>(Self::link_offset(block, link)).assume_init() }
    }

    /// Write a free-list link of a block.
    pub fn set_link(&mut self, block: Block, link: Link, target: Block) {
        self.at_mut(Self::link_offset(block, link)).write(target);
    }

    const fn link_offset(block: Block, link: Link) -> usize {
        match link {
            Link::Prev => block.offset(),
            Link::Next => block.offset() + WORD,
        }
    }

    /// The usable bytes of a block, i.e. everything between the tags.
    pub fn payload(&mut self, block: Block) -> &mut [MaybeUninit<u8>] {
        let size = self.header(block).size();
        let offset = block.offset();
        &mut self.0[offset..offset + size - DOUBLE]
    }

    /// Copy `len` bytes from the payload of `from` to the payload of `to`.
    ///
    /// # Panics
    /// This panics if either payload is shorter than `len`.
    pub fn copy_payload(&mut self, from: Block, to: Block, len: usize) {
        assert!(len <= self.header(from).size() - DOUBLE);
        assert!(len <= self.header(to).size() - DOUBLE);
        let from = from.offset();
        self.0.copy_within(from..from + len, to.offset());
    }

    /// The address of the payload of a block, as handed out to users.
    pub fn pointer(&mut self, block: Block) -> NonNull<u8> {
        assert!(block.offset() < self.0.len());
        let base = NonNull::from(&mut *self.0).cast::<u8>();
        // SAFETY: the offset is in bounds of the buffer (asserted above), so
        // the resulting pointer stays inside the same allocation.
        unsafe { base.add(block.offset()) }
    }

    /// The block handle belonging to a payload address.
    ///
    /// No validation is performed, the handle of a foreign pointer is garbage.
    pub fn block_of(&self, ptr: NonNull<u8>) -> Block {
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.0.as_ptr() as usize);
        Block::at(offset.min(u32::MAX as usize))
    }

    /// Iterate over all blocks starting at `start` up to the epilogue.
    pub fn blocks_from(&self, start: Block) -> BlockIter<'_, 'memory> {
        BlockIter {
            buffer: self,
            current: start,
        }
    }

    /// Iterate over all blocks between the prologue and the epilogue.
    pub fn blocks(&self) -> BlockIter<'_, 'memory> {
        self.blocks_from(self.first())
    }
}

/// An iterator over consecutive blocks, which stops at the epilogue.
pub struct BlockIter<'buffer, 'memory> {
    buffer: &'buffer Buffer<'memory>,
    current: Block,
}
impl Iterator for BlockIter<'_, '_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current;
        let size = self.buffer.header(block).size();
        if size == 0 {
            return None;
        }
        self.current = Block::at(block.offset() + size);
        Some(block)
    }
}

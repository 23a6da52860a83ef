//! Introspection and consistency checking of a heap.
use super::buffer::{Block, Buffer, DOUBLE, MIN_BLOCK_SIZE};
use super::registry::Registry;
use super::tag::Tag;

use thiserror::Error;

/// A violated heap invariant, as reported by
/// [`RawAllocator::check()`](crate::RawAllocator::check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CheckError {
    /// The prologue block does not carry the expected tags.
    #[error("prologue corrupted: expected {expected:?}, found {found:?}")]
    BadPrologue {
        /// The tag the registry requires.
        expected: Tag,
        /// The header that was actually found.
        found: Tag,
    },
    /// The block sequence does not end in an epilogue at the end of the arena.
    #[error("no epilogue at the end of the heap, sequence ends at offset {offset}")]
    BadEpilogue {
        /// The offset where the block sequence ended.
        offset: usize,
    },
    /// A block is not aligned to 8 bytes.
    #[error("block at offset {offset} is not 8-byte aligned")]
    Misaligned {
        /// The offset of the block.
        offset: usize,
    },
    /// A block has an invalid size.
    #[error("block at offset {offset} has invalid size {size}")]
    BadSize {
        /// The offset of the block.
        offset: usize,
        /// The size read from the header.
        size: usize,
    },
    /// A block reaches past the end of the arena.
    #[error("block at offset {offset} exceeds the heap")]
    OutOfBounds {
        /// The offset of the block.
        offset: usize,
    },
    /// The header and the footer of a block disagree.
    #[error("block at offset {offset} has header {header:?} but footer {footer:?}")]
    TagMismatch {
        /// The offset of the block.
        offset: usize,
        /// The header of the block.
        header: Tag,
        /// The footer of the block.
        footer: Tag,
    },
    /// Two physically adjacent blocks are both free.
    #[error("adjacent blocks at offsets {first} and {second} are both free")]
    Uncoalesced {
        /// The offset of the lower block.
        first: usize,
        /// The offset of the upper block.
        second: usize,
    },
    /// The free list contains a block, that is not free.
    #[error("free list entry at offset {offset} is not a free block")]
    NotFree {
        /// The offset of the listed block.
        offset: usize,
    },
    /// The free list links are not consistent.
    #[error("free list broken at offset {offset}")]
    BrokenLink {
        /// The offset of the block with the broken link.
        offset: usize,
    },
    /// The free list and the heap disagree on the number of free blocks.
    #[error("free list holds {listed} blocks, but the heap has {free} free blocks")]
    FreeListMismatch {
        /// The number of blocks reachable from the free list.
        listed: usize,
        /// The number of blocks with a free header.
        free: usize,
    },
    /// The next-fit cursor does not point to the start of a block.
    #[error("cursor at offset {offset} does not point to a block")]
    StaleCursor {
        /// The offset the cursor points to.
        offset: usize,
    },
}

/// A block as seen from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockInfo {
    /// A block handed out to a user.
    Allocated {
        /// The handle of the block.
        block: Block,
        /// The total size including the tags.
        size: usize,
    },
    /// A block available for allocation.
    Free {
        /// The handle of the block.
        block: Block,
        /// The total size including the tags.
        size: usize,
    },
}
impl BlockInfo {
    pub(crate) fn read(buffer: &Buffer<'_>, block: Block) -> Self {
        let tag = buffer.header(block);
        if tag.is_allocated() {
            Self::Allocated {
                block,
                size: tag.size(),
            }
        } else {
            Self::Free {
                block,
                size: tag.size(),
            }
        }
    }

    /// The handle of the block.
    pub fn block(&self) -> Block {
        match *self {
            Self::Allocated { block, .. } | Self::Free { block, .. } => block,
        }
    }

    /// The total size of the block including the tags.
    pub fn size(&self) -> usize {
        match *self {
            Self::Allocated { size, .. } | Self::Free { size, .. } => size,
        }
    }

    /// Whether the block is free.
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free { .. })
    }
}

/// Summary of the current heap usage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// The number of bytes the arena has grown to.
    pub arena_size: usize,
    /// The number of allocated blocks.
    pub allocated_blocks: usize,
    /// The total size of all allocated blocks including their tags.
    pub allocated_bytes: usize,
    /// The number of free blocks.
    pub free_blocks: usize,
    /// The total size of all free blocks including their tags.
    pub free_bytes: usize,
    /// The size of the largest free block.
    pub largest_free: usize,
}
impl HeapStats {
    fn record(&mut self, info: BlockInfo) {
        match info {
            BlockInfo::Allocated { size, .. } => {
                self.allocated_blocks += 1;
                self.allocated_bytes += size;
            }
            BlockInfo::Free { size, .. } => {
                self.free_blocks += 1;
                self.free_bytes += size;
                self.largest_free = self.largest_free.max(size);
            }
        }
    }
}

/// Collect the statistics of a consistent heap.
pub(crate) fn stats(buffer: &Buffer<'_>) -> HeapStats {
    let mut stats = HeapStats {
        arena_size: buffer.len(),
        ..HeapStats::default()
    };
    for block in buffer.blocks() {
        stats.record(BlockInfo::read(buffer, block));
    }
    stats
}

/// Validate every structural invariant of the heap.
///
/// Unlike the regular heap operations, this never trusts a size before it is
/// bounds-checked, so it reports corruption instead of panicking.
pub(crate) fn check<R: Registry>(buffer: &Buffer<'_>, registry: &R) -> Result<HeapStats, CheckError> {
    let expected = Tag::used(R::PROLOGUE_SIZE);
    let len = buffer.len();
    if len < R::PROLOGUE_SIZE + DOUBLE {
        return Err(CheckError::BadEpilogue { offset: len });
    }
    let found = buffer.header(Block::PROLOGUE);
    if found != expected || buffer.footer(Block::PROLOGUE) != expected {
        return Err(CheckError::BadPrologue { expected, found });
    }

    let mut stats = HeapStats {
        arena_size: len,
        ..HeapStats::default()
    };
    let mut previous_free = None;
    let mut block = buffer.first();
    loop {
        let offset = block.offset();
        if offset % DOUBLE != 0 {
            return Err(CheckError::Misaligned { offset });
        }
        if offset > len {
            return Err(CheckError::OutOfBounds { offset });
        }
        let header = buffer.header(block);
        if header.size() == 0 {
            if header != Tag::EPILOGUE || offset != len {
                return Err(CheckError::BadEpilogue { offset });
            }
            break;
        }
        if header.size() < MIN_BLOCK_SIZE {
            return Err(CheckError::BadSize {
                offset,
                size: header.size(),
            });
        }
        // the header of the following block has to be in bounds as well
        if offset + header.size() > len {
            return Err(CheckError::OutOfBounds { offset });
        }
        let footer = buffer.footer(block);
        if header != footer {
            return Err(CheckError::TagMismatch {
                offset,
                header,
                footer,
            });
        }
        if header.is_free() {
            if let Some(first) = previous_free {
                return Err(CheckError::Uncoalesced {
                    first,
                    second: offset,
                });
            }
            previous_free = Some(offset);
        } else {
            previous_free = None;
        }
        stats.record(BlockInfo::read(buffer, block));
        block = Block::at(offset + header.size());
    }

    registry.verify(buffer, stats.free_blocks)?;
    Ok(stats)
}

use super::Registry;
use crate::raw_allocator::buffer::{Block, Buffer, DOUBLE};
use crate::raw_allocator::check::CheckError;

/// Next-fit search over the implicit block sequence.
///
/// There is no list of free blocks: the search reads the header of every block
/// in address order. Instead of always starting at the first block, the search
/// resumes at the block chosen last time (the cursor) and wraps around to the
/// start of the heap once, stopping at the original cursor position.
/// ```text
///            cursor
///              v
/// | used | free | used | used | free | used |
///              ------------------------------> 1st pass up to the epilogue
///  ----------->                               2nd pass up to the cursor
/// ```
/// The cursor is cleared if no block fits, so the search after growing the heap
/// starts from the beginning again.
#[derive(Debug)]
pub struct NextFit {
    cursor: Option<Block>,
}

impl NextFit {
    /// The block the next search starts at, if any.
    pub fn cursor(&self) -> Option<Block> {
        self.cursor
    }

    fn fits(buffer: &Buffer<'_>, block: Block, size: usize) -> bool {
        let tag = buffer.header(block);
        tag.is_free() && tag.size() >= size
    }
}

impl super::sealed::Sealed for NextFit {}

impl Registry for NextFit {
    const EMPTY: Self = Self { cursor: None };
    const PROLOGUE_SIZE: usize = DOUBLE;

    fn init(&mut self, _buffer: &mut Buffer<'_>) {
        self.cursor = None;
    }

    fn insert(&mut self, _buffer: &mut Buffer<'_>, _block: Block) {}

    fn remove(&mut self, _buffer: &mut Buffer<'_>, _block: Block) {}

    fn find_fit(&mut self, buffer: &Buffer<'_>, size: usize) -> Option<Block> {
        let first = buffer.first();
        let start = self.cursor.unwrap_or(first);

        let mut found = buffer
            .blocks_from(start)
            .find(|&block| Self::fits(buffer, block, size));
        if found.is_none() {
            if let Some(stop) = self.cursor {
                found = buffer
                    .blocks_from(first)
                    .take_while(|&block| block < stop)
                    .find(|&block| Self::fits(buffer, block, size));
            }
        }

        self.cursor = found;
        found
    }

    fn retarget(&mut self, buffer: &Buffer<'_>, block: Block) {
        if let Some(cursor) = self.cursor {
            let end = block.offset() + buffer.header(block).size();
            if block < cursor && cursor.offset() < end {
                self.cursor = Some(block);
            }
        }
    }

    fn verify(&self, buffer: &Buffer<'_>, _free_blocks: usize) -> Result<(), CheckError> {
        match self.cursor {
            Some(cursor) if !buffer.blocks().any(|block| block == cursor) => {
                Err(CheckError::StaleCursor {
                    offset: cursor.offset(),
                })
            }
            _ => Ok(()),
        }
    }
}

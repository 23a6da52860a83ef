use super::Registry;
use crate::raw_allocator::buffer::{Block, Buffer, Link, DOUBLE};
use crate::raw_allocator::check::CheckError;

/// First-fit search over an explicit free list.
///
/// The free blocks form a circular doubly-linked list, which is rooted at the
/// prologue block: the prologue payload holds the links to the newest and the
/// oldest free block. An empty list is a prologue linked to itself.
/// ```text
///   +----------+     +---------+     +---------+
/// +>| prologue |<--->| free #2 |<--->| free #1 |<+
/// | +----------+     +---------+     +---------+ |
/// +-----------------------------------------------+
/// ```
/// New blocks are always pushed right after the root, so the search hits
/// recently freed memory first. Insertion and removal are `O(1)`, the search is
/// linear in the number of free blocks.
#[derive(Debug)]
pub struct FirstFit(());

impl FirstFit {
    const ROOT: Block = Block::PROLOGUE;
}

impl super::sealed::Sealed for FirstFit {}

impl Registry for FirstFit {
    const EMPTY: Self = Self(());
    const PROLOGUE_SIZE: usize = 2 * DOUBLE;

    fn init(&mut self, buffer: &mut Buffer<'_>) {
        buffer.set_link(Self::ROOT, Link::Prev, Self::ROOT);
        buffer.set_link(Self::ROOT, Link::Next, Self::ROOT);
    }

    fn insert(&mut self, buffer: &mut Buffer<'_>, block: Block) {
        let head = buffer.link(Self::ROOT, Link::Next);
        buffer.set_link(block, Link::Prev, Self::ROOT);
        buffer.set_link(block, Link::Next, head);
        buffer.set_link(head, Link::Prev, block);
        buffer.set_link(Self::ROOT, Link::Next, block);
    }

    fn remove(&mut self, buffer: &mut Buffer<'_>, block: Block) {
        let prev = buffer.link(block, Link::Prev);
        let next = buffer.link(block, Link::Next);
        buffer.set_link(prev, Link::Next, next);
        buffer.set_link(next, Link::Prev, prev);
    }

    fn find_fit(&mut self, buffer: &Buffer<'_>, size: usize) -> Option<Block> {
        let mut block = buffer.link(Self::ROOT, Link::Next);
        while block != Self::ROOT {
            if buffer.header(block).size() >= size {
                return Some(block);
            }
            block = buffer.link(block, Link::Next);
        }
        None
    }

    fn verify(&self, buffer: &Buffer<'_>, free_blocks: usize) -> Result<(), CheckError> {
        let mut listed = 0;
        let mut prev = Self::ROOT;
        let mut block = buffer.link(Self::ROOT, Link::Next);
        while block != Self::ROOT {
            let offset = block.offset();
            // a cycle not passing the root would loop forever otherwise
            if listed == free_blocks {
                return Err(CheckError::FreeListMismatch {
                    listed: listed + 1,
                    free: free_blocks,
                });
            }
            if offset % DOUBLE != 0 || offset < 2 * DOUBLE || offset + DOUBLE > buffer.len() {
                return Err(CheckError::BrokenLink { offset });
            }
            if !buffer.header(block).is_free() {
                return Err(CheckError::NotFree { offset });
            }
            if buffer.link(block, Link::Prev) != prev {
                return Err(CheckError::BrokenLink { offset });
            }
            listed += 1;
            prev = block;
            block = buffer.link(block, Link::Next);
        }
        if buffer.link(Self::ROOT, Link::Prev) != prev {
            return Err(CheckError::BrokenLink {
                offset: Self::ROOT.offset(),
            });
        }
        if listed != free_blocks {
            return Err(CheckError::FreeListMismatch {
                listed,
                free: free_blocks,
            });
        }
        Ok(())
    }
}

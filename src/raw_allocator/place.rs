//! Turning a free block into an allocation of a given size.
use super::buffer::{Block, Buffer, MIN_BLOCK_SIZE};
use super::coalesce;
use super::registry::Registry;
use super::tag::Tag;

/// Allocate `size` bytes of the free, registered `block`.
///
/// The block is removed from the registry and then [carved](carve) to the
/// requested size.
pub fn place<R: Registry>(buffer: &mut Buffer<'_>, registry: &mut R, block: Block, size: usize) {
    registry.remove(buffer, block);
    carve(buffer, registry, block, size);
}

/// Mark the unregistered `block` as allocated with (at least) `size` bytes.
///
/// If the remainder of the block can hold a block on its own, the block is
/// split and the remainder is released as a new free block (merged with its
/// successor, if that is free as well). Otherwise the whole block is used and
/// the few excess bytes are wasted.
/// ```text
/// before: | block (current size)                |
/// split:  | block (size)     | remainder (free) |
/// ```
pub fn carve<R: Registry>(buffer: &mut Buffer<'_>, registry: &mut R, block: Block, size: usize) {
    let current = buffer.header(block).size();
    debug_assert!(current >= size, "block too small for the placement");

    if current - size >= MIN_BLOCK_SIZE {
        buffer.set_tags(block, Tag::used(size));
        registry.retarget(buffer, block);
        let remainder = buffer.next(block);
        buffer.set_tags(remainder, Tag::free(current - size));
        coalesce::merge(buffer, registry, remainder);
    } else {
        buffer.set_tags(block, Tag::used(current));
        registry.retarget(buffer, block);
    }
}

#[cfg(test)]
mod tests {
    use super::{carve, place};
    use crate::raw_allocator::buffer::{Block, Buffer, DOUBLE};
    use crate::raw_allocator::check::check;
    use crate::raw_allocator::registry::{FirstFit, Registry};
    use crate::raw_allocator::tag::Tag;

    use core::mem::MaybeUninit;

    #[repr(align(8))]
    struct Memory([MaybeUninit<u8>; 256]);

    fn heap<'m>(
        memory: &'m mut Memory,
        registry: &mut FirstFit,
        tags: &[Tag],
    ) -> (Buffer<'m>, std::vec::Vec<Block>) {
        let initial = FirstFit::PROLOGUE_SIZE + DOUBLE;
        let mut buffer = Buffer::new(&mut memory.0[..initial]);
        buffer.init_sentinels(FirstFit::PROLOGUE_SIZE);
        registry.init(&mut buffer);

        let len = initial + tags.iter().map(|tag| tag.size()).sum::<usize>();
        let mut buffer = Buffer::new(&mut memory.0[..len]);
        let mut blocks = std::vec::Vec::new();
        let mut block = buffer.first();
        for &tag in tags {
            buffer.set_tags(block, tag);
            if tag.is_free() {
                registry.insert(&mut buffer, block);
            }
            blocks.push(block);
            block = buffer.next(block);
        }
        buffer.set_header(block, Tag::EPILOGUE);
        (buffer, blocks)
    }

    #[test]
    fn split_off_the_remainder() {
        let mut memory = Memory([MaybeUninit::uninit(); 256]);
        let mut registry = FirstFit::EMPTY;
        let (mut buffer, blocks) = heap(&mut memory, &mut registry, &[Tag::free(64)]);

        place(&mut buffer, &mut registry, blocks[0], 24);
        assert_eq!(buffer.header(blocks[0]), Tag::used(24));
        assert_eq!(buffer.footer(blocks[0]), Tag::used(24));
        let remainder = buffer.next(blocks[0]);
        assert_eq!(buffer.header(remainder), Tag::free(40));
        assert_eq!(registry.find_fit(&buffer, 16), Some(remainder));
        assert_eq!(check(&buffer, &registry).map(|stats| stats.free_blocks), Ok(1));
    }

    #[test]
    fn small_remainders_are_not_split() {
        let mut memory = Memory([MaybeUninit::uninit(); 256]);
        let mut registry = FirstFit::EMPTY;
        let (mut buffer, blocks) = heap(&mut memory, &mut registry, &[Tag::free(32)]);

        place(&mut buffer, &mut registry, blocks[0], 24);
        assert_eq!(buffer.header(blocks[0]), Tag::used(32));
        assert_eq!(registry.find_fit(&buffer, 16), None);
        assert_eq!(check(&buffer, &registry).map(|stats| stats.free_blocks), Ok(0));
    }

    #[test]
    fn exact_remainder_of_a_minimal_block() {
        let mut memory = Memory([MaybeUninit::uninit(); 256]);
        let mut registry = FirstFit::EMPTY;
        let (mut buffer, blocks) = heap(&mut memory, &mut registry, &[Tag::free(40)]);

        place(&mut buffer, &mut registry, blocks[0], 24);
        assert_eq!(buffer.header(blocks[0]), Tag::used(24));
        assert_eq!(buffer.header(buffer.next(blocks[0])), Tag::free(16));
        assert!(check(&buffer, &registry).is_ok());
    }

    #[test]
    fn carving_merges_the_remainder_with_a_free_successor() {
        let mut memory = Memory([MaybeUninit::uninit(); 256]);
        let mut registry = FirstFit::EMPTY;
        let tags = [Tag::used(64), Tag::free(32), Tag::used(16)];
        let (mut buffer, blocks) = heap(&mut memory, &mut registry, &tags);

        carve(&mut buffer, &mut registry, blocks[0], 24);
        assert_eq!(buffer.header(blocks[0]), Tag::used(24));
        let remainder = buffer.next(blocks[0]);
        assert_eq!(buffer.header(remainder), Tag::free(72));
        assert_eq!(buffer.next(remainder), blocks[2]);
        assert_eq!(check(&buffer, &registry).map(|stats| stats.free_blocks), Ok(1));
    }
}

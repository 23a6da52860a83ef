//! Merging of a free block with its free neighbors.
use super::buffer::{Block, Buffer};
use super::registry::Registry;
use super::tag::Tag;

/// Merge the free `block` with its free physical neighbors.
///
/// The block must already carry free tags and must not be part of the
/// registry. Free neighbors are removed from the registry and absorbed, the
/// resulting block is inserted. There are four cases:
/// ```text
/// (a) | used | block | used |  ->  | used | block         | used |
/// (b) | used | block | free |  ->  | used | block + next  |
/// (c) | free | block | used |  ->  | prev + block  | used |
/// (d) | free | block | free |  ->  | prev + block + next  |
/// ```
/// In the cases (c) and (d) the merged block starts at the previous block,
/// whose handle is returned.
pub fn merge<R: Registry>(buffer: &mut Buffer<'_>, registry: &mut R, block: Block) -> Block {
    let prev_free = buffer.prev_footer(block).is_free();
    let next = buffer.next(block);
    let next_free = buffer.header(next).is_free();
    let mut size = buffer.header(block).size();

    let merged = match (prev_free, next_free) {
        (false, false) => block,
        (false, true) => {
            registry.remove(buffer, next);
            size += buffer.header(next).size();
            block
        }
        (true, false) => {
            let prev = buffer.prev(block);
            registry.remove(buffer, prev);
            size += buffer.header(prev).size();
            prev
        }
        (true, true) => {
            let prev = buffer.prev(block);
            registry.remove(buffer, prev);
            registry.remove(buffer, next);
            size += buffer.header(prev).size() + buffer.header(next).size();
            prev
        }
    };

    buffer.set_tags(merged, Tag::free(size));
    registry.insert(buffer, merged);
    registry.retarget(buffer, merged);
    merged
}

//! Bookkeeping of free blocks and the search for a fitting one.
//!
//! Two strategies are provided:
//! - [`FirstFit`] keeps an explicit, circular, doubly-linked list of the free
//!   blocks, whose links are stored inside the free payloads. The search only
//!   visits free blocks.
//! - [`NextFit`] keeps no list at all and walks the whole block sequence,
//!   resuming where the previous search stopped.
use super::buffer::{Block, Buffer};
use super::check::CheckError;

mod first_fit;
mod next_fit;

pub use first_fit::FirstFit;
pub use next_fit::NextFit;

mod sealed {
    pub trait Sealed {}
}

/// A strategy to keep track of free blocks.
///
/// The heap calls [`insert()`](Self::insert) whenever a block became free (its
/// tags are already written) and [`remove()`](Self::remove) before a free block
/// is allocated or absorbed by a neighbor. Blocks are never inserted twice.
///
/// The heap relies on [`find_fit()`](Self::find_fit) returning only free
/// blocks, so this trait is sealed and only implemented by [`FirstFit`] and
/// [`NextFit`]:
/// ```compile_fail
/// struct Custom;
/// impl tagalloc::Registry for Custom {
///     const EMPTY: Self = Custom;
///     const PROLOGUE_SIZE: usize = 8;
/// }
/// ```
/// Neither can the heap memory be accessed outside of this crate:
/// ```compile_fail
/// use tagalloc::raw_allocator::buffer::Buffer;
/// ```
pub trait Registry: sealed::Sealed + Sized {
    /// The registry of a heap, which is not initialized yet.
    const EMPTY: Self;

    /// The size of the prologue block this registry requires.
    ///
    /// The prologue payload can be used to store registry state inside the
    /// heap, e.g. the root of a free list.
    const PROLOGUE_SIZE: usize;

    /// Set up the registry for a freshly laid out heap without free blocks.
    fn init(&mut self, buffer: &mut Buffer<'_>);

    /// Track a new free block.
    fn insert(&mut self, buffer: &mut Buffer<'_>, block: Block);

    /// Stop tracking a free block.
    fn remove(&mut self, buffer: &mut Buffer<'_>, block: Block);

    /// Find a free block with a total size of at least `size` bytes.
    fn find_fit(&mut self, buffer: &Buffer<'_>, size: usize) -> Option<Block>;

    /// Notify the registry, that `block` was (re-)written and may now span
    /// addresses, which were the start of other blocks before.
    fn retarget(&mut self, buffer: &Buffer<'_>, block: Block) {
        let _ = (buffer, block);
    }

    /// Check the registry against the heap, which contains `free_blocks` free
    /// blocks.
    fn verify(&self, buffer: &Buffer<'_>, free_blocks: usize) -> Result<(), CheckError>;
}

//! This module provides the raw allocator and its support types.
//!
//! A "raw allocator" is one, that simply gets requests for a specific memory
//! size and hands out 8-byte aligned memory. It does not know about
//! [`Layout`](core::alloc::Layout)s, that is the job of the
//! [`Allocator`](crate::Allocator) on top of it.
pub mod arena;
pub(crate) mod buffer;
pub mod check;
pub(crate) mod coalesce;
pub(crate) mod place;
pub mod registry;
pub mod tag;

pub use self::buffer::Block;

use self::arena::Arena;
use self::buffer::{Buffer, DOUBLE};
use self::check::{BlockInfo, CheckError, HeapStats};
use self::registry::Registry;
use self::tag::Tag;
use crate::config::Config;

use core::cmp;
use core::ptr::NonNull;

use thiserror::Error;

/// The heap could not be set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InitError {
    /// The arena could not provide the memory for the initial heap.
    #[error("arena cannot provide the {requested} bytes of the initial heap")]
    ArenaExhausted {
        /// The number of bytes requested from the arena.
        requested: usize,
    },
    /// The arena was already used by someone else.
    #[error("arena is not empty but already holds {len} bytes")]
    ArenaNotEmpty {
        /// The number of bytes already in use.
        len: usize,
    },
}

/// An error occurred when calling `free()` with verification enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FreeError {
    /// There is a double-free detected. An already freed-up-block is freed up
    /// again.
    #[error("double free detected")]
    DoubleFreeDetected,
    /// An invalid pointer was freed up (either a pointer outside of the heap
    /// memory or a pointer into the middle of a block).
    #[error("pointer was not allocated by this heap")]
    AllocationNotFound,
}

/// Round a request up to the size of a block, including the tags.
///
/// Returns `None` if that size does not fit in a boundary tag.
fn adjusted_size(size: usize) -> Option<usize> {
    let aligned = size.checked_add(DOUBLE - 1)? & !(DOUBLE - 1);
    let size = aligned.checked_add(DOUBLE)?;
    (size <= arena::MAX_ARENA_SIZE).then_some(size)
}

/// Make sure, that `block` is the payload of a live allocation.
fn verify_live(buffer: &Buffer<'_>, block: Block) -> Result<(), FreeError> {
    let found = buffer
        .blocks()
        .take_while(|&candidate| candidate <= block)
        .find(|&candidate| candidate == block)
        .ok_or(FreeError::AllocationNotFound)?;
    if buffer.header(found).is_free() {
        return Err(FreeError::DoubleFreeDetected);
    }
    Ok(())
}

/// A heap of boundary-tagged blocks on top of an [`Arena`].
///
/// The free blocks are managed by the [`Registry`] `R`, which also decides the
/// search strategy. The heap is set up lazily on the first allocation or
/// explicitly using [`init()`](Self::init).
///
/// The heap stores no pointers to itself, all of its state lives in the arena
/// and in a few plain fields. Pointers handed out stay valid as long as the
/// arena memory does not move (see [`Arena`]).
pub struct RawAllocator<A, R> {
    arena: A,
    registry: R,
    config: Config,
    initialized: bool,
}
impl<A: Arena, R: Registry> RawAllocator<A, R> {
    /// Create a new [`RawAllocator`] on top of an empty arena.
    pub const fn new(arena: A) -> Self {
        Self::with_config(arena, Config::new())
    }

    /// Create a new [`RawAllocator`] with a custom configuration.
    pub const fn with_config(arena: A, config: Config) -> Self {
        Self {
            arena,
            registry: R::EMPTY,
            config,
            initialized: false,
        }
    }

    /// The configuration of this heap.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The registry of free blocks.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Set up the heap: lay out the sentinel blocks and request the first
    /// chunk of memory.
    ///
    /// Calling this more than once has no effect. If the first chunk cannot be
    /// obtained, the heap is still usable but an error is reported.
    pub fn init(&mut self) -> Result<(), InitError> {
        if self.initialized {
            return Ok(());
        }

        let requested = R::PROLOGUE_SIZE + DOUBLE;
        let start = self
            .arena
            .grow(requested)
            .ok_or(InitError::ArenaExhausted { requested })?;
        if start != 0 {
            return Err(InitError::ArenaNotEmpty { len: start });
        }
        let mut buffer = Buffer::new(self.arena.memory());
        buffer.init_sentinels(R::PROLOGUE_SIZE);
        self.registry.init(&mut buffer);
        self.initialized = true;
        debug!("heap initialized with a {} byte prologue", R::PROLOGUE_SIZE);

        let chunk_size = self.config.chunk_size();
        self.extend(chunk_size)
            .map(|_| ())
            .ok_or(InitError::ArenaExhausted {
                requested: chunk_size,
            })
    }

    /// Grow the arena by at least `bytes` and merge the new memory with a free
    /// block at the end of the heap.
    fn extend(&mut self, bytes: usize) -> Option<Block> {
        let size = bytes.checked_add(DOUBLE - 1)? & !(DOUBLE - 1);
        // block sizes and offsets have to fit into 32-bit tags
        let len = self.arena.memory().len();
        if len.checked_add(size).map_or(true, |end| end > arena::MAX_ARENA_SIZE) {
            warn!("growing the arena by {} bytes exceeds the tag range", size);
            return None;
        }
        let Some(start) = self.arena.grow(size) else {
            warn!("arena exhausted, cannot grow by {} bytes", size);
            return None;
        };
        debug!("arena grown by {} bytes at offset {}", size, start);

        let mut buffer = Buffer::new(self.arena.memory());
        // the new block starts where the old epilogue was
        let block = Block::at(start);
        buffer.set_tags(block, Tag::free(size));
        let epilogue = buffer.next(block);
        buffer.set_header(epilogue, Tag::EPILOGUE);
        Some(coalesce::merge(&mut buffer, &mut self.registry, block))
    }

    /// Obtain an allocated block with a total size of at least `size` bytes.
    fn allocate_block(&mut self, size: usize) -> Option<Block> {
        let mut buffer = Buffer::new(self.arena.memory());
        if let Some(block) = self.registry.find_fit(&buffer, size) {
            place::place(&mut buffer, &mut self.registry, block, size);
            return Some(block);
        }

        let block = self.extend(cmp::max(size, self.config.chunk_size()))?;
        let mut buffer = Buffer::new(self.arena.memory());
        place::place(&mut buffer, &mut self.registry, block, size);
        Some(block)
    }

    /// Allocate `size` bytes of memory, aligned to 8 bytes.
    ///
    /// A request of zero bytes returns `None` without allocating anything.
    /// Otherwise `None` is returned if the arena cannot grow far enough.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        if !self.initialized {
            if let Err(error) = self.init() {
                warn!("heap initialization failed: {}", error);
                if !self.initialized {
                    return None;
                }
            }
        }

        let Some(block) = adjusted_size(size).and_then(|size| self.allocate_block(size)) else {
            warn!("out of memory, allocation of {} bytes failed", size);
            return None;
        };
        let ptr = Buffer::new(self.arena.memory()).pointer(block);
        trace!("allocate({}) -> {:p}", size, ptr);
        Some(ptr)
    }

    /// Free a block previously obtained from this heap.
    ///
    /// The block is merged with its free neighbors immediately. Errors are
    /// only reported if [`Config::with_verified_frees`] is enabled, otherwise
    /// `Ok(())` is returned unconditionally.
    ///
    /// # Safety
    /// Unless frees are verified, `ptr` has to be a pointer returned by
    /// [`allocate()`](Self::allocate) or [`resize()`](Self::resize) of this
    /// heap, which was not freed since. In any case, the memory must not be
    /// used after it was freed.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        if !self.initialized {
            return Err(FreeError::AllocationNotFound);
        }
        let mut buffer = Buffer::new(self.arena.memory());
        let block = buffer.block_of(ptr);
        if self.config.verifies_frees() {
            if let Err(error) = verify_live(&buffer, block) {
                warn!("free({:p}) rejected: {}", ptr, error);
                return Err(error);
            }
        }

        let size = buffer.header(block).size();
        buffer.set_tags(block, Tag::free(size));
        coalesce::merge(&mut buffer, &mut self.registry, block);
        trace!("free({:p}) released {} bytes", ptr, size);
        Ok(())
    }

    /// Change the size of an allocation.
    ///
    /// - A `ptr` of `None` behaves like [`allocate()`](Self::allocate).
    /// - A `new_size` of zero behaves like [`free()`](Self::free) and returns
    ///   `None`.
    /// - Shrinking always happens in place, the tail is released.
    /// - Growing happens in place if the following block is free and large
    ///   enough, otherwise the contents are moved to a new allocation.
    ///
    /// If the memory cannot be resized, `None` is returned and the original
    /// allocation is left untouched.
    ///
    /// # Safety
    /// The same requirements as for [`free()`](Self::free) apply to `ptr`.
    /// After a successful call, only the returned pointer may be used.
    pub unsafe fn resize(&mut self, ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size);
        };
        if new_size == 0 {
            // SAFETY: forwarded from the caller
            if let Err(error) = unsafe { self.free(ptr) } {
                warn!("resize({:p}, 0) did not release the block: {}", ptr, error);
            }
            return None;
        }
        if !self.initialized {
            return None;
        }
        let size = adjusted_size(new_size)?;

        let mut buffer = Buffer::new(self.arena.memory());
        let block = buffer.block_of(ptr);
        if self.config.verifies_frees() {
            if let Err(error) = verify_live(&buffer, block) {
                warn!("resize({:p}) rejected: {}", ptr, error);
                return None;
            }
        }

        let current = buffer.header(block).size();
        if size == current {
            return Some(ptr);
        }
        if size < current {
            place::carve(&mut buffer, &mut self.registry, block, size);
            trace!("resize({:p}, {}) shrunk in place", ptr, new_size);
            return Some(ptr);
        }

        let next = buffer.next(block);
        let next_tag = buffer.header(next);
        if next_tag.is_free() && current + next_tag.size() >= size {
            // the block stays allocated, the registry never sees it
            self.registry.remove(&mut buffer, next);
            buffer.set_tags(block, Tag::used(current + next_tag.size()));
            place::carve(&mut buffer, &mut self.registry, block, size);
            trace!("resize({:p}, {}) grown in place", ptr, new_size);
            return Some(ptr);
        }

        let moved = self.allocate(new_size)?;
        let mut buffer = Buffer::new(self.arena.memory());
        let target = buffer.block_of(moved);
        let len = cmp::min(current - DOUBLE, new_size);
        buffer.copy_payload(block, target, len);
        buffer.set_tags(block, Tag::free(current));
        coalesce::merge(&mut buffer, &mut self.registry, block);
        trace!("resize({:p}, {}) moved to {:p}", ptr, new_size, moved);
        Some(moved)
    }

    /// The number of bytes usable in the allocation at `ptr`.
    ///
    /// This is at least the size requested when allocating.
    ///
    /// # Safety
    /// `ptr` has to be a live allocation of this heap.
    pub unsafe fn usable_size(&mut self, ptr: NonNull<u8>) -> usize {
        let buffer = Buffer::new(self.arena.memory());
        buffer.header(buffer.block_of(ptr)).size() - DOUBLE
    }

    /// Iterate over all blocks of the heap in address order.
    pub fn blocks(&mut self) -> impl Iterator<Item = BlockInfo> + '_ {
        let initialized = self.initialized;
        let memory = self.arena.memory();
        let buffer = Buffer::new(memory);
        let mut next = initialized.then(|| buffer.first());
        core::iter::from_fn(move || {
            let block = next?;
            let info = BlockInfo::read(&buffer, block);
            next = (info.size() != 0).then(|| buffer.next(block));
            (info.size() != 0).then_some(info)
        })
    }

    /// Summarize the current heap usage.
    pub fn stats(&mut self) -> HeapStats {
        if !self.initialized {
            return HeapStats::default();
        }
        check::stats(&Buffer::new(self.arena.memory()))
    }

    /// Validate all heap invariants.
    ///
    /// This walks the whole heap and the registry. On success, the statistics
    /// of the heap are returned.
    pub fn check(&mut self) -> Result<HeapStats, CheckError> {
        if !self.initialized {
            return Ok(HeapStats::default());
        }
        check::check(&Buffer::new(self.arena.memory()), &self.registry)
    }
}

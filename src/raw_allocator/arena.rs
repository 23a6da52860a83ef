//! The memory the heap lives in.
//!
//! An [`Arena`] is a contiguous region that can only grow at its end, much like
//! the program break moved by `sbrk()`. The heap asks for more memory whenever
//! no free block is large enough and never gives memory back.
use core::mem::MaybeUninit;

/// The largest arena a heap can manage, since block sizes are stored in 32-bit
/// boundary tags.
pub const MAX_ARENA_SIZE: usize = u32::MAX as usize & !0x7;

/// Backing memory for a heap, which grows contiguously.
///
/// # Safety
/// Implementors must uphold the following, since the heap hands out pointers
/// into the arena memory:
/// - the memory returned by [`memory()`](Self::memory) starts at an 8-byte
///   aligned address, which never changes while the heap is in use,
/// - a successful [`grow()`](Self::grow) extends the previous region exactly at
///   its end and returns the previous length,
/// - bytes once handed out keep their contents across calls,
/// - the memory never grows beyond [`MAX_ARENA_SIZE`] bytes. The heap does not
///   request more than that, but an arena must not hand out a larger region
///   from [`memory()`](Self::memory) either.
pub unsafe trait Arena {
    /// All memory handed out so far.
    fn memory(&mut self) -> &mut [MaybeUninit<u8>];

    /// Extend the arena by `delta` bytes.
    ///
    /// Returns the offset where the new region starts (i.e. the previous
    /// length of [`memory()`](Self::memory)) or `None` if the arena cannot
    /// grow any further.
    fn grow(&mut self, delta: usize) -> Option<usize>;

    /// The number of bytes the arena can hold at most.
    fn capacity(&self) -> usize;
}

/// Advance a break by `delta`, if the result stays within `capacity`.
fn bump(brk: &mut usize, delta: usize, capacity: usize) -> Option<usize> {
    let end = brk.checked_add(delta)?;
    if end > capacity {
        return None;
    }
    Some(core::mem::replace(brk, end))
}

/// An arena with a fixed capacity of `N` bytes stored inline.
///
/// This is the arena used by the global [`Allocator`](crate::Allocator): it
/// can be created in `const` context, so it can be part of a `static`. The
/// memory is left uninitialized.
///
/// Note, that the arena stores its memory inline. Pointers handed out by a heap
/// on top of it are only valid as long as the arena is not moved, which is no
/// issue for `static`s.
#[repr(C, align(8))]
pub struct StaticArena<const N: usize> {
    memory: [MaybeUninit<u8>; N],
    brk: usize,
}
impl<const N: usize> StaticArena<N> {
    /// Create a new, empty arena.
    ///
    /// # Panics
    /// This function panics if `N` exceeds [`MAX_ARENA_SIZE`].
    pub const fn new() -> Self {
        assert!(N <= MAX_ARENA_SIZE, "arena too large for 32-bit tags");
        Self {
            memory: [MaybeUninit::uninit(); N],
            brk: 0,
        }
    }
}
impl<const N: usize> Default for StaticArena<N> {
    fn default() -> Self {
        Self::new()
    }
}
// SAFETY: the memory is the first field of a `repr(C, align(8))`-struct, so it
// is 8-byte aligned. The break only moves forward and the memory is never
// touched by the arena itself.
unsafe impl<const N: usize> Arena for StaticArena<N> {
    fn memory(&mut self) -> &mut [MaybeUninit<u8>] {
        &mut self.memory[..self.brk]
    }

    fn grow(&mut self, delta: usize) -> Option<usize> {
        bump(&mut self.brk, delta, N)
    }

    fn capacity(&self) -> usize {
        N
    }
}

/// An arena over memory borrowed from the caller.
///
/// Leading bytes are skipped to reach 8-byte alignment and the usable length
/// is truncated to a multiple of 8.
pub struct SliceArena<'memory> {
    memory: &'memory mut [MaybeUninit<u8>],
    brk: usize,
}
impl<'memory> SliceArena<'memory> {
    /// Create an arena over the given memory.
    pub fn new(memory: &'memory mut [MaybeUninit<u8>]) -> Self {
        let skip = memory.as_ptr().align_offset(8).min(memory.len());
        let memory = &mut memory[skip..];
        let len = memory.len().min(MAX_ARENA_SIZE) & !0x7;
        Self {
            memory: &mut memory[..len],
            brk: 0,
        }
    }
}
// SAFETY: the memory is aligned and truncated in `new()` and borrowed for the
// whole lifetime of the arena, so it cannot move.
unsafe impl Arena for SliceArena<'_> {
    fn memory(&mut self) -> &mut [MaybeUninit<u8>] {
        &mut self.memory[..self.brk]
    }

    fn grow(&mut self, delta: usize) -> Option<usize> {
        bump(&mut self.brk, delta, self.memory.len())
    }

    fn capacity(&self) -> usize {
        self.memory.len()
    }
}

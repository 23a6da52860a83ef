//! Boundary-tag heap allocator for `#![no_std]`
//!
//! This crate provides a heap of boundary-tagged blocks on top of a growable
//! memory arena, with two strategies to find a free block:
//! - [`FirstFit`] keeps an explicit doubly-linked list of free blocks and
//!   returns the first one, that is large enough,
//! - [`NextFit`] walks all blocks in address order, resuming the search where
//!   the previous one stopped.
//!
//! The heap itself is the [`RawAllocator`], which works on plain sizes and
//! always hands out 8-byte aligned memory. For use as the global allocator,
//! the [`Allocator`]-type wraps a heap in a spin lock and implements the
//! [`core::alloc::GlobalAlloc`]-trait.
//!
//! # Usage
//! Copy and paste the following into your binary crate and potentially adjust
//! the number of bytes of the heap (here 64K):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: tagalloc::Allocator<65536> = tagalloc::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! The heap can also be used directly, e.g. with a next-fit search:
//! ```
//! use tagalloc::{NextFit, RawAllocator, StaticArena};
//!
//! let mut heap = RawAllocator::<_, NextFit>::new(StaticArena::<8192>::new());
//! let ptr = heap.allocate(100).unwrap();
//! assert_eq!(ptr.as_ptr() as usize % 8, 0);
//! unsafe { heap.free(ptr) }.unwrap();
//! assert_eq!(heap.check().unwrap().allocated_blocks, 0);
//! ```
//!
//! # Implementation
//! Every block starts with a 4-byte header and ends with a 4-byte footer, both
//! holding the same [`Tag`](raw_allocator::tag::Tag): the total size of the
//! block and whether it is allocated. The payload in between is 8-byte aligned.
//! Since the footer of the previous block directly precedes the header of a
//! block, both neighbors can be found in constant time.
//!
//! 1.  The heap is set up with a padding word, an allocated prologue block and
//!     an epilogue header of size zero. Those sentinels make sure, that every
//!     real block has a neighbor on both sides. Then the arena is grown by one
//!     chunk, which becomes the first free block.
//!     ```text
//!     pad  hdr  ...  ftr  hdr  0000 .... 0000 ftr  epi
//!     ^--- ^--------------^--------------------------^---
//!     0    PROLOGUE       FREE size = 4096          size 0, USED
//!     ```
//!     For the [`FirstFit`]-strategy, the prologue carries the root of the free
//!     list in its payload.
//! 2.  A block of 24 bytes is allocated. Adding the tags gives a block size of
//!     32 bytes. The free block is large enough, so it is split.
//!     ```text
//!     ...  hdr  0000 0000 0000 ftr  hdr  0000 .... 0000 ftr  epi
//!          ^------------------------^------------------------^---
//!          USED size = 32           FREE size = 4064
//!     ```
//!     If the rest would be smaller than 16 bytes (the smallest possible
//!     block), the whole free block is used instead.
//! 3.  Another block of 24 bytes is allocated and placed directly after the
//!     first one. Then the first one is freed.
//!     ```text
//!     ...  hdr  .... ftr  hdr  .... ftr  hdr  .... ftr  epi
//!          ^--------------^--------------^--------------^---
//!          FREE size = 32 USED size = 32 FREE size = 4032
//!     ```
//! 4.  The second block is freed. Its footer-neighbor to the left and its
//!     header-neighbor to the right are both free, so all three are merged
//!     into a single block. After every free there are never two adjacent free
//!     blocks.
//!     ```text
//!     ...  hdr  0000 .... 0000 ftr  epi
//!          ^------------------------^---
//!          FREE size = 4096
//!     ```
//! 5.  If no free block is large enough, the arena is grown by the larger of
//!     the request and the chunk size. The old epilogue becomes the header of
//!     the new block, which is merged with a free block at the end of the heap.
//!
//! Freeing does not validate the pointer by default (just like `free()` of the
//! C standard library). Validation can be enabled using
//! [`Config::with_verified_frees`].
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod macros;

pub mod config;
pub mod raw_allocator;

pub use config::Config;
pub use raw_allocator::arena::{Arena, SliceArena, StaticArena};
pub use raw_allocator::check::{BlockInfo, CheckError, HeapStats};
pub use raw_allocator::registry::{FirstFit, NextFit, Registry};
pub use raw_allocator::{Block, FreeError, InitError, RawAllocator};

use core::alloc::{GlobalAlloc, Layout};
use core::mem;
use core::ptr::{self, NonNull};

/// The alignment the heap guarantees for every allocation.
pub const ALIGNMENT: usize = raw_allocator::buffer::DOUBLE;

/// The memory allocator for the global heap.
///
/// This is an allocator with a predefined heap size of `N` bytes, which is
/// stored inline (typically in the `.bss`-section). The heap is set up on the
/// first allocation. The search strategy can be selected with `R`, it defaults
/// to [`FirstFit`].
///
/// Its usage is simple: just copy and paste the following in the binary crate
/// you're developing. The memory size of the heap is `65536` or 64K in this
/// example. Adjust that value to your needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: tagalloc::Allocator<65536> = tagalloc::Allocator::new();
/// ```
/// Also please refer to the [crate-level](crate)-documentation for details on
/// the heap layout.
pub struct Allocator<const N: usize, R: Registry = FirstFit> {
    heap: spin::Mutex<RawAllocator<StaticArena<N>, R>>,
}
impl<const N: usize, R: Registry> Allocator<N, R> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly when
    /// creating the allocator. The chunk size is adjusted to the heap size
    /// (see [`Config::sized_for`]).
    ///
    /// # Panics
    /// This function will panic, if the supplied buffer size, i.e. `N` is less
    /// than `64` or not divisible by `8`.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        Self::with_config(Config::sized_for(N))
    }

    /// Create a new [`Allocator`] with a custom configuration.
    ///
    /// # Panics
    /// This function panics under the same conditions as [`new()`](Self::new).
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn with_config(config: Config) -> Self {
        assert!(N >= 64, "too small heap memory: minimum size is 64");
        assert!(N % 8 == 0, "memory size has to be divisible by 8");
        Self {
            heap: spin::Mutex::new(RawAllocator::with_config(StaticArena::new(), config)),
        }
    }

    /// Summarize the current heap usage.
    pub fn stats(&self) -> HeapStats {
        self.heap.lock().stats()
    }

    /// Validate all heap invariants.
    pub fn check(&self) -> Result<HeapStats, CheckError> {
        self.heap.lock().check()
    }
}
impl<const N: usize, R: Registry> Default for Allocator<N, R> {
    fn default() -> Self {
        Self::new()
    }
}

/// The number of bytes to allocate for a layout aligned beyond [`ALIGNMENT`]:
/// the size plus the alignment plus the slot for the original pointer.
fn padded_size(layout: Layout) -> Option<usize> {
    layout.size().checked_add(layout.align() + mem::size_of::<*mut u8>())
}

unsafe impl<const N: usize, R: Registry> GlobalAlloc for Allocator<N, R> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.heap.lock();
        if layout.align() <= ALIGNMENT {
            return heap.allocate(layout.size()).map_or(ptr::null_mut(), NonNull::as_ptr);
        }

        // over-allocate and remember the original pointer right before the
        // aligned one
        let Some(raw) = padded_size(layout).and_then(|size| heap.allocate(size)) else {
            return ptr::null_mut();
        };
        let raw = raw.as_ptr();
        let slot = mem::size_of::<*mut u8>();
        let offset = slot + raw.add(slot).align_offset(layout.align());
        let aligned = raw.add(offset);
        aligned.cast::<*mut u8>().sub(1).write(raw);
        aligned
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let raw = if layout.align() <= ALIGNMENT {
            ptr
        } else {
            ptr.cast::<*mut u8>().sub(1).read()
        };
        if let Some(raw) = NonNull::new(raw) {
            // allocators must not unwind, a rejected free is logged by the heap
            let _ = self.heap.lock().free(raw);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= ALIGNMENT {
            return self
                .heap
                .lock()
                .resize(NonNull::new(ptr), new_size)
                .map_or(ptr::null_mut(), NonNull::as_ptr);
        }

        let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
        let new_ptr = self.alloc(new_layout);
        if !new_ptr.is_null() {
            ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
            self.dealloc(ptr, layout);
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::{Allocator, NextFit};

    use core::alloc::{GlobalAlloc, Layout};

    #[test]
    fn over_aligned_allocations() {
        let allocator = Allocator::<8192>::new();
        for align in [16, 64, 256, 1024] {
            let layout = Layout::from_size_align(24, align).unwrap();
            let ptr = unsafe { allocator.alloc(layout) };
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % align, 0);
            unsafe { ptr.write_bytes(0xAB, 24) };
            unsafe { allocator.dealloc(ptr, layout) };
            assert_eq!(allocator.check().unwrap().allocated_blocks, 0);
        }
    }

    #[test]
    fn realloc_preserves_contents() {
        let allocator = Allocator::<8192, NextFit>::new();
        let layout = Layout::from_size_align(16, 8).unwrap();
        unsafe {
            let ptr = allocator.alloc(layout);
            for i in 0..16 {
                ptr.add(i).write(i as u8);
            }
            let ptr = allocator.realloc(ptr, layout, 1000);
            assert!(!ptr.is_null());
            assert!((0..16).all(|i| ptr.add(i).read() == i as u8));
            allocator.dealloc(ptr, Layout::from_size_align(1000, 8).unwrap());
        }
        assert_eq!(allocator.check().unwrap().allocated_blocks, 0);
    }

    #[test]
    fn over_aligned_realloc() {
        let allocator = Allocator::<8192>::new();
        let layout = Layout::from_size_align(32, 32).unwrap();
        unsafe {
            let ptr = allocator.alloc(layout);
            ptr.write_bytes(0x5A, 32);
            let ptr = allocator.realloc(ptr, layout, 100);
            assert_eq!(ptr as usize % 32, 0);
            assert!((0..32).all(|i| ptr.add(i).read() == 0x5A));
            allocator.dealloc(ptr, Layout::from_size_align(100, 32).unwrap());
        }
        assert_eq!(allocator.check().unwrap().allocated_blocks, 0);
    }

    #[test]
    fn exhaustion_returns_null() {
        let allocator = Allocator::<256>::new();
        let layout = Layout::from_size_align(1024, 8).unwrap();
        assert!(unsafe { allocator.alloc(layout) }.is_null());
    }
}

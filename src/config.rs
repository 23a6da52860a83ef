//! Tunables of a heap.
use core::num::NonZeroUsize;

/// The default amount of memory requested from the arena at once (4K).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// The configuration of a heap.
///
/// All methods are `const`, so a configuration can be built for a `static`
/// allocator:
/// ```
/// const CONFIG: tagalloc::Config = tagalloc::Config::new()
///     .with_chunk_size(1024)
///     .with_verified_frees(true);
/// assert_eq!(CONFIG.chunk_size(), 1024);
/// ```
///
/// The default configuration consists of zero bytes only. This keeps a
/// `static` [`Allocator`](crate::Allocator) in the `.bss`-section instead of
/// `.data`, which would cost the whole heap size in flash on most embedded
/// targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// `None` for [`DEFAULT_CHUNK_SIZE`].
    chunk_size: Option<NonZeroUsize>,
    verify_frees: bool,
}
impl Config {
    /// The default configuration: growth in chunks of [`DEFAULT_CHUNK_SIZE`]
    /// and no validation of freed pointers.
    pub const fn new() -> Self {
        Self {
            chunk_size: None,
            verify_frees: false,
        }
    }

    /// The default configuration, but with a chunk size small enough for an
    /// arena of `capacity` bytes to be initialized.
    ///
    /// Arenas large enough for a default chunk get the default configuration.
    pub const fn sized_for(capacity: usize) -> Self {
        // room for the largest initial heap (prologue, padding and epilogue)
        let available = capacity.saturating_sub(32) & !0x7;
        let chunk_size = if available < DEFAULT_CHUNK_SIZE {
            available
        } else {
            DEFAULT_CHUNK_SIZE
        };
        let chunk_size = if chunk_size < 16 { 16 } else { chunk_size };
        Self::new().with_chunk_size(chunk_size)
    }

    /// Set the minimum number of bytes the arena is grown by.
    ///
    /// # Panics
    /// This function panics if the size is zero or not divisible by 8.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must not be zero");
        assert!(chunk_size % 8 == 0, "chunk size has to be divisible by 8");
        self.chunk_size = if chunk_size == DEFAULT_CHUNK_SIZE {
            None
        } else {
            NonZeroUsize::new(chunk_size)
        };
        self
    }

    /// Enable or disable the validation of freed pointers.
    ///
    /// With validation enabled, freeing a pointer walks the heap and rejects
    /// pointers, that were not handed out by the heap or which were already
    /// freed. This makes freeing linear in the number of blocks.
    #[must_use]
    pub const fn with_verified_frees(mut self, enabled: bool) -> Self {
        self.verify_frees = enabled;
        self
    }

    /// The minimum number of bytes the arena is grown by.
    pub const fn chunk_size(&self) -> usize {
        match self.chunk_size {
            Some(chunk_size) => chunk_size.get(),
            None => DEFAULT_CHUNK_SIZE,
        }
    }

    /// Whether freed pointers are validated.
    pub const fn verifies_frees(&self) -> bool {
        self.verify_frees
    }
}
impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

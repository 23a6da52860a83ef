//! End-to-end scenarios of the heap with both search strategies.
use tagalloc::{FirstFit, NextFit, RawAllocator, Registry, StaticArena};

type Heap<R> = RawAllocator<StaticArena<32768>, R>;

fn address(ptr: core::ptr::NonNull<u8>) -> usize {
    ptr.as_ptr() as usize
}

fn freed_memory_is_reused<R: Registry>() {
    let mut heap = Heap::<R>::new(StaticArena::new());
    assert_eq!(heap.init(), Ok(()));

    let a = heap.allocate(100).unwrap();
    assert_eq!(address(a) % 8, 0);
    let arena_size = heap.check().unwrap().arena_size;

    unsafe { heap.free(a) }.unwrap();
    let b = heap.allocate(100).unwrap();
    assert_eq!(b, a);
    assert_eq!(heap.check().unwrap().arena_size, arena_size);
}

#[test]
fn reuse_after_free() {
    freed_memory_is_reused::<FirstFit>();
    freed_memory_is_reused::<NextFit>();
}

fn neighbors_are_coalesced<R: Registry>() {
    let mut heap = Heap::<R>::new(StaticArena::new());
    let a = heap.allocate(24).unwrap();
    let b = heap.allocate(24).unwrap();
    // 24 bytes of payload plus 8 bytes of tags
    assert_eq!(address(b) - address(a), 32);
    let arena_size = heap.check().unwrap().arena_size;

    unsafe { heap.free(a) }.unwrap();
    unsafe { heap.free(b) }.unwrap();
    let stats = heap.check().unwrap();
    assert_eq!(stats.free_blocks, 1);

    // the combined span of both blocks holds 56 bytes of payload
    let c = heap.allocate(56).unwrap();
    assert_eq!(c, a);
    assert_eq!(heap.check().unwrap().arena_size, arena_size);
}

#[test]
fn adjacent_frees_coalesce() {
    neighbors_are_coalesced::<FirstFit>();
    neighbors_are_coalesced::<NextFit>();
}

fn all_four_merge_cases<R: Registry>() {
    let mut heap = Heap::<R>::new(StaticArena::new());
    let blocks = (0..6)
        .map(|_| heap.allocate(40).unwrap())
        .collect::<std::vec::Vec<_>>();
    let initial = heap.check().unwrap();

    // no free neighbor
    unsafe { heap.free(blocks[1]) }.unwrap();
    assert_eq!(heap.check().unwrap().free_blocks, initial.free_blocks + 1);
    // free predecessor
    unsafe { heap.free(blocks[2]) }.unwrap();
    assert_eq!(heap.check().unwrap().free_blocks, initial.free_blocks + 1);
    // free on both sides
    unsafe { heap.free(blocks[4]) }.unwrap();
    assert_eq!(heap.check().unwrap().free_blocks, initial.free_blocks + 2);
    unsafe { heap.free(blocks[3]) }.unwrap();
    assert_eq!(heap.check().unwrap().free_blocks, initial.free_blocks + 1);
    // free successor
    unsafe { heap.free(blocks[0]) }.unwrap();
    assert_eq!(heap.check().unwrap().free_blocks, initial.free_blocks + 1);
    // the last block merges with both its neighbors and the tail of the heap
    unsafe { heap.free(blocks[5]) }.unwrap();
    let stats = heap.check().unwrap();
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_bytes, initial.free_bytes + 6 * 48);
}

#[test]
fn merge_cases() {
    all_four_merge_cases::<FirstFit>();
    all_four_merge_cases::<NextFit>();
}

#[test]
fn first_fit_prefers_recently_freed_blocks() {
    let mut heap = Heap::<FirstFit>::new(StaticArena::new());
    let a = heap.allocate(24).unwrap();
    let _b = heap.allocate(24).unwrap();
    let c = heap.allocate(24).unwrap();
    let _d = heap.allocate(24).unwrap();

    unsafe { heap.free(a) }.unwrap();
    unsafe { heap.free(c) }.unwrap();
    // c is the head of the free list now
    assert_eq!(heap.allocate(24), Some(c));
    assert_eq!(heap.allocate(24), Some(a));
}

#[test]
fn next_fit_resumes_after_the_last_allocation() {
    let mut heap = Heap::<NextFit>::new(StaticArena::new());
    let a = heap.allocate(24).unwrap();
    let _b = heap.allocate(24).unwrap();
    let c = heap.allocate(24).unwrap();

    unsafe { heap.free(a) }.unwrap();
    // the search starts at c, so the free tail is chosen instead of a
    let d = heap.allocate(24).unwrap();
    assert_eq!(address(d) - address(c), 32);
    assert!(heap.registry().cursor().is_some());

    // a request larger than the tail wraps around and fails, then the heap
    // grows and the search starts over
    let arena_size = heap.check().unwrap().arena_size;
    let large = heap.allocate(8192).unwrap();
    assert!(heap.check().unwrap().arena_size > arena_size);
    assert!(address(large) > address(d));

    // the freed block at the start is found again after wrapping around
    unsafe { heap.free(large) }.unwrap();
    let _e = heap.allocate(24).unwrap();
    heap.check().unwrap();
}

#[test]
fn next_fit_cursor_survives_coalescing() {
    let mut heap = Heap::<NextFit>::new(StaticArena::new());
    let a = heap.allocate(24).unwrap();
    let b = heap.allocate(24).unwrap();
    let c = heap.allocate(24).unwrap();

    // the cursor points to c, which gets absorbed by b
    unsafe { heap.free(b) }.unwrap();
    unsafe { heap.free(c) }.unwrap();
    heap.check().unwrap();

    // the cursor now points to the merged block at b, which is reused
    assert_eq!(heap.allocate(24), Some(b));
    unsafe { heap.free(a) }.unwrap();
    heap.check().unwrap();
}

#[test]
fn resize_grows_in_place_over_the_cursor() {
    let mut heap = Heap::<NextFit>::new(StaticArena::new());
    let a = heap.allocate(24).unwrap();
    let b = heap.allocate(24).unwrap();
    unsafe { heap.free(b) }.unwrap();

    // the cursor points to the free block after a, which a absorbs
    let grown = unsafe { heap.resize(Some(a), 64) }.unwrap();
    assert_eq!(grown, a);
    heap.check().unwrap();
    let next = heap.allocate(8).unwrap();
    assert!(address(next) > address(a));
    heap.check().unwrap();
}

#[test]
fn slice_arena_backed_heap() {
    let mut memory = std::vec![core::mem::MaybeUninit::<u8>::uninit(); 16 * 1024];
    let arena = tagalloc::SliceArena::new(&mut memory);
    let mut heap = RawAllocator::<_, FirstFit>::new(arena);

    let mut pointers = std::vec::Vec::new();
    while let Some(ptr) = heap.allocate(1000) {
        pointers.push(ptr);
    }
    assert!(pointers.len() >= 12);
    assert!(heap.check().is_ok());
    for ptr in pointers {
        unsafe { heap.free(ptr) }.unwrap();
    }
    assert_eq!(heap.check().unwrap().allocated_blocks, 0);
}

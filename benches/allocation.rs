#![feature(test)]
extern crate test;
use test::Bencher;

use std::alloc::{GlobalAlloc as _, Layout};

use tagalloc::{Allocator, FirstFit, NextFit, Registry};

/// Run a benchmark, which repeatedly allocates and deallocates the same block.
/// The heap is filled with the given number of unrelated allocations
/// beforehand. Every other one of them is freed again, so that the search has
/// to skip over many small free blocks.
///
/// # Panics
/// This will panic, if the requested pre-allocations fill up the whole heap
/// (so the actual benchmark cannot allocate blocks anymore).
fn benchmark_with_fragmentation<R: Registry>(b: &mut Bencher, pre_allocations: usize) {
    let allocator = Allocator::<65536, R>::new();
    let small = Layout::new::<u64>();
    let pointers = (0..pre_allocations)
        .map(|_| unsafe { allocator.alloc(small) })
        .collect::<Vec<_>>();
    for ptr in pointers.iter().step_by(2) {
        unsafe { allocator.dealloc(*ptr, small) };
    }

    let layout = Layout::from_size_align(64, 8).unwrap();

    // make sure, that there is enough room for the next allocation
    let ptr = unsafe { allocator.alloc(layout) };
    assert_ne!(ptr, std::ptr::null_mut::<u8>());
    unsafe { allocator.dealloc(ptr, layout) };

    // run actual benchmark: allocate & deallocate the same block repeatedly
    b.iter(|| {
        let ptr = unsafe { allocator.alloc(layout) };
        let ptr = test::black_box(ptr);
        unsafe { allocator.dealloc(ptr, layout) };
    });
}

mod first_fit {
    use super::*;

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_with_fragmentation::<FirstFit>(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_with_fragmentation::<FirstFit>(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_with_fragmentation::<FirstFit>(b, 510);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_with_fragmentation::<FirstFit>(b, 2040);
    }
}

mod next_fit {
    use super::*;

    #[bench]
    fn no_memory_usage(b: &mut Bencher) {
        benchmark_with_fragmentation::<NextFit>(b, 0);
    }

    #[bench]
    fn low_memory_usage(b: &mut Bencher) {
        benchmark_with_fragmentation::<NextFit>(b, 8);
    }

    #[bench]
    fn medium_memory_usage(b: &mut Bencher) {
        benchmark_with_fragmentation::<NextFit>(b, 510);
    }

    #[bench]
    fn high_memory_usage(b: &mut Bencher) {
        benchmark_with_fragmentation::<NextFit>(b, 2040);
    }
}

/// Repeatedly grow a vector-like allocation, which exercises the in-place
/// growth of [`GlobalAlloc::realloc`].
#[bench]
fn growing_reallocation(b: &mut Bencher) {
    let allocator = Allocator::<65536>::new();
    b.iter(|| {
        let mut layout = Layout::from_size_align(8, 8).unwrap();
        let mut ptr = unsafe { allocator.alloc(layout) };
        while layout.size() < 4096 {
            let new_size = layout.size() * 2;
            ptr = unsafe { allocator.realloc(ptr, layout, new_size) };
            layout = Layout::from_size_align(new_size, 8).unwrap();
        }
        unsafe { allocator.dealloc(test::black_box(ptr), layout) };
    });
}

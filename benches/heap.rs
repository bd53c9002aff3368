//! Benchmarks for heap allocation.
//!
//! Compares the serialized and `NO_SERIALIZE` paths and measures `realloc` growth.

extern crate dotpal;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dotpal::heap::{Heap, HeapFlags, HeapOptions};
use std::hint::black_box;

/// Benchmark an alloc/free pair for a range of block sizes.
fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_alloc_free");
    for (name, flags) in [
        ("serialized", HeapFlags::empty()),
        ("no_serialize", HeapFlags::NO_SERIALIZE),
    ] {
        let heap = Heap::new(HeapOptions::default().with_flags(flags));
        for size in [16usize, 256, 4096] {
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, &size| {
                b.iter(|| {
                    let block = heap.alloc(HeapFlags::empty(), black_box(size)).unwrap();
                    heap.free(HeapFlags::empty(), block.as_ptr()).unwrap();
                });
            });
        }
    }
    group.finish();
}

/// Benchmark growing a block from 16 bytes to 64KB by doubling.
fn bench_realloc_growth(c: &mut Criterion) {
    let heap = Heap::new(HeapOptions::process());

    c.bench_function("heap_realloc_doubling", |b| {
        b.iter(|| {
            let mut block = heap.alloc(HeapFlags::empty(), 16).unwrap();
            let mut size = 16;
            while size < 0x10000 {
                size *= 2;
                block = heap
                    .realloc(HeapFlags::empty(), block.as_ptr(), black_box(size))
                    .unwrap()
                    .unwrap();
            }
            heap.free(HeapFlags::empty(), block.as_ptr()).unwrap();
        });
    });
}

/// Benchmark zero-filled allocations.
fn bench_zero_memory(c: &mut Criterion) {
    let heap = Heap::new(HeapOptions::process());

    c.bench_function("heap_alloc_zero_memory_4k", |b| {
        b.iter(|| {
            let block = heap.alloc(HeapFlags::ZERO_MEMORY, black_box(4096)).unwrap();
            heap.free(HeapFlags::empty(), block.as_ptr()).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_alloc_free,
    bench_realloc_growth,
    bench_zero_memory
);
criterion_main!(benches);

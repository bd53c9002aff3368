//! Benchmarks for the virtual memory engine.
//!
//! Covers the hot paths a managed heap drives during GC:
//! - Reserve/release of whole regions
//! - Commit/decommit cycles inside an existing reservation
//! - Region lookups through `query` with many live reservations

extern crate dotpal;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dotpal::memory::{AllocationType, FreeType, Protection, VirtualMemory};
use std::{hint::black_box, ptr};

/// Benchmark reserving and releasing a 64K region.
fn bench_reserve_release(c: &mut Criterion) {
    let vm = VirtualMemory::default();

    c.bench_function("virtual_reserve_release_64k", |b| {
        b.iter(|| {
            let base = vm
                .alloc(
                    ptr::null_mut(),
                    black_box(0x10000),
                    AllocationType::RESERVE,
                    Protection::NoAccess,
                )
                .unwrap();
            vm.free(base.as_ptr(), 0, FreeType::RELEASE).unwrap();
        });
    });
}

/// Benchmark commit/decommit of a range inside a 1MB reservation.
fn bench_commit_decommit(c: &mut Criterion) {
    let vm = VirtualMemory::default();
    let base = vm
        .alloc(
            ptr::null_mut(),
            0x10_0000,
            AllocationType::RESERVE,
            Protection::NoAccess,
        )
        .unwrap();

    let mut group = c.benchmark_group("virtual_commit_decommit");
    for pages in [1usize, 16, 256] {
        let size = pages * vm.page_size();
        group.bench_with_input(BenchmarkId::from_parameter(pages), &size, |b, &size| {
            b.iter(|| {
                vm.alloc(
                    base.as_ptr(),
                    black_box(size),
                    AllocationType::COMMIT,
                    Protection::ReadWrite,
                )
                .unwrap();
                vm.free(base.as_ptr(), size, FreeType::DECOMMIT).unwrap();
            });
        });
    }
    group.finish();

    vm.free(base.as_ptr(), 0, FreeType::RELEASE).unwrap();
}

/// Benchmark `query` against a table with many live regions.
fn bench_query(c: &mut Criterion) {
    let vm = VirtualMemory::default();
    let regions: Vec<_> = (0..512)
        .map(|_| {
            vm.alloc(
                ptr::null_mut(),
                0x10000,
                AllocationType::RESERVE | AllocationType::COMMIT,
                Protection::ReadWrite,
            )
            .unwrap()
        })
        .collect();
    let target = regions[regions.len() / 2].as_ptr();

    c.bench_function("virtual_query_512_regions", |b| {
        b.iter(|| black_box(vm.query(black_box(target))));
    });
}

criterion_group!(
    benches,
    bench_reserve_release,
    bench_commit_decommit,
    bench_query
);
criterion_main!(benches);

//! Criterion micro-benchmarks for malloc / calloc / realloc / free throughput.
//!
//! Each iteration allocates `BATCH` blocks of `ALLOCATION_SIZE` bytes and
//! then frees them, on a private heap so results do not depend on the
//! process allocator.

use std::hint::black_box;
use std::ptr::NonNull;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use segalloc::{Allocator, Arena};

const ALLOCATION_SIZE: usize = 1024;
const BATCH: usize = 10_000;

/// Room for a full batch plus headers and the aligned-allocation slack.
fn make_region() -> Vec<u8> {
  vec![0u8; BATCH * (ALLOCATION_SIZE + 512) + (1 << 20)]
}

fn bench_malloc_free(c: &mut Criterion) {
  let mut region = make_region();
  let mut allocator = Allocator::new(Arena::new(&mut region));
  let mut ptrs: Vec<NonNull<u8>> = Vec::with_capacity(BATCH);

  let mut group = c.benchmark_group("throughput");
  group.throughput(Throughput::Elements(BATCH as u64));

  group.bench_function("malloc_free_1k", |b| {
    b.iter(|| {
      for _ in 0..BATCH {
        ptrs.push(allocator.malloc(black_box(ALLOCATION_SIZE)).unwrap());
      }
      for ptr in ptrs.drain(..) {
        unsafe { allocator.free(ptr.as_ptr()) };
      }
    });
  });

  group.bench_function("calloc_free_1k", |b| {
    b.iter(|| {
      for _ in 0..BATCH {
        ptrs.push(allocator.calloc(1, black_box(ALLOCATION_SIZE)).unwrap());
      }
      for ptr in ptrs.drain(..) {
        unsafe { allocator.free(ptr.as_ptr()) };
      }
    });
  });

  group.bench_function("realloc_same_size_1k", |b| {
    for _ in 0..BATCH {
      ptrs.push(allocator.malloc(ALLOCATION_SIZE).unwrap());
    }
    b.iter(|| {
      for ptr in ptrs.iter_mut() {
        let resized = unsafe { allocator.realloc(ptr.as_ptr(), black_box(ALLOCATION_SIZE)) };
        *ptr = resized.unwrap().unwrap();
      }
    });
    for ptr in ptrs.drain(..) {
      unsafe { allocator.free(ptr.as_ptr()) };
    }
  });

  group.bench_function("aligned_alloc_free_1k", |b| {
    b.iter(|| {
      for _ in 0..BATCH {
        ptrs.push(allocator.aligned_alloc(64, black_box(ALLOCATION_SIZE)).unwrap());
      }
      for ptr in ptrs.drain(..) {
        unsafe { allocator.free(ptr.as_ptr()) };
      }
    });
  });

  group.finish();
}

criterion_group!(benches, bench_malloc_free);
criterion_main!(benches);

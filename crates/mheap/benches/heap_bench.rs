//! mheap Benchmarks
//!
//! Allocation, handle traffic and collection passes on each backend.
//! Run with: `cargo bench --package mheap`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use mheap::{AllocatorKind, DestructionMode, Handle, Heap, HeapConfig, Member};
use std::time::Duration;

struct Node {
    next: Member<Node>,
}

fn create_heap(allocator: AllocatorKind, destruction: DestructionMode) -> Heap {
    Heap::new(HeapConfig {
        allocator,
        destruction,
        grace_window: Duration::ZERO,
        collect_after_allocations: u64::MAX,
        collect_after_removals: u64::MAX,
        ..Default::default()
    })
    .unwrap()
}

/// Ring of `len` nodes, returned through its single root
fn build_ring(heap: &Heap, len: usize) -> Handle<Node> {
    let first = heap.allocate(|cx| Node { next: cx.handle() });
    let mut previous = first.clone();
    for _ in 1..len {
        let node = heap.allocate(|cx| Node { next: cx.handle() });
        previous.get().unwrap().next.set(&node);
        previous = node;
    }
    previous.get().unwrap().next.set(&first);
    first
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Elements(1));

    for kind in [AllocatorKind::System, AllocatorKind::Fast, AllocatorKind::Debug] {
        // Default thresholds, so garbage is reclaimed as the benchmark runs.
        let heap = Heap::new(HeapConfig {
            allocator: kind,
            destruction: DestructionMode::Inline,
            grace_window: Duration::ZERO,
            ..Default::default()
        })
        .unwrap();
        group.bench_function(BenchmarkId::new("u64", format!("{:?}", kind)), |b| {
            b.iter(|| black_box(heap.allocate(|_| 42u64)))
        });
        heap.collect(true);
    }

    group.finish();
}

fn bench_handles(c: &mut Criterion) {
    let mut group = c.benchmark_group("handles");
    let heap = create_heap(AllocatorKind::System, DestructionMode::Inline);
    let target = heap.allocate(|_| 7u64);

    group.bench_function("get", |b| b.iter(|| black_box(target.get())));
    group.bench_function("clone_drop", |b| b.iter(|| black_box(target.clone())));

    let mut array = heap.handle_array();
    group.bench_function("array_push_pop", |b| {
        b.iter(|| {
            array.push(&target);
            black_box(array.pop())
        })
    });

    group.finish();
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");
    group.sample_size(20);

    for len in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(len as u64));

        let heap = create_heap(AllocatorKind::System, DestructionMode::Inline);
        let root = build_ring(&heap, len);
        group.bench_with_input(BenchmarkId::new("mark_live_ring", len), &len, |b, _| {
            b.iter(|| heap.collect(true))
        });
        drop(root);

        for mode in [DestructionMode::Inline, DestructionMode::Deferred] {
            let heap = create_heap(AllocatorKind::Fast, mode);
            group.bench_with_input(
                BenchmarkId::new(format!("reclaim_ring_{:?}", mode), len),
                &len,
                |b, &len| {
                    b.iter_batched(
                        || build_ring(&heap, len),
                        |root| {
                            drop(root);
                            heap.collect(true)
                        },
                        BatchSize::SmallInput,
                    )
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_allocation, bench_handles, bench_collection);
criterion_main!(benches);

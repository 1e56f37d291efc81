use std::alloc::{GlobalAlloc, Layout};

use criterion::black_box;

fn alloc_dealloc<A>(allocator: &A, layout: Layout)
where
    A: GlobalAlloc,
{
    let ptr = unsafe { allocator.alloc(layout) };

    unsafe { allocator.dealloc(black_box(ptr), layout) };
}

pub mod hoard {
    use std::alloc::Layout;

    use criterion::{Criterion, Throughput};
    use hoardalloc::Allocator;

    use super::alloc_dealloc;

    pub fn allocate_deallocate(ctx: &mut Criterion) {
        let mut group = ctx.benchmark_group("allocator::hoard::alloc_dealloc");

        group.throughput(Throughput::Elements(1));

        group.bench_function("alloc-dealloc 8", |b| {
            let allocator = Allocator::new();

            let layout = Layout::new::<usize>();

            b.iter(|| {
                alloc_dealloc(&allocator, layout);
            });
        });

        group.bench_function("alloc-dealloc 512", |b| {
            let allocator = Allocator::new();

            let layout = Layout::from_size_align(512, 8).expect("a valid layout");

            b.iter(|| {
                alloc_dealloc(&allocator, layout);
            });
        });
    }
}

pub mod system_alloc {
    use std::alloc::Layout;

    use criterion::{Criterion, Throughput};

    use super::alloc_dealloc;

    pub fn allocate_deallocate(ctx: &mut Criterion) {
        let mut group = ctx.benchmark_group("allocator::system_alloc::alloc_dealloc");

        group.throughput(Throughput::Elements(1));

        group.bench_function("alloc-dealloc 8", |b| {
            let allocator = std::alloc::System;

            let layout = Layout::new::<usize>();

            b.iter(|| {
                alloc_dealloc(&allocator, layout);
            });
        });

        group.bench_function("alloc-dealloc 512", |b| {
            let allocator = std::alloc::System;

            let layout = Layout::from_size_align(512, 8).expect("a valid layout");

            b.iter(|| {
                alloc_dealloc(&allocator, layout);
            });
        });
    }
}

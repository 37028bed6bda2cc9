use std::hint::black_box;

use criterion::*;
use strata::engine::commands::Commands;
use strata::engine::world::World;

mod common;
use common::*;

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");
    group.throughput(Throughput::Elements(AGENTS_MED as u64));

    group.bench_function("spawn_direct", |b| {
        b.iter(|| {
            let mut world = World::new();
            for i in 0..AGENTS_MED {
                world.spawn(agent(i)).unwrap();
            }
            black_box(world.len());
        });
    });

    group.bench_function("spawn_batch_reserved", |b| {
        b.iter(|| black_box(setup_world(AGENTS_MED).unwrap().len()));
    });

    group.bench_function("spawn_deferred_4_workers", |b| {
        b.iter_batched(
            || {
                let mut logs: Vec<Commands> = (0..4).map(Commands::new).collect();
                for i in 0..AGENTS_MED {
                    logs[i % 4].spawn(agent(i));
                }
                logs
            },
            |mut logs| {
                let mut world = World::new();
                let report = world.apply_commands(&mut logs);
                black_box(report.applied);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);

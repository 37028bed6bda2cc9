use std::hint::black_box;

use criterion::*;
use strata::engine::query::Query;
use strata::engine::types::SystemTicks;

mod common;
use common::*;

fn iterate_benchmark(c: &mut Criterion) {
    let world = setup_world(AGENTS_MED).unwrap();
    let mut group = c.benchmark_group("iterate");
    group.throughput(Throughput::Elements(AGENTS_MED as u64));

    group.bench_function("read_position", |b| {
        b.iter(|| {
            let mut query = Query::<&Position>::new(&world).unwrap();
            let mut sum = 0.0f32;
            query.borrow().unwrap().for_each(|p| sum += p.x);
            black_box(sum);
        });
    });

    group.bench_function("write_wealth_from_productivity", |b| {
        b.iter(|| {
            let mut query = Query::<(&mut Wealth, &Productivity)>::new(&world).unwrap();
            query.borrow().unwrap().for_each(|(mut w, p)| w.value += p.rate);
        });
    });

    group.bench_function("table_slices", |b| {
        b.iter(|| {
            let table = &world.archetypes()[0];
            let mut view = table
                .view::<(&mut Wealth, &Productivity)>(SystemTicks::new(0, world.increment_change_tick()))
                .unwrap();
            let (wealth, productivity) = view.slices();
            for (w, p) in wealth.iter_mut().zip(productivity) {
                w.value += p.rate;
            }
            black_box(wealth.len());
        });
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);

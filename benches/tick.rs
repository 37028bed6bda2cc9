use criterion::*;

use strata::engine::scheduler::{Executor, RayonExecutor, Schedule, SequentialExecutor, StageRunner};
use strata::engine::systems::{FnSystem, SystemContext};
use strata::engine::types::AccessSets;
use strata::engine::world::World;

mod common;
use common::*;

fn schedule() -> Schedule {
    let production = FnSystem::new(
        "production",
        AccessSets::default().read::<Productivity>().write::<Wealth>(),
        |ctx: SystemContext<'_>| {
            let mut query = ctx.query::<(&mut Wealth, &Productivity), ()>()?;
            query.borrow()?.for_each(|(mut w, p)| w.value += p.rate);
            Ok(())
        },
    );
    let drift = FnSystem::new(
        "drift",
        AccessSets::default().write::<Position>(),
        |ctx: SystemContext<'_>| {
            let mut query = ctx.query::<&mut Position, ()>()?;
            query.borrow()?.for_each(|mut p| p.y += 0.5);
            Ok(())
        },
    );
    let births = FnSystem::new(
        "births",
        AccessSets::default(),
        |mut ctx: SystemContext<'_>| {
            for i in 0..100 {
                ctx.commands().spawn(agent(i));
            }
            Ok(())
        },
    );
    let decay = FnSystem::new(
        "decay",
        AccessSets::default().write::<Wealth>(),
        |ctx: SystemContext<'_>| {
            let mut query = ctx.query::<&mut Wealth, ()>()?;
            query.borrow()?.for_each(|mut w| w.value *= 0.99);
            Ok(())
        },
    );
    Schedule::from_systems(vec![
        Box::new(production),
        Box::new(drift),
        Box::new(births),
        Box::new(decay),
    ])
}

fn bench_runner<E: Executor>(group: &mut BenchmarkGroup<'_, measurement::WallTime>, name: &str, executor: impl Fn() -> E) {
    group.bench_function(name, |b| {
        b.iter_batched(
            || (setup_world(AGENTS_SMALL).unwrap(), schedule(), StageRunner::new(executor())),
            |(mut world, mut schedule, mut runner): (World, Schedule, StageRunner<E>)| {
                runner.run_schedule(&mut world, &mut schedule)
            },
            BatchSize::LargeInput,
        );
    });
}

fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    bench_runner(&mut group, "tick_4_systems_rayon", RayonExecutor::new);
    bench_runner(&mut group, "tick_4_systems_sequential", || SequentialExecutor);
    group.finish();
}

criterion_group!(benches, tick_benchmark);
criterion_main!(benches);

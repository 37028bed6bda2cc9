//! Stage execution.
//!
//! This module is responsible for:
//! * running the units of one stage concurrently through an [`Executor`],
//! * replaying the stage's command logs once every unit has joined,
//! * grouping systems into conflict-free stages ([`plan_stages`]).
//!
//! ## Stage protocol
//!
//! Each stage moves through `Idle → Dispatching → AllJoined → Applying → Idle`:
//! * **Idle**: every per-worker command log is truncated, capacity kept.
//! * **Dispatching**: units run against `&World`. Unit `i` of the stage
//!   writes only into log `i`.
//! * **AllJoined**: the executor has returned; no unit is running.
//! * **Applying**: logs are replayed on the calling thread in ascending
//!   worker order, entries in append order.
//!
//! Because the worker index is the unit's position in its stage, replay order
//! does not depend on which thread ran which unit.
//!
//! ## Planning
//!
//! Stages are normally built from declared access. Systems within a stage
//! must not conflict on components or resources; the runner trusts this and
//! does not check it.

use std::collections::HashMap;
use std::fmt;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::engine::commands::{CommandFailure, Commands, PendingEntity};
use crate::engine::entity::Entity;
use crate::engine::error::{ECSError, ECSResult};
use crate::engine::systems::{Locals, System, SystemContext};
use crate::engine::types::{AccessSets, SystemTicks, Tick};
use crate::engine::world::World;


/// A closure handed to an [`Executor`].
pub type Job<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Runs a batch of independent closures and returns once all have finished.

pub trait Executor: Send + Sync {
    /// Runs every job; returns after the last one completes.
    fn run_all(&self, jobs: Vec<Job<'_>>);
}

/// Runs jobs on a rayon thread pool.

#[derive(Default)]
pub struct RayonExecutor {
    pool: Option<ThreadPool>,
}

impl RayonExecutor {
    /// Uses rayon's global pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a dedicated pool.
    pub fn with_pool(pool: ThreadPool) -> Self {
        Self { pool: Some(pool) }
    }
}

impl Executor for RayonExecutor {
    fn run_all(&self, jobs: Vec<Job<'_>>) {
        match &self.pool {
            Some(pool) => pool.install(|| jobs.into_par_iter().for_each(|job| job())),
            None => jobs.into_par_iter().for_each(|job| job()),
        }
    }
}

impl fmt::Debug for RayonExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let threads = self
            .pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, ThreadPool::current_num_threads);
        f.debug_struct("RayonExecutor").field("threads", &threads).finish()
    }
}

/// Runs jobs one after another on the calling thread.

#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn run_all(&self, jobs: Vec<Job<'_>>) {
        for job in jobs {
            job();
        }
    }
}

/// A system plus the state the runner keeps for it between runs.

pub struct SystemUnit {
    system: Box<dyn System>,
    last_run: Tick,
    locals: Locals,
}

impl SystemUnit {
    /// Wraps `system`; it has never run, so every stamp counts as changed.
    pub fn new(system: Box<dyn System>) -> Self {
        Self { system, last_run: 0, locals: Locals::new() }
    }

    /// Name of the wrapped system.
    pub fn name(&self) -> &str {
        self.system.name()
    }

    /// Tick of the unit's last completed run, 0 if it never ran.
    pub fn last_run(&self) -> Tick {
        self.last_run
    }

    fn run(&mut self, world: &World, commands: &mut Commands) -> ECSResult<()> {
        let this_run = world.increment_change_tick();
        let ticks = SystemTicks::new(self.last_run, this_run);
        let ctx = SystemContext::new(world, ticks, commands, &mut self.locals);
        let result = self.system.run(ctx);
        self.last_run = this_run;
        result
    }
}

impl fmt::Debug for SystemUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemUnit")
            .field("name", &self.system.name())
            .field("last_run", &self.last_run)
            .finish()
    }
}

/// Units that may run concurrently.
///
/// ## Invariants
/// * No two units conflict on components or resources. Neither the stage nor
///   the runner checks this.

#[derive(Debug)]
pub struct Stage {
    name: String,
    units: Vec<SystemUnit>,
}

impl Stage {
    /// Creates an empty stage.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), units: Vec::new() }
    }

    /// Adds a system, builder style.
    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.push(Box::new(system));
        self
    }

    /// Adds a boxed system.
    pub fn push(&mut self, system: Box<dyn System>) {
        self.units.push(SystemUnit::new(system));
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units in worker order.
    pub fn units(&self) -> &[SystemUnit] {
        &self.units
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` if the stage has no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Stages executed in order.

#[derive(Debug, Default)]
pub struct Schedule {
    stages: Vec<Stage>,
}

impl Schedule {
    /// Creates an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schedule from declared access using [`plan_stages`].
    pub fn from_systems(systems: Vec<Box<dyn System>>) -> Self {
        Self { stages: plan_stages(systems) }
    }

    /// Appends a stage, builder style.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a stage.
    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the schedule has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Partitions systems into conflict-free stages.
///
/// ## Algorithm
/// Systems are taken in the given order and each is placed into the first
/// stage where it conflicts with no system already there. If no such stage
/// exists, a new one is appended.
///
/// ## Determinism
/// The same input order always yields the same stages.
///
/// ## Complexity
/// O(n²) in the worst case.

pub fn plan_stages(systems: Vec<Box<dyn System>>) -> Vec<Stage> {
    let mut stages: Vec<Stage> = Vec::new();
    let mut declared: Vec<Vec<AccessSets>> = Vec::new();

    'next_system: for system in systems {
        let access = system.access();
        for (stage, accesses) in stages.iter_mut().zip(declared.iter_mut()) {
            if !accesses.iter().any(|other| access.conflicts_with(other)) {
                accesses.push(access);
                stage.push(system);
                continue 'next_system;
            }
        }
        let mut stage = Stage::new(format!("stage-{}", stages.len()));
        stage.push(system);
        stages.push(stage);
        declared.push(vec![access]);
    }
    stages
}

/// Where a [`StageRunner`] is in the stage protocol.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagePhase {
    /// Between stages; logs are empty.
    Idle,
    /// Units are running.
    Dispatching,
    /// Every unit has returned.
    AllJoined,
    /// Logs are being replayed.
    Applying,
}

/// A system that returned an error.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemFailure {
    /// Worker index of the unit.
    pub worker: usize,
    /// System name.
    pub system: String,
    /// Returned error.
    pub error: ECSError,
}

/// Outcome of one stage.

#[derive(Debug, Default)]
pub struct StageReport {
    /// Stage name.
    pub stage: String,
    /// Units run.
    pub systems_run: usize,
    /// Units that returned an error.
    pub system_failures: Vec<SystemFailure>,
    /// Commands replayed successfully.
    pub commands_applied: usize,
    /// Commands that failed during replay.
    pub command_failures: Vec<CommandFailure>,
    /// Placeholders resolved during replay.
    pub spawned: HashMap<PendingEntity, Entity>,
}

impl StageReport {
    /// Returns `true` if no system and no command failed.
    pub fn is_clean(&self) -> bool {
        self.system_failures.is_empty() && self.command_failures.is_empty()
    }
}

/// Drives stages through the stage protocol.
///
/// The runner owns one command log per worker slot. The set grows to the
/// widest stage seen and is reused for every later stage.

pub struct StageRunner<E: Executor = RayonExecutor> {
    executor: E,
    logs: Vec<Commands>,
    phase: StagePhase,
}

impl Default for StageRunner<RayonExecutor> {
    fn default() -> Self {
        Self::new(RayonExecutor::new())
    }
}

impl StageRunner<SequentialExecutor> {
    /// Runner executing every unit on the calling thread.
    pub fn sequential() -> Self {
        Self::new(SequentialExecutor)
    }
}

impl<E: Executor> StageRunner<E> {
    /// Creates a runner over `executor`.
    pub fn new(executor: E) -> Self {
        Self { executor, logs: Vec::new(), phase: StagePhase::Idle }
    }

    /// Current phase. Outside `run_stage` this is always `Idle`.
    pub fn phase(&self) -> StagePhase {
        self.phase
    }

    /// Number of worker logs allocated so far.
    pub fn worker_slots(&self) -> usize {
        self.logs.len()
    }

    fn enter(&mut self, phase: StagePhase) {
        tracing::trace!(from = ?self.phase, to = ?phase, "stage phase");
        self.phase = phase;
    }

    /// Runs one stage to completion.
    ///
    /// Commands recorded by a unit are applied even if the unit returned an
    /// error.
    ///
    /// # Panics
    /// Panics if a unit or a replayed command reports an invariant
    /// violation.
    pub fn run_stage(&mut self, world: &mut World, stage: &mut Stage) -> StageReport {
        let span = tracing::info_span!("stage", name = %stage.name);
        let _entered = span.enter();

        self.enter(StagePhase::Idle);
        let workers = stage.units.len();
        while self.logs.len() < workers {
            self.logs.push(Commands::new(self.logs.len()));
        }
        for (worker, log) in self.logs.iter_mut().enumerate() {
            log.reset();
            log.set_worker(worker);
        }
        tracing::debug!(systems = workers, "stage begin");

        self.enter(StagePhase::Dispatching);
        let mut outcomes: Vec<Option<ECSResult<()>>> = vec![None; workers];
        {
            let shared: &World = world;
            let jobs: Vec<Job<'_>> = stage
                .units
                .iter_mut()
                .zip(self.logs.iter_mut())
                .zip(outcomes.iter_mut())
                .map(|((unit, log), outcome)| {
                    Box::new(move || *outcome = Some(unit.run(shared, log))) as Job<'_>
                })
                .collect();
            self.executor.run_all(jobs);
        }

        self.enter(StagePhase::AllJoined);
        let mut report = StageReport {
            stage: stage.name.clone(),
            systems_run: workers,
            ..StageReport::default()
        };
        for (worker, outcome) in outcomes.into_iter().enumerate() {
            let Some(Err(error)) = outcome else { continue };
            let system = stage.units[worker].name().to_owned();
            if error.is_fatal() {
                tracing::error!(worker, %system, %error, "system hit an invariant violation");
                panic!("ECS corruption detected: {error}");
            }
            tracing::warn!(worker, %system, %error, "system failed");
            report.system_failures.push(SystemFailure { worker, system, error });
        }

        self.enter(StagePhase::Applying);
        let applied = world.apply_commands(&mut self.logs[..workers]);
        report.commands_applied = applied.applied;
        report.command_failures = applied.failures;
        report.spawned = applied.spawned;

        self.enter(StagePhase::Idle);
        tracing::debug!(
            applied = report.commands_applied,
            failed = report.command_failures.len(),
            spawned = report.spawned.len(),
            entities = world.len(),
            "stage end"
        );
        report
    }

    /// Runs every stage of `schedule` in order.
    pub fn run_schedule(&mut self, world: &mut World, schedule: &mut Schedule) -> Vec<StageReport> {
        schedule
            .stages
            .iter_mut()
            .map(|stage| self.run_stage(world, stage))
            .collect()
    }
}

impl<E: Executor + fmt::Debug> fmt::Debug for StageRunner<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRunner")
            .field("executor", &self.executor)
            .field("workers", &self.logs.len())
            .field("phase", &self.phase)
            .finish()
    }
}

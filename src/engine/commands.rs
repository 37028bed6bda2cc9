//! # Commands
//!
//! Deferred structural mutations recorded by systems and replayed against the
//! world at the end of a stage.
//!
//! ## Purpose
//! Systems run against `&World` and may not reshape storage. Instead each
//! worker appends `Command` entries to its own [`Commands`] log. When every
//! unit of the stage has joined, the stage runner hands all logs to
//! [`World::apply_commands`], which replays them on one thread.
//!
//! ## Placeholders
//! A spawn recorded during a stage has no real [`Entity`] yet. The log hands
//! out a [`PendingEntity`] instead, unique within the stage because it carries
//! the worker index. Each log also stamps placeholders with its epoch, which
//! advances on every reset and replay, so a placeholder kept past its stage
//! never matches a later spawn. Later commands, in the same log or in a log replayed
//! after it, may target the placeholder; replay substitutes the real entity
//! once the spawn has been applied.
//!
//! ## Invariants
//! - Logs are replayed in ascending worker order, entries in append order.
//! - A failing entry is logged and skipped; it never aborts the replay.
//! - An invariant violation aborts the process with "ECS corruption detected".

use std::collections::HashMap;
use std::fmt;

use crate::engine::component::{Bundle, ComponentSet, IntoBundle};
use crate::engine::entity::Entity;
use crate::engine::error::{ECSError, ECSResult, NotFoundError};
use crate::engine::types::{ComponentID, Tick, WorkerID};
use crate::engine::world::World;


/// Stand-in for an entity whose spawn has not been applied yet.

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingEntity {
    worker: WorkerID,
    epoch: u32,
    sequence: u32,
}

impl PendingEntity {
    /// Worker whose log issued the placeholder.
    #[inline]
    pub fn worker(self) -> WorkerID {
        self.worker
    }

    /// Epoch of the log when the spawn was recorded.
    #[inline]
    pub fn epoch(self) -> u32 {
        self.epoch
    }

    /// Position among the spawns recorded by that worker.
    #[inline]
    pub fn sequence(self) -> u32 {
        self.sequence
    }
}

impl fmt::Debug for PendingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending({}:{}@{})", self.worker, self.sequence, self.epoch)
    }
}

impl fmt::Display for PendingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending({}:{}@{})", self.worker, self.sequence, self.epoch)
    }
}

/// Target of a deferred command.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// An entity that existed when the command was recorded.
    Live(Entity),
    /// An entity spawned earlier in the same stage.
    Pending(PendingEntity),
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::Live(entity)
    }
}

impl From<PendingEntity> for EntityRef {
    fn from(pending: PendingEntity) -> Self {
        EntityRef::Pending(pending)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Live(entity) => fmt::Display::fmt(entity, f),
            EntityRef::Pending(pending) => fmt::Display::fmt(pending, f),
        }
    }
}

/// A deferred structural mutation.
///
/// Commands describe *what* should change. [`World::apply_commands`] turns
/// them into the matching world operations.

#[derive(Debug)]
pub enum Command {
    /// Spawns an entity carrying exactly `bundle`.
    Spawn {
        /// Handle later commands use to refer to the new entity.
        placeholder: PendingEntity,
        /// Initial component values.
        bundle: Bundle,
    },

    /// Removes an entity and all its components.
    Kill(EntityRef),

    /// Attaches components; kinds already present keep their values.
    AddComponents {
        /// Entity receiving the components.
        target: EntityRef,
        /// Values to attach.
        bundle: Bundle,
    },

    /// Detaches component kinds; absent kinds are ignored.
    RemoveComponents {
        /// Entity losing the components.
        target: EntityRef,
        /// Kinds to detach.
        component_ids: Vec<ComponentID>,
    },
}

/// Append-only command log owned by one worker for the duration of a stage.

#[derive(Debug, Default)]
pub struct Commands {
    worker: WorkerID,
    entries: Vec<Command>,
    epoch: u32,
    next_pending: u32,
}

impl Commands {
    /// Creates an empty log for `worker`.
    pub fn new(worker: WorkerID) -> Self {
        Self { worker, entries: Vec::new(), epoch: 0, next_pending: 0 }
    }

    /// Worker index of this log.
    #[inline]
    pub fn worker(&self) -> WorkerID {
        self.worker
    }

    /// Records a spawn and returns the placeholder for the future entity.
    pub fn spawn(&mut self, bundle: impl IntoBundle) -> PendingEntity {
        let placeholder = PendingEntity {
            worker: self.worker,
            epoch: self.epoch,
            sequence: self.next_pending,
        };
        self.next_pending += 1;
        self.entries.push(Command::Spawn { placeholder, bundle: bundle.into_bundle() });
        placeholder
    }

    /// Records a kill.
    pub fn kill(&mut self, target: impl Into<EntityRef>) {
        self.entries.push(Command::Kill(target.into()));
    }

    /// Records an add-components request.
    pub fn add_components(&mut self, target: impl Into<EntityRef>, bundle: impl IntoBundle) {
        self.entries.push(Command::AddComponents {
            target: target.into(),
            bundle: bundle.into_bundle(),
        });
    }

    /// Records a remove-components request for the kinds in `S`.
    ///
    /// Fails only if a kind in `S` cannot be registered.
    pub fn remove_components<S: ComponentSet>(&mut self, target: impl Into<EntityRef>) -> ECSResult<()> {
        let component_ids = S::component_ids()?;
        self.entries.push(Command::RemoveComponents { target: target.into(), component_ids });
        Ok(())
    }

    /// Appends a prebuilt command.
    pub fn push(&mut self, command: Command) {
        self.entries.push(command);
    }

    /// Recorded commands, in append order.
    #[inline]
    pub fn entries(&self) -> &[Command] {
        &self.entries
    }

    /// Number of recorded commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current placeholder epoch.
    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Truncates the log, keeping its allocation, and starts a new epoch.
    ///
    /// Placeholders handed out before the reset no longer resolve.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.advance_epoch();
    }

    fn advance_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.next_pending = 0;
    }

    pub(crate) fn set_worker(&mut self, worker: WorkerID) {
        self.worker = worker;
    }
}

/// A command that failed during replay.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandFailure {
    /// Worker whose log held the command.
    pub worker: WorkerID,
    /// Index of the command within that log.
    pub sequence: usize,
    /// Why it failed.
    pub error: ECSError,
}

/// Outcome of one replay.

#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Commands that succeeded.
    pub applied: usize,
    /// Commands that failed, in replay order.
    pub failures: Vec<CommandFailure>,
    /// Placeholders resolved by this replay.
    pub spawned: HashMap<PendingEntity, Entity>,
}

impl ApplyReport {
    /// Real entity a placeholder resolved to.
    pub fn resolve(&self, pending: PendingEntity) -> Option<Entity> {
        self.spawned.get(&pending).copied()
    }

    /// Adds another report's counts into this one.
    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.failures.extend(other.failures);
        self.spawned.extend(other.spawned);
    }
}

impl World {
    /// Replays every log in ascending worker order and empties them.
    ///
    /// All entries are stamped with one fresh change tick. Each failing
    /// entry is reported and skipped.
    ///
    /// # Panics
    /// Panics if an entry uncovers an invariant violation: the directory and
    /// the tables have diverged and no further operation is safe.
    pub fn apply_commands(&mut self, logs: &mut [Commands]) -> ApplyReport {
        let mut report = ApplyReport::default();
        if logs.iter().all(Commands::is_empty) {
            return report;
        }

        let tick = self.increment_change_tick();
        let mut order: Vec<usize> = (0..logs.len()).collect();
        order.sort_by_key(|&slot| logs[slot].worker);

        for slot in order {
            let log = &mut logs[slot];
            let worker = log.worker;
            for (sequence, command) in log.entries.drain(..).enumerate() {
                match self.apply_command(command, tick, &mut report.spawned) {
                    Ok(()) => report.applied += 1,
                    Err(error) if error.is_fatal() => {
                        tracing::error!(worker, sequence, %error, "command replay hit an invariant violation");
                        panic!("ECS corruption detected: {error}");
                    }
                    Err(error) => {
                        tracing::warn!(worker, sequence, %error, "command failed");
                        report.failures.push(CommandFailure { worker, sequence, error });
                    }
                }
            }
            log.advance_epoch();
        }
        report
    }

    fn apply_command(
        &mut self,
        command: Command,
        tick: Tick,
        spawned: &mut HashMap<PendingEntity, Entity>,
    ) -> ECSResult<()> {
        match command {
            Command::Spawn { placeholder, bundle } => {
                let entity = self.spawn_bundle(bundle, tick)?;
                spawned.insert(placeholder, entity);
                Ok(())
            }
            Command::Kill(target) => {
                let entity = resolve(target, spawned)?;
                self.kill(entity)
            }
            Command::AddComponents { target, bundle } => {
                let entity = resolve(target, spawned)?;
                self.insert_bundle(entity, bundle, tick)
            }
            Command::RemoveComponents { target, component_ids } => {
                let entity = resolve(target, spawned)?;
                self.remove_component_ids(entity, &component_ids)
            }
        }
    }
}

fn resolve(target: EntityRef, spawned: &HashMap<PendingEntity, Entity>) -> ECSResult<Entity> {
    match target {
        EntityRef::Live(entity) => Ok(entity),
        EntityRef::Pending(pending) => spawned
            .get(&pending)
            .copied()
            .ok_or_else(|| NotFoundError::Pending(pending).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tag(u8);

    #[test]
    fn placeholders_are_numbered_per_worker() {
        let mut log = Commands::new(3);
        let a = log.spawn((Tag(1),));
        let b = log.spawn(());
        assert_eq!((a.worker(), a.sequence()), (3, 0));
        assert_eq!((b.worker(), b.sequence()), (3, 1));

        log.reset();
        assert!(log.is_empty());
        let c = log.spawn(());
        assert_eq!(c.sequence(), 0);
        assert_ne!(c, a);
        assert_eq!(c.epoch(), a.epoch() + 1);
    }

    #[test]
    fn later_commands_see_earlier_spawns() {
        let mut world = World::new();
        let mut logs = vec![Commands::new(0), Commands::new(1)];
        let pending = logs[0].spawn(());
        logs[1].add_components(pending, (Tag(7),));

        let report = world.apply_commands(&mut logs);
        assert!(report.failures.is_empty());
        let entity = report.resolve(pending).unwrap();
        assert_eq!(*world.get::<Tag>(entity).unwrap(), Tag(7));
        assert!(logs.iter().all(Commands::is_empty));
    }

    #[test]
    fn unresolved_placeholder_is_not_found() {
        let mut world = World::new();
        let mut logs = vec![Commands::new(0), Commands::new(1)];
        let pending = logs[1].spawn(());
        logs[0].kill(pending);

        let report = world.apply_commands(&mut logs);
        assert_eq!(report.applied, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].error,
            ECSError::NotFound(NotFoundError::Pending(pending))
        );
    }
}

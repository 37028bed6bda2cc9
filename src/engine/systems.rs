//! ECS system abstractions.
//!
//! A **system** is a unit of logic run by the stage runner. Systems:
//! - declare which components and resources they read and write,
//! - see the world only through a [`SystemContext`],
//! - never reshape storage directly; structural changes go through the
//!   worker's [`Commands`] log and are applied after the stage joins.
//!
//! ## Context
//!
//! [`SystemContext`] hands a system the pieces it may use:
//! - queries over the world, observing the system's change tick window,
//! - shared or exclusive resource access,
//! - per-system persistent scratch state ([`Locals`]),
//! - the worker's command log.
//!
//! ## Function-backed systems
//!
//! [`FnSystem`] wraps a closure together with a name and declared access so
//! simple systems need no dedicated type.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

use crate::engine::commands::Commands;
use crate::engine::error::{ECSError, ECSResult};
use crate::engine::query::{Query, QueryData, QueryFilter};
use crate::engine::types::{AccessSets, SystemTicks};
use crate::engine::world::World;


/// A unit of executable logic operating on the world.
///
/// Systems must be `Send` so the executor can run them on worker threads.
/// A unit has exclusive use of itself while it runs, so `run` takes
/// `&mut self`.

pub trait System: Send {
    /// Human-readable name used in logs and reports.
    fn name(&self) -> &str;

    /// Components and resources this system touches.
    fn access(&self) -> AccessSets;

    /// Executes the system.
    fn run(&mut self, ctx: SystemContext<'_>) -> ECSResult<()>;
}

/// A [`System`] backed by a closure.

pub struct FnSystem<F>
where
    F: FnMut(SystemContext<'_>) -> ECSResult<()> + Send + 'static,
{
    name: String,
    access: AccessSets,
    f: F,
}

impl<F> FnSystem<F>
where
    F: FnMut(SystemContext<'_>) -> ECSResult<()> + Send + 'static,
{
    /// Creates a function-backed system.
    ///
    /// `access` is only used for planning; it is not checked against what
    /// the closure actually touches.
    pub fn new(name: impl Into<String>, access: AccessSets, f: F) -> Self {
        Self { name: name.into(), access, f }
    }
}

impl<F> System for FnSystem<F>
where
    F: FnMut(SystemContext<'_>) -> ECSResult<()> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> AccessSets {
        self.access.clone()
    }

    fn run(&mut self, ctx: SystemContext<'_>) -> ECSResult<()> {
        (self.f)(ctx)
    }
}

impl<F> fmt::Debug for FnSystem<F>
where
    F: FnMut(SystemContext<'_>) -> ECSResult<()> + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSystem")
            .field("name", &self.name)
            .field("access", &self.access)
            .finish()
    }
}

/// Per-system persistent state, keyed by type.
///
/// Values survive across runs of the owning system and are never visible to
/// other systems.

#[derive(Default)]
pub struct Locals {
    values: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Locals {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The `T` slot, created with `T::default()` on first use.
    pub fn get_or_default<T: Default + Send + 'static>(&mut self) -> ECSResult<&mut T> {
        self.values
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
            .ok_or_else(|| {
                ECSError::invariant(format!("local slot for `{}` holds another type", type_name::<T>()))
            })
    }

    /// Number of initialised slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no slot has been used yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Locals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locals").field("len", &self.values.len()).finish()
    }
}

/// Everything a system may use during one invocation.

pub struct SystemContext<'a> {
    world: &'a World,
    ticks: SystemTicks,
    commands: &'a mut Commands,
    locals: &'a mut Locals,
}

impl<'a> SystemContext<'a> {
    /// Builds a context; the stage runner does this for every unit.
    pub fn new(
        world: &'a World,
        ticks: SystemTicks,
        commands: &'a mut Commands,
        locals: &'a mut Locals,
    ) -> Self {
        Self { world, ticks, commands, locals }
    }

    /// Shared world view.
    #[inline]
    pub fn world(&self) -> &'a World {
        self.world
    }

    /// Change tick window of this invocation.
    #[inline]
    pub fn ticks(&self) -> SystemTicks {
        self.ticks
    }

    /// A query observing this invocation's tick window.
    ///
    /// `Changed<T>` yields rows written since the system last ran; writes
    /// through `Mut<T>` are stamped with this invocation's tick.
    pub fn query<Q: QueryData, F: QueryFilter>(&self) -> ECSResult<Query<'a, Q, F>> {
        Query::with_ticks(self.world, self.ticks)
    }

    /// Shared access to resource `T`.
    pub fn resource<T: 'static>(&self) -> ECSResult<MappedRwLockReadGuard<'a, T>> {
        self.world.resource::<T>()
    }

    /// Exclusive access to resource `T`.
    pub fn resource_mut<T: 'static>(&self) -> ECSResult<MappedRwLockWriteGuard<'a, T>> {
        self.world.resource_mut::<T>()
    }

    /// Per-system persistent value of type `T`.
    pub fn local<T: Default + Send + 'static>(&mut self) -> ECSResult<&mut T> {
        self.locals.get_or_default::<T>()
    }

    /// The worker's command log.
    #[inline]
    pub fn commands(&mut self) -> &mut Commands {
        self.commands
    }
}

//! Typed queries over archetype tables.
//!
//! A query is described by two type parameters:
//!
//! * a [`QueryData`] naming what each row yields: `&T`, `&mut T` (as
//!   [`Mut<T>`]), [`Entity`], or a tuple of those;
//! * a [`QueryFilter`] narrowing which rows are yielded: [`With<T>`],
//!   [`Without<T>`], [`Changed<T>`], `()` or a tuple of those.
//!
//! ## Execution model
//!
//! 1. [`Query`] captures a world reference, the system's tick window and the
//!    merged column access of data and filter.
//! 2. Every [`Query::borrow`] recomputes the set of tables whose signature
//!    contains every required kind and no excluded kind, then locks the
//!    accessed columns of each non-empty match.
//! 3. [`QueryBorrow::iter`] walks the matched tables in archetype-id order,
//!    row by row, skipping rows rejected by row-level filters.
//!
//! Because the match set is recomputed on every borrow, tables created
//! between stages are picked up without rebuilding the query.
//!
//! ## Locking
//!
//! Column guards are acquired in ascending `(archetype, component)` order and
//! held for the whole lifetime of the borrow; raw pointers are derived from
//! the guards only after every lock is held. Each column is locked once, in
//! the strongest mode any part of the query needs. Holding two borrows that
//! write the same column on one thread deadlocks.
//!
//! ## Change detection
//!
//! Items of `&mut T` are [`Mut<T>`] wrappers. Dereferencing one mutably
//! stamps the row with the query's `this_run` tick. `Changed<T>` yields rows
//! whose stamp is strictly greater than the query's `last_run` tick.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::engine::archetype::Archetype;
use crate::engine::component::{component_name, register_component, Component};
use crate::engine::entity::Entity;
use crate::engine::error::{
    ECSError, ECSResult, InvalidAccessError, InvalidAccessReason, NotFoundError, SignatureMismatchError,
};
use crate::engine::storage::{RawColumn, TypeErasedAttribute};
use crate::engine::types::{
    AccessMode, AccessSets, ArchetypeID, ComponentID, QuerySignature, RowID, Signature, SystemTicks, Tick,
};
use crate::engine::world::World;


// ----- access ---------------------------------------------------------------

/// Merged column access of a query's data and filter parts.
///
/// ## Invariants
/// - No component is both in `read` and `write`.
/// - Every accessed component is in `signature.with`.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryAccess {
    signature: QuerySignature,
    read: Signature,
    write: Signature,
}

impl QueryAccess {
    /// Declares a shared read of `component_id` by the data part.
    pub fn add_read(&mut self, component_id: ComponentID) -> ECSResult<()> {
        if self.write.has(component_id) {
            return Err(InvalidAccessError { component_id, reason: InvalidAccessReason::ReadAndWrite }.into());
        }
        self.read.set(component_id);
        self.signature.with.set(component_id);
        Ok(())
    }

    /// Declares an exclusive write of `component_id` by the data part.
    pub fn add_write(&mut self, component_id: ComponentID) -> ECSResult<()> {
        if self.write.has(component_id) {
            return Err(InvalidAccessError { component_id, reason: InvalidAccessReason::DuplicateWrite }.into());
        }
        if self.read.has(component_id) {
            return Err(InvalidAccessError { component_id, reason: InvalidAccessReason::ReadAndWrite }.into());
        }
        self.write.set(component_id);
        self.signature.with.set(component_id);
        Ok(())
    }

    /// Requires `component_id` without accessing it.
    pub fn add_with(&mut self, component_id: ComponentID) {
        self.signature.with.set(component_id);
    }

    /// Excludes tables carrying `component_id`.
    pub fn add_without(&mut self, component_id: ComponentID) {
        self.signature.without.set(component_id);
    }

    /// Requires `component_id` and reads its change stamps.
    pub fn add_changed(&mut self, component_id: ComponentID) {
        self.signature.with.set(component_id);
        self.signature.changed.set(component_id);
    }

    /// Structural filter.
    #[inline]
    pub fn signature(&self) -> &QuerySignature {
        &self.signature
    }

    /// Component access in the form the stage planner consumes.
    pub fn access_sets(&self) -> AccessSets {
        AccessSets {
            read: self.read.union(&self.signature.changed).difference(&self.write),
            write: self.write,
            ..AccessSets::default()
        }
    }

    /// Returns `true` if `signature` satisfies the structural filter.
    #[inline]
    pub fn matches(&self, signature: &Signature) -> bool {
        self.signature.matches(signature)
    }

    /// Columns to lock, ascending, with their mode.
    fn columns(&self) -> impl Iterator<Item = (ComponentID, AccessMode)> + '_ {
        self.read
            .union(&self.write)
            .union(&self.signature.changed)
            .iterate_over_components()
            .collect::<Vec<_>>()
            .into_iter()
            .map(move |component_id| {
                let mode = if self.write.has(component_id) { AccessMode::Write } else { AccessMode::Read };
                (component_id, mode)
            })
    }
}

// ----- locked table ---------------------------------------------------------

// Held only to keep the column locked.
#[allow(dead_code)]
enum ColumnGuard<'w> {
    Shared(RwLockReadGuard<'w, Box<dyn TypeErasedAttribute>>),
    Exclusive(RwLockWriteGuard<'w, Box<dyn TypeErasedAttribute>>),
}

/// Raw column pointers of one table, taken under its locks.
///
/// Passed to [`QueryData::fetch`] and [`QueryFilter::fetch`]; only valid
/// while the guards that produced it are alive.

pub struct TableColumns<'t> {
    archetype_id: ArchetypeID,
    entities: &'t [Entity],
    columns: Vec<(ComponentID, RawColumn)>,
}

impl<'t> TableColumns<'t> {
    /// Table these columns belong to.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID {
        self.archetype_id
    }

    /// Entity handles in row order.
    #[inline]
    pub fn entities(&self) -> &'t [Entity] {
        self.entities
    }

    /// Locked column of element type `T` for `component_id`.
    pub fn column<T: 'static>(&self, component_id: ComponentID) -> ECSResult<RawColumn> {
        let index = self
            .columns
            .binary_search_by_key(&component_id, |(cid, _)| *cid)
            .map_err(|_| {
                ECSError::invariant(format!(
                    "column `{}` of archetype {} was not locked",
                    component_name(component_id),
                    self.archetype_id
                ))
            })?;
        let raw = self.columns[index].1;
        if raw.type_id != TypeId::of::<T>() {
            return Err(ECSError::invariant(format!(
                "column `{}` holds another element type",
                component_name(component_id)
            )));
        }
        Ok(raw)
    }
}

fn lock_table<'w>(
    table: &'w Archetype,
    access: &QueryAccess,
) -> ECSResult<(Vec<ColumnGuard<'w>>, TableColumns<'w>)> {
    let mut guards = Vec::new();
    let mut columns = Vec::new();
    for (component_id, mode) in access.columns() {
        let locked = table.column(component_id).ok_or_else(|| {
            ECSError::invariant(format!(
                "matched archetype {} has no column `{}`",
                table.archetype_id(),
                component_name(component_id)
            ))
        })?;
        let (guard, raw) = match mode {
            AccessMode::Read => {
                let guard = locked.read();
                let raw = guard.raw_parts();
                (ColumnGuard::Shared(guard), raw)
            }
            AccessMode::Write => {
                let mut guard = locked.write();
                let raw = guard.raw_parts_mut();
                (ColumnGuard::Exclusive(guard), raw)
            }
        };
        if raw.len != table.len() {
            return Err(ECSError::invariant(format!(
                "column `{}` of archetype {} has {} rows; table has {}",
                component_name(component_id),
                table.archetype_id(),
                raw.len,
                table.len()
            )));
        }
        guards.push(guard);
        columns.push((component_id, raw));
    }
    let columns = TableColumns { archetype_id: table.archetype_id(), entities: table.entities(), columns };
    Ok((guards, columns))
}

// ----- data -----------------------------------------------------------------

/// What a query yields per row.
///
/// # Safety
/// `init` must declare every column that `fetch` reads, and must declare a
/// write for every column `item` or `slice` hands out mutably.

pub unsafe trait QueryData {
    /// Value yielded per row.
    type Item<'a>;

    /// Bulk view of a whole table.
    type Slice<'a>;

    /// Resolved once per query: component ids and similar.
    type State: Copy;

    /// Per-table raw pointers.
    type Fetch: Copy;

    /// Registers component kinds and declares access.
    fn init(access: &mut QueryAccess) -> ECSResult<Self::State>;

    /// Resolves per-table pointers.
    fn fetch(state: &Self::State, table: &TableColumns<'_>, ticks: SystemTicks) -> ECSResult<Self::Fetch>;

    /// Item at `row`.
    ///
    /// # Safety
    /// `row` is in range, the producing locks outlive `'a`, and no other live
    /// item aliases the same row mutably.
    unsafe fn item<'a>(fetch: &Self::Fetch, row: RowID) -> Self::Item<'a>;

    /// All `len` rows at once.
    ///
    /// # Safety
    /// As for [`QueryData::item`], for every row of the table.
    unsafe fn slice<'a>(fetch: &Self::Fetch, len: usize) -> Self::Slice<'a>;
}

/// Mutable component reference that records writes.
///
/// Dereferencing mutably stamps the row with the current tick, so
/// [`Changed<T>`] filters in later systems see it.

pub struct Mut<'a, T> {
    value: &'a mut T,
    stamp: &'a mut Tick,
    this_run: Tick,
}

impl<'a, T> Mut<'a, T> {
    /// Tick at which the value was last written.
    #[inline]
    pub fn last_changed(&self) -> Tick {
        *self.stamp
    }

    /// Marks the value as changed without writing it.
    #[inline]
    pub fn set_changed(&mut self) {
        *self.stamp = self.this_run;
    }

    /// Mutable access that leaves the change stamp alone.
    #[inline]
    pub fn bypass_change_detection(&mut self) -> &mut T {
        self.value
    }

    /// Consumes the wrapper, stamping the row and returning the reference.
    #[inline]
    pub fn into_inner(self) -> &'a mut T {
        *self.stamp = self.this_run;
        self.value
    }
}

impl<T> Deref for Mut<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> DerefMut for Mut<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        *self.stamp = self.this_run;
        self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Mut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

unsafe impl<'q, T: Component> QueryData for &'q T {
    type Item<'a> = &'a T;
    type Slice<'a> = &'a [T];
    type State = ComponentID;
    type Fetch = *const T;

    fn init(access: &mut QueryAccess) -> ECSResult<ComponentID> {
        let component_id = register_component::<T>()?;
        access.add_read(component_id)?;
        Ok(component_id)
    }

    fn fetch(state: &ComponentID, table: &TableColumns<'_>, _ticks: SystemTicks) -> ECSResult<*const T> {
        Ok(table.column::<T>(*state)?.values as *const T)
    }

    #[inline]
    unsafe fn item<'a>(fetch: &*const T, row: RowID) -> &'a T {
        unsafe { &*fetch.add(row) }
    }

    #[inline]
    unsafe fn slice<'a>(fetch: &*const T, len: usize) -> &'a [T] {
        unsafe { std::slice::from_raw_parts(*fetch, len) }
    }
}

/// Raw pointers behind an `&mut T` query column.
pub struct WriteFetch<T> {
    values: *mut T,
    ticks: *mut Tick,
    this_run: Tick,
}

impl<T> Clone for WriteFetch<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WriteFetch<T> {}

unsafe impl<'q, T: Component> QueryData for &'q mut T {
    type Item<'a> = Mut<'a, T>;
    type Slice<'a> = &'a mut [T];
    type State = ComponentID;
    type Fetch = WriteFetch<T>;

    fn init(access: &mut QueryAccess) -> ECSResult<ComponentID> {
        let component_id = register_component::<T>()?;
        access.add_write(component_id)?;
        Ok(component_id)
    }

    fn fetch(state: &ComponentID, table: &TableColumns<'_>, ticks: SystemTicks) -> ECSResult<WriteFetch<T>> {
        let raw = table.column::<T>(*state)?;
        Ok(WriteFetch { values: raw.values as *mut T, ticks: raw.ticks, this_run: ticks.this_run })
    }

    #[inline]
    unsafe fn item<'a>(fetch: &WriteFetch<T>, row: RowID) -> Mut<'a, T> {
        unsafe {
            Mut {
                value: &mut *fetch.values.add(row),
                stamp: &mut *fetch.ticks.add(row),
                this_run: fetch.this_run,
            }
        }
    }

    /// Stamps every row, then hands out the whole column.
    unsafe fn slice<'a>(fetch: &WriteFetch<T>, len: usize) -> &'a mut [T] {
        unsafe {
            std::slice::from_raw_parts_mut(fetch.ticks, len).fill(fetch.this_run);
            std::slice::from_raw_parts_mut(fetch.values, len)
        }
    }
}

unsafe impl QueryData for Entity {
    type Item<'a> = Entity;
    type Slice<'a> = &'a [Entity];
    type State = ();
    type Fetch = *const Entity;

    fn init(_access: &mut QueryAccess) -> ECSResult<()> {
        Ok(())
    }

    fn fetch(_state: &(), table: &TableColumns<'_>, _ticks: SystemTicks) -> ECSResult<*const Entity> {
        Ok(table.entities().as_ptr())
    }

    #[inline]
    unsafe fn item<'a>(fetch: &*const Entity, row: RowID) -> Self::Item<'a> {
        unsafe { *fetch.add(row) }
    }

    #[inline]
    unsafe fn slice<'a>(fetch: &*const Entity, len: usize) -> Self::Slice<'a> {
        unsafe { std::slice::from_raw_parts(*fetch, len) }
    }
}

macro_rules! impl_query_data_tuples {
    ($($name:ident),*) => {
        #[allow(non_snake_case, unused_variables, unused_unsafe, clippy::unused_unit)]
        unsafe impl<$($name: QueryData),*> QueryData for ($($name,)*) {
            type Item<'a> = ($($name::Item<'a>,)*);
            type Slice<'a> = ($($name::Slice<'a>,)*);
            type State = ($($name::State,)*);
            type Fetch = ($($name::Fetch,)*);

            fn init(access: &mut QueryAccess) -> ECSResult<Self::State> {
                Ok(($($name::init(access)?,)*))
            }

            fn fetch(state: &Self::State, table: &TableColumns<'_>, ticks: SystemTicks) -> ECSResult<Self::Fetch> {
                let ($($name,)*) = state;
                Ok(($($name::fetch($name, table, ticks)?,)*))
            }

            #[inline]
            unsafe fn item<'a>(fetch: &Self::Fetch, row: RowID) -> Self::Item<'a> {
                let ($($name,)*) = fetch;
                unsafe { ($($name::item($name, row),)*) }
            }

            #[inline]
            unsafe fn slice<'a>(fetch: &Self::Fetch, len: usize) -> Self::Slice<'a> {
                let ($($name,)*) = fetch;
                unsafe { ($($name::slice($name, len),)*) }
            }
        }
    };
}

impl_query_data_tuples!();
impl_query_data_tuples!(A);
impl_query_data_tuples!(A, B);
impl_query_data_tuples!(A, B, C);
impl_query_data_tuples!(A, B, C, D);
impl_query_data_tuples!(A, B, C, D, E);
impl_query_data_tuples!(A, B, C, D, E, F);
impl_query_data_tuples!(A, B, C, D, E, F, G);
impl_query_data_tuples!(A, B, C, D, E, F, G, H);

// ----- filters --------------------------------------------------------------

/// Narrows which tables and rows a query yields.
///
/// # Safety
/// `init` must declare every column `fetch` reads.

pub unsafe trait QueryFilter {
    /// Resolved once per query.
    type State: Copy;

    /// Per-table raw state.
    type Fetch: Copy;

    /// Registers component kinds and declares access.
    fn init(access: &mut QueryAccess) -> ECSResult<Self::State>;

    /// Resolves per-table state.
    fn fetch(state: &Self::State, table: &TableColumns<'_>, ticks: SystemTicks) -> ECSResult<Self::Fetch>;

    /// Row-level test.
    ///
    /// # Safety
    /// `row` is in range and the producing locks are alive.
    unsafe fn matches(fetch: &Self::Fetch, row: RowID) -> bool;
}

/// Requires `T` without accessing it.
pub struct With<T>(PhantomData<fn() -> T>);

/// Excludes tables carrying `T`.
pub struct Without<T>(PhantomData<fn() -> T>);

/// Yields only rows whose `T` was written after the query's `last_run` tick.
pub struct Changed<T>(PhantomData<fn() -> T>);

unsafe impl<T: Component> QueryFilter for With<T> {
    type State = ();
    type Fetch = ();

    fn init(access: &mut QueryAccess) -> ECSResult<()> {
        access.add_with(register_component::<T>()?);
        Ok(())
    }

    fn fetch(_state: &(), _table: &TableColumns<'_>, _ticks: SystemTicks) -> ECSResult<()> {
        Ok(())
    }

    #[inline]
    unsafe fn matches(_fetch: &(), _row: RowID) -> bool {
        true
    }
}

unsafe impl<T: Component> QueryFilter for Without<T> {
    type State = ();
    type Fetch = ();

    fn init(access: &mut QueryAccess) -> ECSResult<()> {
        access.add_without(register_component::<T>()?);
        Ok(())
    }

    fn fetch(_state: &(), _table: &TableColumns<'_>, _ticks: SystemTicks) -> ECSResult<()> {
        Ok(())
    }

    #[inline]
    unsafe fn matches(_fetch: &(), _row: RowID) -> bool {
        true
    }
}

/// Change stamps of one column and the tick they are compared against.
#[derive(Clone, Copy)]
pub struct ChangedFetch {
    ticks: *const Tick,
    window: SystemTicks,
}

unsafe impl<T: Component> QueryFilter for Changed<T> {
    type State = ComponentID;
    type Fetch = ChangedFetch;

    fn init(access: &mut QueryAccess) -> ECSResult<ComponentID> {
        let component_id = register_component::<T>()?;
        access.add_changed(component_id);
        Ok(component_id)
    }

    fn fetch(state: &ComponentID, table: &TableColumns<'_>, ticks: SystemTicks) -> ECSResult<ChangedFetch> {
        Ok(ChangedFetch { ticks: table.column::<T>(*state)?.ticks, window: ticks })
    }

    #[inline]
    unsafe fn matches(fetch: &ChangedFetch, row: RowID) -> bool {
        fetch.window.is_changed(unsafe { *fetch.ticks.add(row) })
    }
}

macro_rules! impl_query_filter_tuples {
    ($($name:ident),*) => {
        #[allow(non_snake_case, unused_variables, unused_unsafe)]
        unsafe impl<$($name: QueryFilter),*> QueryFilter for ($($name,)*) {
            type State = ($($name::State,)*);
            type Fetch = ($($name::Fetch,)*);

            fn init(access: &mut QueryAccess) -> ECSResult<Self::State> {
                Ok(($($name::init(access)?,)*))
            }

            fn fetch(state: &Self::State, table: &TableColumns<'_>, ticks: SystemTicks) -> ECSResult<Self::Fetch> {
                let ($($name,)*) = state;
                Ok(($($name::fetch($name, table, ticks)?,)*))
            }

            #[inline]
            unsafe fn matches(fetch: &Self::Fetch, row: RowID) -> bool {
                let ($($name,)*) = fetch;
                true $(&& unsafe { $name::matches($name, row) })*
            }
        }
    };
}

impl_query_filter_tuples!();
impl_query_filter_tuples!(A);
impl_query_filter_tuples!(A, B);
impl_query_filter_tuples!(A, B, C);
impl_query_filter_tuples!(A, B, C, D);
impl_query_filter_tuples!(A, B, C, D, E);
impl_query_filter_tuples!(A, B, C, D, E, F);

/// Column access declared by `Query<Q, F>`, for system declarations.
pub fn query_access<Q: QueryData, F: QueryFilter>() -> ECSResult<AccessSets> {
    let mut access = QueryAccess::default();
    Q::init(&mut access)?;
    F::init(&mut access)?;
    Ok(access.access_sets())
}

// ----- query ----------------------------------------------------------------

/// A reusable query over a world.
///
/// Cheap to construct; holds no locks. Call [`Query::borrow`] to lock the
/// matching tables and iterate.

pub struct Query<'w, Q: QueryData, F: QueryFilter = ()> {
    world: &'w World,
    ticks: SystemTicks,
    access: QueryAccess,
    data_state: Q::State,
    filter_state: F::State,
}

impl<'w, Q: QueryData, F: QueryFilter> Query<'w, Q, F> {
    /// Creates a query outside any system.
    ///
    /// Its window starts at tick 0, so `Changed<T>` yields every row written
    /// so far; writes are stamped with a fresh tick.
    pub fn new(world: &'w World) -> ECSResult<Self> {
        let this_run = world.increment_change_tick();
        Self::with_ticks(world, SystemTicks::new(0, this_run))
    }

    /// Creates a query observing the tick window `ticks`.
    pub fn with_ticks(world: &'w World, ticks: SystemTicks) -> ECSResult<Self> {
        let mut access = QueryAccess::default();
        let data_state = Q::init(&mut access)?;
        let filter_state = F::init(&mut access)?;
        Ok(Self { world, ticks, access, data_state, filter_state })
    }

    /// Declared access.
    #[inline]
    pub fn access(&self) -> &QueryAccess {
        &self.access
    }

    /// Tick window used for change detection.
    #[inline]
    pub fn ticks(&self) -> SystemTicks {
        self.ticks
    }

    /// Ids of the tables currently matching, ascending.
    pub fn matched_archetypes(&self) -> Vec<ArchetypeID> {
        self.world
            .archetypes()
            .iter()
            .filter(|table| self.access.matches(table.signature()))
            .map(Archetype::archetype_id)
            .collect()
    }

    /// Locks the matching tables for iteration.
    pub fn borrow(&mut self) -> ECSResult<QueryBorrow<'_, Q, F>> {
        let world: &World = self.world;
        let mut tables = Vec::new();
        for table in world.archetypes() {
            if table.is_empty() || !self.access.matches(table.signature()) {
                continue;
            }
            let (guards, columns) = lock_table(table, &self.access)?;
            let data = Q::fetch(&self.data_state, &columns, self.ticks)?;
            let filter = F::fetch(&self.filter_state, &columns, self.ticks)?;
            tables.push(BorrowedTable {
                archetype_id: table.archetype_id(),
                entities: table.entities(),
                data,
                filter,
                _guards: guards,
            });
        }
        Ok(QueryBorrow { world, tables })
    }
}

struct BorrowedTable<'w, Q: QueryData, F: QueryFilter> {
    archetype_id: ArchetypeID,
    entities: &'w [Entity],
    data: Q::Fetch,
    filter: F::Fetch,
    _guards: Vec<ColumnGuard<'w>>,
}

/// Matching tables of a query, locked.
///
/// Iteration borrows `self` mutably, so at most one iterator (and its
/// mutable items) is live at a time.

pub struct QueryBorrow<'w, Q: QueryData, F: QueryFilter = ()> {
    world: &'w World,
    tables: Vec<BorrowedTable<'w, Q, F>>,
}

impl<'w, Q: QueryData, F: QueryFilter> QueryBorrow<'w, Q, F> {
    /// Ids of the locked tables, ascending.
    pub fn archetypes(&self) -> Vec<ArchetypeID> {
        self.tables.iter().map(|table| table.archetype_id).collect()
    }

    /// Iterates matching rows in table order, then row order.
    pub fn iter(&mut self) -> QueryIter<'_, 'w, Q, F> {
        QueryIter { tables: &self.tables, table: 0, row: 0 }
    }

    /// Like [`QueryBorrow::iter`], also yielding each row's entity.
    pub fn iter_with_entity(&mut self) -> QueryEntityIter<'_, 'w, Q, F> {
        QueryEntityIter { inner: QueryIter { tables: &self.tables, table: 0, row: 0 } }
    }

    /// Calls `f` for every matching row.
    pub fn for_each(&mut self, mut f: impl FnMut(Q::Item<'_>)) {
        for item in self.iter() {
            f(item);
        }
    }

    /// Number of matching rows.
    pub fn count(&mut self) -> usize {
        self.iter().count()
    }

    /// Item for `entity`, if it is live and matches the query.
    pub fn get(&mut self, entity: Entity) -> Option<Q::Item<'_>> {
        let location = self.world.location(entity)?;
        let index = self
            .tables
            .binary_search_by_key(&location.archetype, |table| table.archetype_id)
            .ok()?;
        let table = &self.tables[index];
        if location.row >= table.entities.len() {
            return None;
        }
        unsafe {
            if !F::matches(&table.filter, location.row) {
                return None;
            }
            Some(Q::item(&table.data, location.row))
        }
    }

    /// Whole-table views, ignoring row-level filters such as `Changed<T>`.
    pub fn iter_tables(&mut self) -> QueryTableIter<'_, 'w, Q, F> {
        QueryTableIter { tables: self.tables.iter() }
    }
}

/// Iterator over `(entities, column slices)` of each locked table.
pub struct QueryTableIter<'s, 'w, Q: QueryData, F: QueryFilter> {
    tables: std::slice::Iter<'s, BorrowedTable<'w, Q, F>>,
}

impl<'s, 'w, Q: QueryData, F: QueryFilter> Iterator for QueryTableIter<'s, 'w, Q, F> {
    type Item = (&'s [Entity], Q::Slice<'s>);

    fn next(&mut self) -> Option<Self::Item> {
        let table = self.tables.next()?;
        let slice = unsafe { Q::slice(&table.data, table.entities.len()) };
        Some((table.entities, slice))
    }
}

/// Iterator over the items of a [`QueryBorrow`].
pub struct QueryIter<'s, 'w, Q: QueryData, F: QueryFilter> {
    tables: &'s [BorrowedTable<'w, Q, F>],
    table: usize,
    row: usize,
}

impl<'s, 'w, Q: QueryData, F: QueryFilter> QueryIter<'s, 'w, Q, F> {
    fn next_row(&mut self) -> Option<(&'s BorrowedTable<'w, Q, F>, RowID)> {
        let tables = self.tables;
        while let Some(table) = tables.get(self.table) {
            if self.row < table.entities.len() {
                let row = self.row;
                self.row += 1;
                if unsafe { F::matches(&table.filter, row) } {
                    return Some((table, row));
                }
            } else {
                self.table += 1;
                self.row = 0;
            }
        }
        None
    }
}

impl<'s, 'w, Q: QueryData, F: QueryFilter> Iterator for QueryIter<'s, 'w, Q, F> {
    type Item = Q::Item<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        let (table, row) = self.next_row()?;
        Some(unsafe { Q::item(&table.data, row) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .tables
            .iter()
            .skip(self.table)
            .map(|table| table.entities.len())
            .sum::<usize>()
            .saturating_sub(self.row);
        (0, Some(remaining))
    }
}

/// Iterator over `(entity, item)` pairs of a [`QueryBorrow`].
pub struct QueryEntityIter<'s, 'w, Q: QueryData, F: QueryFilter> {
    inner: QueryIter<'s, 'w, Q, F>,
}

impl<'s, 'w, Q: QueryData, F: QueryFilter> Iterator for QueryEntityIter<'s, 'w, Q, F> {
    type Item = (Entity, Q::Item<'s>);

    fn next(&mut self) -> Option<Self::Item> {
        let (table, row) = self.inner.next_row()?;
        Some((table.entities[row], unsafe { Q::item(&table.data, row) }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

// ----- single table ---------------------------------------------------------

/// Locked typed view of one table.
///
/// Produced by [`Archetype::view`]. Unlike a query it has no row filter and
/// requires every requested kind to be in the table.

pub struct TableView<'t, Q: QueryData> {
    entities: &'t [Entity],
    fetch: Q::Fetch,
    _guards: Vec<ColumnGuard<'t>>,
}

impl<'t, Q: QueryData> TableView<'t, Q> {
    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the table is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity handles in row order.
    #[inline]
    pub fn entities(&self) -> &'t [Entity] {
        self.entities
    }

    /// Item at `row`.
    pub fn get(&mut self, row: RowID) -> Option<Q::Item<'_>> {
        if row >= self.entities.len() {
            return None;
        }
        Some(unsafe { Q::item(&self.fetch, row) })
    }

    /// Iterates every row; restartable by calling again.
    pub fn iter(&mut self) -> TableViewIter<'_, Q> {
        TableViewIter { fetch: self.fetch, row: 0, len: self.entities.len(), _borrow: PhantomData }
    }

    /// Column slices for the requested kinds, in requested order.
    pub fn slices(&mut self) -> Q::Slice<'_> {
        unsafe { Q::slice(&self.fetch, self.entities.len()) }
    }
}

/// Iterator over the rows of a [`TableView`].
pub struct TableViewIter<'s, Q: QueryData> {
    fetch: Q::Fetch,
    row: RowID,
    len: usize,
    _borrow: PhantomData<&'s mut ()>,
}

impl<'s, Q: QueryData> Iterator for TableViewIter<'s, Q> {
    type Item = Q::Item<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.row >= self.len {
            return None;
        }
        let row = self.row;
        self.row += 1;
        Some(unsafe { Q::item(&self.fetch, row) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.row;
        (remaining, Some(remaining))
    }
}

impl<Q: QueryData> ExactSizeIterator for TableViewIter<'_, Q> {}

impl Archetype {
    /// Locks the columns named by `Q` and returns a typed view of the table.
    ///
    /// Fails with `SignatureMismatch` if a requested kind is not part of the
    /// signature, and with `InvalidQueryAccess` if `Q` reads and writes the
    /// same kind. Writes through the view are stamped with `ticks.this_run`.

    pub fn view<Q: QueryData>(&self, ticks: SystemTicks) -> ECSResult<TableView<'_, Q>> {
        let mut access = QueryAccess::default();
        let state = Q::init(&mut access)?;
        let required = access.signature().with;
        if !self.signature().contains_all(&required) {
            return Err(SignatureMismatchError {
                archetype: self.archetype_id(),
                missing: required
                    .difference(self.signature())
                    .iterate_over_components()
                    .map(component_name)
                    .collect(),
                unexpected: Vec::new(),
            }
            .into());
        }
        let (guards, columns) = lock_table(self, &access)?;
        let fetch = Q::fetch(&state, &columns, ticks)?;
        Ok(TableView { entities: self.entities(), fetch, _guards: guards })
    }
}

impl World {
    /// Creates an ad-hoc query; see [`Query::new`].
    pub fn query<Q: QueryData, F: QueryFilter>(&self) -> ECSResult<Query<'_, Q, F>> {
        Query::new(self)
    }

    /// Typed view of one table, stamping writes with a fresh tick.
    pub fn view<Q: QueryData>(&self, archetype_id: ArchetypeID) -> ECSResult<TableView<'_, Q>> {
        let table = self
            .archetype(archetype_id)
            .ok_or(NotFoundError::Archetype(archetype_id))?;
        let this_run = self.increment_change_tick();
        table.view::<Q>(SystemTicks::new(0, this_run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    struct A(u32);
    #[allow(dead_code)]
    struct B(u32);

    #[test]
    fn read_and_write_of_one_kind_is_rejected() {
        let mut access = QueryAccess::default();
        let id = register_component::<A>().unwrap();
        access.add_write(id).unwrap();

        let err = access.add_read(id).unwrap_err();
        assert_eq!(
            err,
            ECSError::InvalidQueryAccess(InvalidAccessError {
                component_id: id,
                reason: InvalidAccessReason::ReadAndWrite
            })
        );
        assert!(matches!(
            access.add_write(id),
            Err(ECSError::InvalidQueryAccess(InvalidAccessError { reason: InvalidAccessReason::DuplicateWrite, .. }))
        ));
    }

    #[test]
    fn changed_on_written_kind_locks_for_write() {
        let mut access = QueryAccess::default();
        let id = register_component::<B>().unwrap();
        access.add_write(id).unwrap();
        access.add_changed(id);

        let columns: Vec<_> = access.columns().collect();
        assert_eq!(columns, vec![(id, AccessMode::Write)]);
        assert!(access.access_sets().read.is_empty());
    }

    #[test]
    fn query_access_reports_reads_and_writes() {
        let sets = query_access::<(&A, &mut B), ()>().unwrap();
        assert!(sets.read.has(register_component::<A>().unwrap()));
        assert!(sets.write.has(register_component::<B>().unwrap()));
    }
}

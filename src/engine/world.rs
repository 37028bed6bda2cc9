//! # World registry
//!
//! [`World`] owns every archetype table, the entity directory and the
//! resource map, and exposes the structural operations that move rows
//! between tables: spawn, kill, add components and remove components.
//!
//! ## Phases
//!
//! * Structural operations take `&mut World`. They run single-threaded,
//!   either directly from user code or while a stage runner replays command
//!   logs.
//! * Systems receive `&World`. Through it they can read and write component
//!   values (column locks make this data-race free) and resources, but they
//!   cannot reshape storage; they record structural requests in their command
//!   log instead.
//!
//! ## Directory consistency
//!
//! After every structural operation, for each live entity `e` the directory
//! names a `(archetype, row)` whose stored entity is `e`. Operations update
//! the directory in the same call that moves rows, including the fix-up for
//! the entity relocated by a swap-erase. [`World::check_invariants`]
//! verifies the whole mapping.
//!
//! ## Change ticks
//!
//! The world owns a monotonically increasing change tick. Every structural
//! operation and every system invocation takes a fresh tick; values written
//! by it are stamped with that tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::archetype::Archetype;
use crate::engine::component::{
    component_id_of, component_name, Bundle, ComponentSet, IntoBundle,
};
use crate::engine::config::WorldConfig;
use crate::engine::entity::{Entities, Entity, EntityLocation};
use crate::engine::error::{ECSError, ECSResult, SignatureMismatchError};
use crate::engine::resources::Resources;
use crate::engine::storage::Attribute;
use crate::engine::types::{ArchetypeID, ComponentID, Signature, Tick};


/// Storage for all entities, components and resources.
///
/// ## Invariants
/// * `signature_map[s] == id` iff `archetypes[id].signature() == s`.
/// * Archetype ids are dense and equal to their index; tables are never
///   removed.
/// * The directory is consistent with table contents (see module docs).

pub struct World {
    archetypes: Vec<Archetype>,
    signature_map: HashMap<Signature, ArchetypeID>,
    entities: Entities,
    resources: Resources,
    config: WorldConfig,
    change_tick: AtomicU64,
}

impl Default for World {
    fn default() -> Self {
        Self::from_parts(WorldConfig::default(), Entities::new())
    }
}

impl World {
    /// Creates an empty world with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty world with `config`, validating it first.
    pub fn with_config(config: WorldConfig) -> ECSResult<Self> {
        config.validate()?;
        let entities = Entities::with_capacity(config.initial_entity_capacity)?;
        Ok(Self::from_parts(config, entities))
    }

    fn from_parts(config: WorldConfig, entities: Entities) -> Self {
        Self {
            archetypes: Vec::new(),
            signature_map: HashMap::new(),
            entities,
            resources: Resources::new(),
            config,
            change_tick: AtomicU64::new(0),
        }
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Most recently issued change tick.
    #[inline]
    pub fn change_tick(&self) -> Tick {
        self.change_tick.load(Ordering::Acquire)
    }

    /// Issues a new change tick, strictly greater than every earlier one.
    #[inline]
    pub fn increment_change_tick(&self) -> Tick {
        self.change_tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    // ----- tables -----------------------------------------------------------

    /// All tables, in creation order.
    #[inline]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Table with the given id.
    #[inline]
    pub fn archetype(&self, archetype_id: ArchetypeID) -> Option<&Archetype> {
        self.archetypes.get(archetype_id as usize)
    }

    /// Id of the table for `signature`, if it has been created.
    #[inline]
    pub fn archetype_for(&self, signature: &Signature) -> Option<ArchetypeID> {
        self.signature_map.get(signature).copied()
    }

    /// Returns the table for `signature`, creating it on first use.
    pub fn get_or_create_archetype(&mut self, signature: &Signature) -> ECSResult<ArchetypeID> {
        if let Some(&id) = self.signature_map.get(signature) {
            return Ok(id);
        }
        let id = ArchetypeID::try_from(self.archetypes.len())
            .map_err(|_| ECSError::invariant("archetype id space exhausted"))?;
        self.archetypes.push(Archetype::new(id, *signature)?);
        self.signature_map.insert(*signature, id);
        Ok(id)
    }

    fn archetype_pair_mut(
        archetypes: &mut [Archetype],
        a: ArchetypeID,
        b: ArchetypeID,
    ) -> ECSResult<(&mut Archetype, &mut Archetype)> {
        if a == b || a as usize >= archetypes.len() || b as usize >= archetypes.len() {
            return Err(ECSError::invariant(format!("invalid archetype pair ({a}, {b})")));
        }

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = archetypes.split_at_mut(high as usize);

        let left = &mut head[low as usize];
        let right = &mut tail[0];

        Ok(if a < b { (left, right) } else { (right, left) })
    }

    // ----- entities ---------------------------------------------------------

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entity is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns `true` if `entity` is live.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(entity)
    }

    /// Current table and row of `entity`.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.location(entity)
    }

    /// Live entities with their locations.
    pub fn iter_entities(&self) -> impl Iterator<Item = (Entity, EntityLocation)> + '_ {
        self.entities.iter()
    }

    /// Component kinds currently attached to `entity`.
    pub fn signature_of(&self, entity: Entity) -> ECSResult<Signature> {
        let location = self.entities.try_location(entity)?;
        Ok(*self.table(location.archetype)?.signature())
    }

    fn table(&self, archetype_id: ArchetypeID) -> ECSResult<&Archetype> {
        self.archetypes.get(archetype_id as usize).ok_or_else(|| {
            ECSError::invariant(format!("directory names missing archetype {archetype_id}"))
        })
    }

    fn table_mut(&mut self, archetype_id: ArchetypeID) -> ECSResult<&mut Archetype> {
        self.archetypes.get_mut(archetype_id as usize).ok_or_else(|| {
            ECSError::invariant(format!("directory names missing archetype {archetype_id}"))
        })
    }

    /// Looks up `entity` and cross-checks the directory against the table.
    fn locate(&self, entity: Entity) -> ECSResult<EntityLocation> {
        let location = self.entities.try_location(entity)?;
        let stored = self.table(location.archetype)?.entity_at(location.row);
        if stored != Some(entity) {
            return Err(ECSError::invariant(format!(
                "directory maps {entity} to ({}, {}) but that row holds {stored:?}",
                location.archetype, location.row
            )));
        }
        Ok(location)
    }

    /// Spawns an entity carrying exactly the components in `bundle`.
    ///
    /// The empty bundle `()` places the entity in the component-less table.
    pub fn spawn(&mut self, bundle: impl IntoBundle) -> ECSResult<Entity> {
        let tick = self.increment_change_tick();
        self.spawn_bundle(bundle.into_bundle(), tick)
    }

    pub(crate) fn spawn_bundle(&mut self, bundle: Bundle, tick: Tick) -> ECSResult<Entity> {
        bundle.check()?;
        let archetype_id = self.get_or_create_archetype(&bundle.signature())?;
        let entity = self.entities.alloc()?;

        let table = &mut self.archetypes[archetype_id as usize];
        match table.emplace(entity, bundle, tick, &self.config) {
            Ok(row) => {
                self.entities.set_location(entity, EntityLocation { archetype: archetype_id, row })?;
                tracing::trace!(%entity, archetype = archetype_id, row, "spawned");
                Ok(entity)
            }
            Err(e) => {
                self.entities.free(entity);
                Err(e)
            }
        }
    }

    /// Spawns one entity per bundle, reserving table space up front.
    pub fn spawn_batch<B, I>(&mut self, bundles: I) -> ECSResult<Vec<Entity>>
    where
        B: IntoBundle,
        I: IntoIterator<Item = B>,
    {
        let bundles = bundles.into_iter();
        let (lower, _) = bundles.size_hint();
        self.entities.reserve(lower)?;

        let tick = self.increment_change_tick();
        let mut spawned = Vec::with_capacity(lower);
        for bundle in bundles {
            spawned.push(self.spawn_bundle(bundle.into_bundle(), tick)?);
        }
        Ok(spawned)
    }

    /// Removes `entity` and all its components.
    ///
    /// The swap-erase in its table may relocate another entity; that entity's
    /// directory entry is updated before returning.
    pub fn kill(&mut self, entity: Entity) -> ECSResult<()> {
        let location = self.locate(entity)?;
        let erased = self.table_mut(location.archetype)?.erase(location.row)?;
        if let Some(moved) = erased.moved {
            self.entities.set_location(moved, location)?;
        }
        self.entities.free(entity);
        tracing::trace!(%entity, archetype = location.archetype, "killed");
        Ok(())
    }

    /// Attaches the components in `bundle` to `entity`.
    ///
    /// Kinds the entity already carries are skipped and keep their current
    /// values; if every kind is already present the call changes nothing.
    pub fn add_components(&mut self, entity: Entity, bundle: impl IntoBundle) -> ECSResult<()> {
        let tick = self.increment_change_tick();
        self.insert_bundle(entity, bundle.into_bundle(), tick)
    }

    pub(crate) fn insert_bundle(&mut self, entity: Entity, mut bundle: Bundle, tick: Tick) -> ECSResult<()> {
        bundle.check()?;
        let location = self.locate(entity)?;
        let source = *self.table(location.archetype)?.signature();

        bundle.retain_absent(&source);
        if bundle.is_empty() {
            return Ok(());
        }
        let target = source.union(&bundle.signature());
        self.relocate(entity, location, &target, bundle, tick)
    }

    /// Detaches the kinds in `S` from `entity`.
    ///
    /// Kinds the entity does not carry are ignored. Removing every component
    /// leaves the entity alive in the component-less table.
    pub fn remove_components<S: ComponentSet>(&mut self, entity: Entity) -> ECSResult<()> {
        let component_ids = S::component_ids()?;
        self.remove_component_ids(entity, &component_ids)
    }

    /// Detaches the given component kinds from `entity`.
    pub fn remove_component_ids(&mut self, entity: Entity, component_ids: &[ComponentID]) -> ECSResult<()> {
        let location = self.locate(entity)?;
        let source = *self.table(location.archetype)?.signature();
        let target = source.difference(&Signature::from_ids(component_ids));
        if target == source {
            return Ok(());
        }
        let tick = self.increment_change_tick();
        self.relocate(entity, location, &target, Bundle::new(), tick)
    }

    fn relocate(
        &mut self,
        entity: Entity,
        location: EntityLocation,
        target: &Signature,
        added: Bundle,
        tick: Tick,
    ) -> ECSResult<()> {
        let destination_id = self.get_or_create_archetype(target)?;
        let (source, destination) =
            Self::archetype_pair_mut(&mut self.archetypes, location.archetype, destination_id)?;

        let moved = source.move_row_to(location.row, destination, added, tick, &self.config)?;

        if let Some(relocated) = moved.moved {
            self.entities.set_location(relocated, location)?;
        }
        self.entities.set_location(
            entity,
            EntityLocation { archetype: destination_id, row: moved.destination_row },
        )?;
        tracing::trace!(%entity, from = location.archetype, to = destination_id, "changed archetype");
        Ok(())
    }

    // ----- capacity ---------------------------------------------------------

    /// Reserves directory slots for `n` more entities.
    pub fn reserve(&mut self, n: usize) -> ECSResult<()> {
        self.entities.reserve(n)?;
        Ok(())
    }

    /// Reserves room for `n` more entities carrying exactly the kinds in `S`.
    pub fn reserve_for<S: ComponentSet>(&mut self, n: usize) -> ECSResult<()> {
        let signature = S::signature()?;
        self.reserve_signature(&signature, n)
    }

    /// Reserves room for `n` more entities with `signature`, creating its
    /// table if needed.
    pub fn reserve_signature(&mut self, signature: &Signature, n: usize) -> ECSResult<()> {
        self.entities.reserve(n)?;
        let archetype_id = self.get_or_create_archetype(signature)?;
        let table = &mut self.archetypes[archetype_id as usize];
        let required = table.len().saturating_add(n);
        table.reserve(required)?;
        Ok(())
    }

    // ----- component access -------------------------------------------------

    fn component_column<T: 'static>(&self, entity: Entity) -> ECSResult<(EntityLocation, ComponentID)> {
        let location = self.locate(entity)?;
        let component_id = component_id_of::<T>()?;
        if !self.table(location.archetype)?.has(component_id) {
            return Err(SignatureMismatchError {
                archetype: location.archetype,
                missing: vec![component_name(component_id)],
                unexpected: Vec::new(),
            }
            .into());
        }
        Ok((location, component_id))
    }

    /// Shared access to `entity`'s `T`.
    ///
    /// Fails with `NotFound` for dead entities and `SignatureMismatch` if the
    /// entity has no `T`.
    pub fn get<T: 'static>(&self, entity: Entity) -> ECSResult<MappedRwLockReadGuard<'_, T>> {
        let (location, component_id) = self.component_column::<T>(entity)?;
        let column = self
            .table(location.archetype)?
            .column(component_id)
            .ok_or_else(|| ECSError::invariant("signature names a missing column"))?;
        RwLockReadGuard::try_map(column.read(), |column| {
            column.as_any().downcast_ref::<Attribute<T>>()?.get(location.row)
        })
        .map_err(|_| ECSError::invariant(format!("row {} missing from column", location.row)))
    }

    /// Exclusive access to `entity`'s `T`, stamping it as changed.
    pub fn get_mut<T: 'static>(&self, entity: Entity) -> ECSResult<MappedRwLockWriteGuard<'_, T>> {
        let (location, component_id) = self.component_column::<T>(entity)?;
        let column = self
            .table(location.archetype)?
            .column(component_id)
            .ok_or_else(|| ECSError::invariant("signature names a missing column"))?;
        let tick = self.increment_change_tick();
        RwLockWriteGuard::try_map(column.write(), |column| {
            column.as_any_mut().downcast_mut::<Attribute<T>>()?.get_mut(location.row, tick)
        })
        .map_err(|_| ECSError::invariant(format!("row {} missing from column", location.row)))
    }

    /// Returns `true` if `entity` is live and carries a `T`.
    pub fn has<T: 'static>(&self, entity: Entity) -> bool {
        self.component_column::<T>(entity).is_ok()
    }

    // ----- resources --------------------------------------------------------

    /// Inserts a resource, returning the previous value of that type.
    pub fn insert_resource<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.resources.insert(value)
    }

    /// Removes and returns a resource.
    pub fn remove_resource<T: 'static>(&mut self) -> Option<T> {
        self.resources.remove::<T>()
    }

    /// Returns `true` if a resource of type `T` exists.
    pub fn contains_resource<T: 'static>(&self) -> bool {
        self.resources.contains::<T>()
    }

    /// Shared access to a resource.
    pub fn resource<T: 'static>(&self) -> ECSResult<MappedRwLockReadGuard<'_, T>> {
        self.resources.get::<T>()
    }

    /// Exclusive access to a resource through a shared world borrow.
    pub fn resource_mut<T: 'static>(&self) -> ECSResult<MappedRwLockWriteGuard<'_, T>> {
        self.resources.get_mut::<T>()
    }

    /// Exclusive access to a resource without locking.
    pub fn get_resource_mut<T: 'static>(&mut self) -> ECSResult<&mut T> {
        self.resources.get_exclusive::<T>()
    }

    // ----- diagnostics ------------------------------------------------------

    /// Verifies directory consistency and column alignment of every table.
    pub fn check_invariants(&self) -> ECSResult<()> {
        let mut rows = 0;
        for table in &self.archetypes {
            table.check_consistency()?;
            rows += table.len();
        }
        if rows != self.entities.len() {
            return Err(ECSError::invariant(format!(
                "tables hold {rows} rows but the directory has {} live entities",
                self.entities.len()
            )));
        }
        for (entity, _) in self.entities.iter() {
            self.locate(entity)?;
        }
        Ok(())
    }
}

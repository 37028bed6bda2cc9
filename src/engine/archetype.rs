//! # Archetype tables
//!
//! An [`Archetype`] owns the columnar storage of every entity carrying exactly
//! one component signature: one [`Attribute<T>`](crate::engine::storage::Attribute)
//! column per component kind plus a parallel column of entity handles.
//!
//! ## Concurrency model
//!
//! Each column sits behind its own `parking_lot::RwLock`. While systems run,
//! tables are reached through `&World` only, so:
//!
//! * systems may read the same column concurrently,
//! * systems may write disjoint columns concurrently,
//! * two writers of one column serialize on its lock.
//!
//! Structural operations (`emplace`, `erase`, `move_row_to`, `reserve`) take
//! `&mut self` and reach the columns through `RwLock::get_mut`, so they can
//! never overlap a borrow. The borrow checker enforces the phase discipline
//! that the stage runner relies on.
//!
//! ## Invariants
//!
//! * Every column and the entity column have the same length, `len()`.
//! * `entities[row]` is the entity whose components live at `row`, and the
//!   reverse index maps that entity back to `row`.
//! * Every column can hold `capacity()` rows without reallocation.
//! * The column set equals the signature; it never changes after creation.
//!
//! Row order is not stable: erasing swaps the last row into the hole.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::engine::component::{component_name, make_empty_component, Bundle, ComponentSet};
use crate::engine::config::WorldConfig;
use crate::engine::entity::Entity;
use crate::engine::error::{CapacityError, ECSError, ECSResult, SignatureMismatchError};
use crate::engine::storage::TypeErasedAttribute;
use crate::engine::types::{ArchetypeID, ComponentID, RowID, Signature, Tick};


/// A component column guarded by a reader/writer lock.
pub type LockedAttribute = RwLock<Box<dyn TypeErasedAttribute>>;

/// Result of removing a row from a table.
///
/// `moved` is the entity that previously occupied the last row and now sits
/// at the erased row, if the erased row was not the last one.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapErase {
    /// Entity whose row changed.
    pub moved: Option<Entity>,
}

/// Result of moving a row into another table.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowMove {
    /// Row of the moved entity in the destination table.
    pub destination_row: RowID,
    /// Entity relocated in the source table by the swap-erase.
    pub moved: Option<Entity>,
}

/// Columnar storage for all entities sharing one signature.
///
/// ## Purpose
/// Keeps component values dense per kind so queries scan contiguous slices,
/// and supports O(1) append and O(1) swap-erase.
///
/// ## Design
/// - `columns` is indexed directly by component id; slots of kinds outside the
///   signature are `None`.
/// - `component_ids` lists the signature in ascending id order and drives
///   every whole-row operation, so columns are always visited in the same
///   order.
/// - `rows` is the reverse of `entities`, so erasing by entity is O(1).
/// - `capacity` is the logical capacity shared by all columns. Growth goes
///   through [`WorldConfig::grown_capacity`] and reallocates every column
///   in one pass.

pub struct Archetype {
    archetype_id: ArchetypeID,
    signature: Signature,
    component_ids: Vec<ComponentID>,
    columns: Vec<Option<LockedAttribute>>,
    entities: Vec<Entity>,
    rows: HashMap<Entity, RowID>,
    capacity: usize,
}

impl Archetype {
    /// Creates an empty table for `signature`.
    ///
    /// Allocates one zero-length column per component kind. Fails with
    /// `NotFound` if a kind was never registered.

    pub fn new(archetype_id: ArchetypeID, signature: Signature) -> ECSResult<Self> {
        let component_ids: Vec<ComponentID> = signature.iterate_over_components().collect();
        let slots = component_ids.last().map_or(0, |&max| max as usize + 1);

        let mut columns: Vec<Option<LockedAttribute>> = (0..slots).map(|_| None).collect();
        for &component_id in &component_ids {
            columns[component_id as usize] = Some(RwLock::new(make_empty_component(component_id)?));
        }

        tracing::debug!(
            archetype = archetype_id,
            components = ?component_ids.iter().map(|&cid| component_name(cid)).collect::<Vec<_>>(),
            "created archetype"
        );

        Ok(Self {
            archetype_id,
            signature,
            component_ids,
            columns,
            entities: Vec::new(),
            rows: HashMap::new(),
            capacity: 0,
        })
    }

    /// Identifier of this table; stable for the world's lifetime.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID {
        self.archetype_id
    }

    /// Component kinds stored here.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Component ids of the signature, ascending.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentID] {
        &self.component_ids
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the table holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Rows that fit before the next growth.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entity handles in row order.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entity stored at `row`.
    #[inline]
    pub fn entity_at(&self, row: RowID) -> Option<Entity> {
        self.entities.get(row).copied()
    }

    /// Row currently holding `entity`.
    #[inline]
    pub fn row_of(&self, entity: Entity) -> Option<RowID> {
        self.rows.get(&entity).copied()
    }

    fn push_entity(&mut self, entity: Entity) -> RowID {
        let row = self.entities.len();
        self.entities.push(entity);
        self.rows.insert(entity, row);
        row
    }

    /// Swap-removes the entity column at `row`, returning the removed entity
    /// and the one that took its place.
    fn swap_remove_entity(&mut self, row: RowID) -> (Entity, Option<Entity>) {
        let entity = self.entities.swap_remove(row);
        self.rows.remove(&entity);
        let moved = self.entities.get(row).copied();
        if let Some(moved) = moved {
            self.rows.insert(moved, row);
        }
        (entity, moved)
    }

    /// Returns `true` if `component_id` is part of the signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        self.signature.has(component_id)
    }

    /// Returns `true` if every kind in `S` is part of the signature.
    pub fn has_components<S: ComponentSet>(&self) -> bool {
        S::signature().is_ok_and(|needed| self.signature.contains_all(&needed))
    }

    /// Locked column for `component_id`.
    #[inline]
    pub fn column(&self, component_id: ComponentID) -> Option<&LockedAttribute> {
        self.columns.get(component_id as usize).and_then(Option::as_ref)
    }

    /// Column for `component_id`, bypassing its lock through exclusive access.
    #[inline]
    pub fn column_mut(&mut self, component_id: ComponentID) -> Option<&mut dyn TypeErasedAttribute> {
        self.columns
            .get_mut(component_id as usize)
            .and_then(Option::as_mut)
            .map(|locked| locked.get_mut().as_mut())
    }

    fn missing_column(&self, component_id: ComponentID) -> ECSError {
        ECSError::invariant(format!(
            "archetype {} has no column for component `{}`",
            self.archetype_id,
            component_name(component_id)
        ))
    }

    /// Grows every column so that at least `n` rows fit.
    ///
    /// No-op when `n <= capacity()`. Live rows are untouched; raw column
    /// pointers taken earlier must be re-fetched.

    pub fn reserve(&mut self, n: usize) -> Result<(), CapacityError> {
        if n <= self.capacity {
            return Ok(());
        }
        let failed = CapacityError {
            what: "archetype entity column",
            requested: n,
            capacity: self.capacity,
        };
        if n > self.entities.capacity() {
            let additional = n - self.entities.len();
            self.entities.try_reserve_exact(additional).map_err(|_| failed)?;
            self.rows.try_reserve(additional).map_err(|_| failed)?;
        }
        for column in self.columns.iter_mut().flatten() {
            column.get_mut().try_reserve_total(n)?;
        }
        tracing::trace!(archetype = self.archetype_id, from = self.capacity, to = n, "reserved rows");
        self.capacity = n;
        Ok(())
    }

    /// Makes room for `additional` more rows using the configured growth policy.
    pub fn reserve_additional(&mut self, additional: usize, config: &WorldConfig) -> Result<(), CapacityError> {
        let required = self.len().saturating_add(additional);
        if required <= self.capacity {
            return Ok(());
        }
        self.reserve(config.grown_capacity(self.capacity, required))
    }

    fn mismatch(&self, missing: Signature, unexpected: Signature) -> SignatureMismatchError {
        SignatureMismatchError {
            archetype: self.archetype_id,
            missing: missing.iterate_over_components().map(component_name).collect(),
            unexpected: unexpected.iterate_over_components().map(component_name).collect(),
        }
    }

    /// Appends a row for `entity` built from `bundle`.
    ///
    /// ## Behavior
    /// - The bundle must cover the signature exactly; values are matched to
    ///   columns by component id, so their order is irrelevant.
    /// - Coverage is checked before anything is written: a mismatched bundle
    ///   leaves the table untouched.
    /// - Every value is stamped with `tick`.
    ///
    /// ## Errors
    /// - `SignatureMismatch` if kinds are missing or unexpected.
    /// - `CapacityExhausted` if growth fails.
    ///
    /// Returns the new row index.

    pub fn emplace(
        &mut self,
        entity: Entity,
        bundle: Bundle,
        tick: Tick,
        config: &WorldConfig,
    ) -> ECSResult<RowID> {
        bundle.check()?;
        let supplied = bundle.signature();
        if supplied != self.signature {
            return Err(self
                .mismatch(self.signature.difference(&supplied), supplied.difference(&self.signature))
                .into());
        }

        self.reserve_additional(1, config)?;

        let row = self.entities.len();
        for (component_id, value) in bundle.into_values() {
            let Some(column) = self.column_mut(component_id) else {
                return Err(self.missing_column(component_id));
            };
            column.push_dyn(value, tick)?;
        }
        self.push_entity(entity);

        tracing::trace!(archetype = self.archetype_id, %entity, row, "emplaced row");
        Ok(row)
    }

    /// Removes `row`, dropping its values.
    ///
    /// If `row` is not the last row, the last row is moved into it and the
    /// moved entity is reported so the caller can fix its directory entry.
    /// A row out of range is an invariant violation.

    pub fn erase(&mut self, row: RowID) -> ECSResult<SwapErase> {
        if row >= self.entities.len() {
            return Err(ECSError::invariant(format!(
                "erase of row {row} in archetype {} with {} rows",
                self.archetype_id,
                self.entities.len()
            )));
        }

        for index in 0..self.component_ids.len() {
            let component_id = self.component_ids[index];
            let Some(column) = self.column_mut(component_id) else {
                return Err(self.missing_column(component_id));
            };
            column.swap_remove_dyn(row)?;
        }
        let (_, moved) = self.swap_remove_entity(row);
        tracing::trace!(archetype = self.archetype_id, row, ?moved, "erased row");
        Ok(SwapErase { moved })
    }

    /// Removes the row holding `entity`, found through [`Archetype::row_of`].
    pub fn erase_entity(&mut self, entity: Entity) -> ECSResult<SwapErase> {
        let row = self.row_of(entity).ok_or_else(|| {
            ECSError::invariant(format!(
                "entity {entity} is not stored in archetype {}",
                self.archetype_id
            ))
        })?;
        self.erase(row)
    }

    /// Moves `row` into `destination`, whose signature must equal this
    /// table's signature minus removed kinds plus the kinds in `added`.
    ///
    /// ## Behavior
    /// 1. `added` must cover exactly the destination kinds this table lacks.
    /// 2. Destination capacity is reserved before any value moves.
    /// 3. Shared kinds move with their change stamps, kinds absent from the
    ///    destination are dropped, and `added` values are stamped with `tick`.
    /// 4. The source row is swap-erased.
    ///
    /// Steps 1 and 2 are the only ones that can fail on valid input, and they
    /// leave both tables untouched.

    pub fn move_row_to(
        &mut self,
        row: RowID,
        destination: &mut Archetype,
        added: Bundle,
        tick: Tick,
        config: &WorldConfig,
    ) -> ECSResult<RowMove> {
        if row >= self.entities.len() {
            return Err(ECSError::invariant(format!(
                "move of row {row} out of archetype {} with {} rows",
                self.archetype_id,
                self.entities.len()
            )));
        }

        added.check()?;
        let required = destination.signature.difference(&self.signature);
        let supplied = added.signature();
        if supplied != required {
            return Err(destination
                .mismatch(required.difference(&supplied), supplied.difference(&required))
                .into());
        }

        destination.reserve_additional(1, config)?;

        let destination_row = destination.entities.len();
        for index in 0..self.component_ids.len() {
            let component_id = self.component_ids[index];
            let source_column = match self.columns.get_mut(component_id as usize).and_then(Option::as_mut) {
                Some(column) => column.get_mut(),
                None => return Err(self.missing_column(component_id)),
            };
            match destination.column_mut(component_id) {
                Some(destination_column) => source_column.move_row_dyn(row, destination_column)?,
                None => source_column.swap_remove_dyn(row)?,
            }
        }
        for (component_id, value) in added.into_values() {
            let Some(column) = destination.column_mut(component_id) else {
                return Err(destination.missing_column(component_id));
            };
            column.push_dyn(value, tick)?;
        }

        let (entity, moved) = self.swap_remove_entity(row);
        destination.push_entity(entity);

        tracing::trace!(
            %entity,
            from = self.archetype_id,
            to = destination.archetype_id,
            destination_row,
            "moved row"
        );
        Ok(RowMove { destination_row, moved })
    }

    /// Change stamp of `component_id` at `row`.
    pub fn tick_at(&self, component_id: ComponentID, row: RowID) -> Option<Tick> {
        self.column(component_id)?.read().tick_at(row)
    }

    /// Verifies that every column matches the entity column's length and
    /// that the reverse index agrees with the entity column.
    pub fn check_consistency(&self) -> ECSResult<()> {
        if self.rows.len() != self.entities.len() {
            return Err(ECSError::invariant(format!(
                "archetype {} indexes {} entities but stores {}",
                self.archetype_id,
                self.rows.len(),
                self.entities.len()
            )));
        }
        for (row, entity) in self.entities.iter().enumerate() {
            if self.rows.get(entity) != Some(&row) {
                return Err(ECSError::invariant(format!(
                    "entity {entity} at row {row} of archetype {} is indexed elsewhere",
                    self.archetype_id
                )));
            }
        }
        for &component_id in &self.component_ids {
            let column = self.column(component_id).ok_or_else(|| self.missing_column(component_id))?;
            let length = column.read().length();
            if length != self.entities.len() {
                return Err(ECSError::invariant(format!(
                    "column `{}` of archetype {} has {length} rows; entity column has {}",
                    component_name(component_id),
                    self.archetype_id,
                    self.entities.len()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("archetype_id", &self.archetype_id)
            .field(
                "components",
                &self.component_ids.iter().map(|&cid| component_name(cid)).collect::<Vec<_>>(),
            )
            .field("len", &self.entities.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::component::{register_component, IntoBundle};
    use crate::engine::storage::Attribute;

    #[derive(Debug, PartialEq)]
    struct Position(i32, i32);
    #[derive(Debug, PartialEq)]
    struct Health(u8);

    fn table() -> Archetype {
        let signature = <(Position, Health)>::signature().unwrap();
        Archetype::new(0, signature).unwrap()
    }

    fn positions(table: &mut Archetype) -> Vec<(i32, i32)> {
        let pid = register_component::<Position>().unwrap();
        table
            .column_mut(pid)
            .unwrap()
            .as_any()
            .downcast_ref::<Attribute<Position>>()
            .unwrap()
            .iter()
            .map(|p| (p.0, p.1))
            .collect()
    }

    #[test]
    fn emplace_rejects_partial_bundles_without_writing() {
        let mut table = table();
        let config = WorldConfig::default();
        let e = Entity::from_raw_parts(0, 0);

        let err = table.emplace(e, (Position(0, 0),).into_bundle(), 1, &config).unwrap_err();
        assert!(matches!(err, ECSError::SignatureMismatch(ref m) if m.missing.len() == 1));
        assert_eq!(table.len(), 0);
        table.check_consistency().unwrap();
    }

    #[test]
    fn emplace_accepts_any_value_order() {
        let mut table = table();
        let config = WorldConfig::default();
        let row = table
            .emplace(Entity::from_raw_parts(0, 0), (Health(3), Position(1, 2)).into_bundle(), 1, &config)
            .unwrap();
        assert_eq!(row, 0);
        assert_eq!(positions(&mut table), vec![(1, 2)]);
        assert_eq!(table.capacity(), config.initial_table_capacity);
    }

    #[test]
    fn erase_swaps_last_row_into_hole() {
        let mut table = table();
        let config = WorldConfig::default();
        let ids: Vec<Entity> = (1..=3).map(|i| Entity::from_raw_parts(i, 0)).collect();
        for (i, &e) in ids.iter().enumerate() {
            table
                .emplace(e, (Position(i as i32, 0), Health(i as u8)).into_bundle(), 1, &config)
                .unwrap();
        }

        let erased = table.erase(1).unwrap();

        assert_eq!(erased.moved, Some(ids[2]));
        assert_eq!(table.entities(), &[ids[0], ids[2]]);
        assert_eq!(positions(&mut table), vec![(0, 0), (2, 0)]);

        assert_eq!(table.erase(1).unwrap().moved, None);
        assert_eq!(table.erase(0).unwrap().moved, None);
        assert!(table.is_empty());
        assert!(table.erase(0).unwrap_err().is_fatal());
    }

    #[test]
    fn reserve_is_exact_and_idempotent() {
        let mut table = table();
        table.reserve(10).unwrap();
        assert_eq!(table.capacity(), 10);
        table.reserve(4).unwrap();
        assert_eq!(table.capacity(), 10);
    }

    #[test]
    fn move_row_drops_removed_kinds() {
        let config = WorldConfig::default();
        let mut source = table();
        let mut destination = Archetype::new(1, <(Position,)>::signature().unwrap()).unwrap();
        let a = Entity::from_raw_parts(0, 0);
        let b = Entity::from_raw_parts(1, 0);
        source.emplace(a, (Position(1, 1), Health(1)).into_bundle(), 1, &config).unwrap();
        source.emplace(b, (Position(2, 2), Health(2)).into_bundle(), 1, &config).unwrap();

        let moved = source.move_row_to(0, &mut destination, Bundle::new(), 2, &config).unwrap();

        assert_eq!(moved, RowMove { destination_row: 0, moved: Some(b) });
        assert_eq!(destination.entities(), &[a]);
        assert_eq!(positions(&mut destination), vec![(1, 1)]);
        let pid = register_component::<Position>().unwrap();
        assert_eq!(destination.tick_at(pid, 0), Some(1));
        source.check_consistency().unwrap();
        destination.check_consistency().unwrap();
    }

    #[test]
    fn move_row_requires_added_values() {
        let config = WorldConfig::default();
        let mut source = Archetype::new(0, <(Position,)>::signature().unwrap()).unwrap();
        let mut destination = table();
        source
            .emplace(Entity::from_raw_parts(0, 0), (Position(0, 0),).into_bundle(), 1, &config)
            .unwrap();

        let err = source.move_row_to(0, &mut destination, Bundle::new(), 2, &config).unwrap_err();
        assert!(matches!(err, ECSError::SignatureMismatch(_)));
        assert_eq!(source.len(), 1);
        assert_eq!(destination.len(), 0);
    }
}

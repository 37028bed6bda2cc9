//! Entity handles and the entity directory.
//!
//! An [`Entity`] is an `(index, generation)` pair. The index names a slot in
//! the [`Entities`] directory; the generation is bumped every time the slot is
//! freed, so a handle kept past its entity's death never aliases whichever
//! entity reuses the slot.
//!
//! ## Invariants
//! - A handle is live iff its slot's generation equals the handle's and the
//!   slot holds a location.
//! - For every live entity `e`, `location(e) = (archetype, row)` names the
//!   table row whose stored entity is `e`. The directory cannot check this on
//!   its own; the world re-establishes it after every row move.
//! - Freed indices are reused last-in first-out.

use std::fmt;

use crate::engine::error::{CapacityError, ECSError, ECSResult, NotFoundError};
use crate::engine::types::{ArchetypeID, RowID};


/// Generational entity handle.

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// Builds a handle from its parts.
    #[inline]
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Directory slot of this entity.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the handle into a single `u64`, generation in the high half.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`Entity::to_bits`].
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self { index: bits as u32, generation: (bits >> 32) as u32 }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Where a live entity's components are stored.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityLocation {
    /// Table holding the entity.
    pub archetype: ArchetypeID,
    /// Row inside that table.
    pub row: RowID,
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    generation: u32,
    location: Option<EntityLocation>,
}

/// Maps entity handles to their current table row.

#[derive(Debug, Default)]
pub struct Entities {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Entities {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory with room for `capacity` entities.
    pub fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        let mut entities = Self::default();
        entities.reserve(capacity)?;
        Ok(entities)
    }

    /// Makes room for `additional` allocations without reallocating.
    pub fn reserve(&mut self, additional: usize) -> Result<(), CapacityError> {
        let reusable = self.free.len();
        let fresh = additional.saturating_sub(reusable);
        if fresh == 0 {
            return Ok(());
        }
        let requested = self.slots.len().saturating_add(fresh);
        let failed = CapacityError {
            what: "entity directory",
            requested,
            capacity: self.slots.capacity(),
        };
        if requested > u32::MAX as usize {
            return Err(failed);
        }
        self.slots.try_reserve(fresh).map_err(|_| failed)
    }

    /// Allocates a handle with no location yet.
    ///
    /// The handle is not live until [`Entities::set_location`] is called; a
    /// caller that fails to place it must hand it back through
    /// [`Entities::free`].
    pub fn alloc(&mut self) -> Result<Entity, CapacityError> {
        if let Some(index) = self.free.pop() {
            let generation = self.slots[index as usize].generation;
            return Ok(Entity::from_raw_parts(index, generation));
        }
        let index = self.slots.len();
        if index >= u32::MAX as usize {
            return Err(CapacityError {
                what: "entity directory",
                requested: index + 1,
                capacity: u32::MAX as usize,
            });
        }
        self.reserve(1)?;
        self.slots.push(Slot::default());
        Ok(Entity::from_raw_parts(index as u32, 0))
    }

    /// Releases `entity`'s slot, returning its last location.
    ///
    /// Returns `None` for stale handles, which are left untouched.
    pub fn free(&mut self, entity: Entity) -> Option<EntityLocation> {
        let slot = self.slots.get_mut(entity.index as usize)?;
        if slot.generation != entity.generation {
            return None;
        }
        let location = slot.location.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index);
        if location.is_some() {
            self.live -= 1;
        }
        location
    }

    /// Location of a live entity.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        let slot = self.slots.get(entity.index as usize)?;
        if slot.generation == entity.generation {
            slot.location
        } else {
            None
        }
    }

    /// Location of a live entity, or `NotFound`.
    #[inline]
    pub fn try_location(&self, entity: Entity) -> ECSResult<EntityLocation> {
        self.location(entity)
            .ok_or_else(|| NotFoundError::Entity(entity).into())
    }

    /// Returns `true` if `entity` is live.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.location(entity).is_some()
    }

    /// Records `entity`'s new location.
    ///
    /// Fails with an invariant violation if the handle is stale: the world
    /// only ever relocates entities it just read out of a table.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) -> ECSResult<()> {
        let slot = self
            .slots
            .get_mut(entity.index as usize)
            .filter(|slot| slot.generation == entity.generation)
            .ok_or_else(|| ECSError::invariant(format!("relocating stale entity {entity}")))?;
        if slot.location.is_none() {
            self.live += 1;
        }
        slot.location = Some(location);
        Ok(())
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no entity is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates live entities with their locations, by index.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, EntityLocation)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.location
                .map(|location| (Entity::from_raw_parts(index as u32, slot.generation), location))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(archetype: ArchetypeID, row: RowID) -> EntityLocation {
        EntityLocation { archetype, row }
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let mut entities = Entities::new();
        let first = entities.alloc().unwrap();
        entities.set_location(first, at(0, 0)).unwrap();

        assert_eq!(entities.free(first), Some(at(0, 0)));
        let second = entities.alloc().unwrap();

        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert!(!entities.contains(first));
        assert!(entities.location(first).is_none());
    }

    #[test]
    fn allocated_handle_is_not_live_until_placed() {
        let mut entities = Entities::new();
        let e = entities.alloc().unwrap();
        assert!(!entities.contains(e));
        assert_eq!(entities.len(), 0);

        entities.set_location(e, at(1, 4)).unwrap();
        assert_eq!(entities.try_location(e).unwrap(), at(1, 4));
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut entities = Entities::new();
        let e = entities.alloc().unwrap();
        entities.set_location(e, at(0, 0)).unwrap();
        entities.free(e);

        assert_eq!(entities.free(e), None);
        assert!(entities.try_location(e).unwrap_err().is_not_found());
        assert!(entities.set_location(e, at(0, 1)).unwrap_err().is_fatal());
    }

    #[test]
    fn bits_round_trip() {
        let e = Entity::from_raw_parts(7, 3);
        assert_eq!(Entity::from_bits(e.to_bits()), e);
        assert_eq!(e.to_string(), "7v3");
    }
}

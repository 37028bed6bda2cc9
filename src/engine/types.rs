//! Core identifiers, signatures and access declarations.
//!
//! This module defines the small, copyable types shared by every other part of
//! the engine: numeric identifiers, the component [`Signature`] bitset used for
//! archetype identity and query matching, the [`QuerySignature`] describing a
//! query's structural filter, the [`AccessSets`] a system declares for
//! scheduling, and the [`SystemTicks`] pair used by change detection.
//!
//! ## Signatures
//!
//! Component sets are fixed-size arrays of `u64` words. Subset and
//! disjointness checks are word-wise bit operations, so matching an archetype
//! against a query costs `SIGNATURE_SIZE` ANDs regardless of how many
//! components either side names.
//!
//! ## Ticks
//!
//! Ticks are a monotonically increasing `u64` counter owned by the world.
//! A stamp is "newer" than a tick only when strictly greater; equal ticks are
//! never reported as changed.

use std::any::TypeId;

use crate::engine::component::{register_component, Component};
use crate::engine::error::{ECSError, ECSResult};


/// Unique identifier for a registered component type.
pub type ComponentID = u16;

/// Identifier of an archetype table; also its index in the world's table list.
pub type ArchetypeID = u32;

/// Row position inside an archetype table.
pub type RowID = usize;

/// Change-detection counter.
pub type Tick = u64;

/// Index of a command log within a stage (the dispatch slot of a unit).
pub type WorkerID = usize;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 256;

/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = (COMPONENT_CAP + 63) / 64;

/// Bitset representing an unordered set of component kinds.
///
/// Two archetypes with equal signatures are the same archetype; the empty
/// signature names the archetype of entities without components.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Signature {
    /// Builds a signature from a list of component ids.
    pub fn from_ids(component_ids: &[ComponentID]) -> Self {
        let mut signature = Signature::default();
        for &component_id in component_ids {
            signature.set(component_id);
        }
        signature
    }

    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if every component in `signature` is present here.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    /// Returns `true` if no component is present in both signatures.
    #[inline]
    pub fn is_disjoint(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == 0)
    }

    /// Returns `true` if no component bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|&word| word == 0)
    }

    /// Number of components in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Components present in either signature.
    #[inline]
    pub fn union(&self, other: &Signature) -> Signature {
        let mut out = *self;
        for (word, other) in out.components.iter_mut().zip(other.components.iter()) {
            *word |= other;
        }
        out
    }

    /// Components present here but not in `other`.
    #[inline]
    pub fn difference(&self, other: &Signature) -> Signature {
        let mut out = *self;
        for (word, other) in out.components.iter_mut().zip(other.components.iter()) {
            *word &= !other;
        }
        out
    }

    /// Iterates over all component ids set in this signature, ascending.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.components
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as ComponentID)
                })
            })
    }
}

/// Structural filter of a query.
///
/// An archetype matches when its signature is a superset of `with` and
/// disjoint from `without`. `changed` is informational: the components it
/// names are also part of `with`, and the per-row tick comparison happens
/// during iteration.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuerySignature {
    /// Components that must be present.
    pub with: Signature,

    /// Components that must be absent.
    pub without: Signature,

    /// Components carrying a changed-since filter.
    pub changed: Signature,
}

impl QuerySignature {
    /// Returns `true` if an archetype with `archetype_signature` satisfies the
    /// structural part of this query.
    #[inline]
    pub fn matches(&self, archetype_signature: &Signature) -> bool {
        archetype_signature.contains_all(&self.with)
            && archetype_signature.is_disjoint(&self.without)
    }
}

/// Access mode for a component or resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Shared, read-only access.
    Read,
    /// Exclusive write access.
    Write,
}

/// Declares the component and resource access of a system.
///
/// Used by the stage planner to keep conflicting systems out of the same
/// stage; the engine itself does not enforce it.
///
/// A component kind that cannot be registered is recorded as an error, see
/// [`AccessSets::check`]. An access set carrying an error conflicts with
/// every other access set.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Components read by the system.
    pub read: Signature,
    /// Components written by the system.
    pub write: Signature,
    /// Resources read by the system.
    pub resource_read: Vec<TypeId>,
    /// Resources written by the system.
    pub resource_write: Vec<TypeId>,
    pub(crate) error: Option<ECSError>,
}

impl AccessSets {
    /// Declares shared access to component `T`.
    pub fn read<T: Component>(mut self) -> Self {
        match register_component::<T>() {
            Ok(component_id) => self.read.set(component_id),
            Err(e) => self.record(e),
        }
        self
    }

    /// Declares exclusive access to component `T`.
    pub fn write<T: Component>(mut self) -> Self {
        match register_component::<T>() {
            Ok(component_id) => self.write.set(component_id),
            Err(e) => self.record(e),
        }
        self
    }

    fn record(&mut self, error: ECSError) {
        tracing::warn!(%error, "component access could not be declared");
        self.error.get_or_insert(error);
    }

    /// Surfaces a registration failure recorded while declaring access.
    pub fn check(&self) -> ECSResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Declares shared access to resource `T`.
    pub fn read_resource<T: 'static>(mut self) -> Self {
        insert_sorted(&mut self.resource_read, TypeId::of::<T>());
        self
    }

    /// Declares exclusive access to resource `T`.
    pub fn write_resource<T: 'static>(mut self) -> Self {
        insert_sorted(&mut self.resource_write, TypeId::of::<T>());
        self
    }

    /// Returns `true` if this access set conflicts with another.
    ///
    /// Conflicts are write/write, write/read and read/write overlaps on
    /// either components or resources. An access set with a recorded error
    /// conflicts with everything.
    pub fn conflicts_with(&self, other: &AccessSets) -> bool {
        if self.error.is_some() || other.error.is_some() {
            return true;
        }
        let components = !self.write.is_disjoint(&other.write)
            || !self.write.is_disjoint(&other.read)
            || !self.read.is_disjoint(&other.write);
        if components {
            return true;
        }

        let overlaps = |a: &[TypeId], b: &[TypeId]| a.iter().any(|t| b.binary_search(t).is_ok());
        overlaps(&self.resource_write, &other.resource_write)
            || overlaps(&self.resource_write, &other.resource_read)
            || overlaps(&self.resource_read, &other.resource_write)
    }
}

fn insert_sorted(list: &mut Vec<TypeId>, type_id: TypeId) {
    if let Err(position) = list.binary_search(&type_id) {
        list.insert(position, type_id);
    }
}

/// Tick window of one system invocation.
///
/// Writes performed during the invocation are stamped with `this_run`;
/// `Changed<T>` filters yield rows whose stamp is strictly greater than
/// `last_run`.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemTicks {
    /// Tick at which the system last completed (0 if never).
    pub last_run: Tick,
    /// Tick of the current invocation.
    pub this_run: Tick,
}

impl SystemTicks {
    /// Creates a tick window.
    #[inline]
    pub fn new(last_run: Tick, this_run: Tick) -> Self {
        Self { last_run, this_run }
    }

    /// Returns `true` if a stamp counts as changed for this window.
    #[inline]
    pub fn is_changed(&self, stamp: Tick) -> bool {
        stamp > self.last_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_set_operations() {
        let a = Signature::from_ids(&[1, 3, 70]);
        let b = Signature::from_ids(&[3]);
        let c = Signature::from_ids(&[5]);

        assert!(a.contains_all(&b));
        assert!(!b.contains_all(&a));
        assert!(a.is_disjoint(&c));
        assert_eq!(a.len(), 3);
        assert_eq!(a.union(&c).len(), 4);
        assert_eq!(a.difference(&b), Signature::from_ids(&[1, 70]));
        assert_eq!(a.iterate_over_components().collect::<Vec<_>>(), vec![1, 3, 70]);
        assert!(Signature::default().is_empty());
    }

    #[test]
    fn query_signature_requires_with_and_rejects_without() {
        let query = QuerySignature {
            with: Signature::from_ids(&[0, 1]),
            without: Signature::from_ids(&[2]),
            changed: Signature::default(),
        };

        assert!(query.matches(&Signature::from_ids(&[0, 1])));
        assert!(query.matches(&Signature::from_ids(&[0, 1, 3])));
        assert!(!query.matches(&Signature::from_ids(&[0, 1, 2])));
        assert!(!query.matches(&Signature::from_ids(&[0])));
    }

    #[test]
    fn ticks_exclude_equal_stamps() {
        let ticks = SystemTicks::new(5, 9);
        assert!(!ticks.is_changed(5));
        assert!(ticks.is_changed(6));
        assert!(!ticks.is_changed(4));
    }

    #[test]
    fn resource_access_conflicts() {
        struct Clock;
        let reader = AccessSets::default().read_resource::<Clock>();
        let writer = AccessSets::default().write_resource::<Clock>();

        assert!(!reader.conflicts_with(&reader.clone()));
        assert!(reader.conflicts_with(&writer));
        assert!(writer.conflicts_with(&writer.clone()));
    }

    #[test]
    fn undeclarable_access_conflicts_with_everything() {
        use crate::engine::error::CapacityError;

        let mut broken = AccessSets::default();
        broken.record(ECSError::CapacityExhausted(CapacityError {
            what: "component registry",
            requested: COMPONENT_CAP + 1,
            capacity: COMPONENT_CAP,
        }));

        assert!(broken.check().is_err());
        assert!(broken.conflicts_with(&AccessSets::default()));
        assert!(AccessSets::default().conflicts_with(&broken));
        assert!(AccessSets::default().check().is_ok());
    }
}

//! # Component Registry
//!
//! This module assigns stable `ComponentID` values to Rust component types and
//! exposes type-erased storage factories for archetype column allocation. It
//! also defines [`Bundle`], the type-erased set of component values used to
//! spawn entities and to add components to existing ones.
//!
//! ## Purpose
//! The registry decouples component type information (`TypeId`, name, size,
//! alignment) from runtime storage, so archetypes can hold heterogeneous
//! columns behind [`TypeErasedAttribute`] and build them from an id alone.
//!
//! ## Design
//! - Components are registered on first use and receive a compact id in
//!   `[0, COMPONENT_CAP)`. Registration is idempotent.
//! - Each id maps to a [`ComponentDesc`] and a factory producing an empty
//!   column for that type.
//!
//! ## Concurrency
//! The registry is a process-wide `RwLock`. Lookups of already registered
//! types only take the read lock, so systems running in parallel may register
//! or resolve component types freely.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::mem::{align_of, size_of};
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::engine::error::{CapacityError, ECSError, ECSResult, NotFoundError};
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{ComponentID, Signature, COMPONENT_CAP};


/// Marker for types storable as components.
///
/// Any `'static + Send + Sync` type qualifies; there is nothing to derive.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

/// Factory function for constructing an empty type-erased column.
type FactoryFn = fn() -> Box<dyn TypeErasedAttribute>;

fn new_attribute_storage<T: Component>() -> Box<dyn TypeErasedAttribute> {
    Box::new(Attribute::<T>::default())
}

/// Describes a registered component type.
///
/// `ComponentDesc` is `Copy` and safe to clone freely for diagnostics.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component type.
    pub component_id: ComponentID,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Size of the component type in bytes.
    pub size: usize,

    /// Alignment of the component type in bytes.
    pub align: usize,
}

impl ComponentDesc {
    /// Constructs a descriptor for type `T` with the given id.
    #[inline]
    pub fn of<T: 'static>(component_id: ComponentID) -> Self {
        Self {
            component_id,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }

    /// Returns `true` if this descriptor refers to type `T`.
    #[inline]
    pub fn matches_type<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, size: {}, align: {} }}",
            self.component_id, self.name, self.size, self.align
        )
    }
}

/// Global mapping between Rust component types and compact ids.
///
/// ## Invariants
/// - Every entry in `by_type` has matching `descs[id]` and `factories[id]`.
/// - `descs.len() == factories.len()` and both are below `COMPONENT_CAP`.

#[derive(Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentID>,
    descs: Vec<ComponentDesc>,
    factories: Vec<FactoryFn>,
}

impl ComponentRegistry {
    /// Registers `T`, returning its existing id if already registered.
    pub fn register<T: Component>(&mut self) -> ECSResult<ComponentID> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return Ok(existing);
        }

        if self.descs.len() >= COMPONENT_CAP {
            return Err(CapacityError {
                what: "component registry",
                requested: self.descs.len() + 1,
                capacity: COMPONENT_CAP,
            }
            .into());
        }

        let id = self.descs.len() as ComponentID;
        self.by_type.insert(type_id, id);
        self.descs.push(ComponentDesc::of::<T>(id));
        self.factories.push(new_attribute_storage::<T>);
        tracing::trace!(component = type_name::<T>(), id, "registered component");
        Ok(id)
    }

    /// Returns the id associated with a `TypeId`, if registered.
    #[inline]
    pub fn id_of_type_id(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the descriptor for `component_id`, if registered.
    #[inline]
    pub fn description(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.descs.get(component_id as usize)
    }

    /// Number of registered component types.
    #[inline]
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// Returns `true` if nothing has been registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }
}

static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();

fn component_registry() -> &'static RwLock<ComponentRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(ComponentRegistry::default()))
}

/// Registers component type `T` and returns its id.
///
/// Already registered types resolve under the read lock only.

pub fn register_component<T: Component>() -> ECSResult<ComponentID> {
    if let Some(id) = component_registry().read().id_of_type_id(TypeId::of::<T>()) {
        return Ok(id);
    }
    component_registry().write().register::<T>()
}

/// Returns the id of `T` without registering it.
pub fn component_id_of<T: 'static>() -> ECSResult<ComponentID> {
    component_registry()
        .read()
        .id_of_type_id(TypeId::of::<T>())
        .ok_or_else(|| NotFoundError::Component(type_name::<T>()).into())
}

/// Returns a copy of the descriptor for `component_id`, if registered.
pub fn component_description(component_id: ComponentID) -> Option<ComponentDesc> {
    component_registry().read().description(component_id).copied()
}

/// Diagnostic name of a component id.
pub fn component_name(component_id: ComponentID) -> &'static str {
    component_description(component_id)
        .map(|desc| desc.name)
        .unwrap_or("<unregistered>")
}

/// Creates an empty type-erased column for `component_id`.
pub fn make_empty_component(component_id: ComponentID) -> ECSResult<Box<dyn TypeErasedAttribute>> {
    let registry = component_registry().read();
    let factory = registry
        .factories
        .get(component_id as usize)
        .ok_or(NotFoundError::ComponentId(component_id))?;
    Ok(factory())
}

/// Type-erased set of component values.
///
/// Values are keyed by component id, so insertion order is irrelevant and
/// inserting a type twice replaces the earlier value. A registration failure
/// while building the bundle is kept and reported when the bundle is used.

#[derive(Default)]
pub struct Bundle {
    signature: Signature,
    values: Vec<(ComponentID, Box<dyn Any + Send>)>,
    error: Option<ECSError>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value`, builder style.
    #[inline]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Adds `value`, replacing any earlier value of the same type.
    pub fn insert<T: Component>(&mut self, value: T) {
        match register_component::<T>() {
            Ok(component_id) => self.insert_boxed(component_id, Box::new(value)),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
    }

    pub(crate) fn insert_boxed(&mut self, component_id: ComponentID, value: Box<dyn Any + Send>) {
        if self.signature.has(component_id) {
            if let Some(slot) = self.values.iter_mut().find(|(cid, _)| *cid == component_id) {
                slot.1 = value;
                return;
            }
        }
        self.signature.set(component_id);
        self.values.push((component_id, value));
    }

    /// Removes and returns the value for `component_id`, if present.
    pub fn take(&mut self, component_id: ComponentID) -> Option<Box<dyn Any + Send>> {
        let index = self.values.iter().position(|(cid, _)| *cid == component_id)?;
        self.signature.clear(component_id);
        let (_, value) = self.values.swap_remove(index);
        Some(value)
    }

    /// Drops every value whose component is in `present`.
    pub fn retain_absent(&mut self, present: &Signature) {
        self.values.retain(|(cid, _)| !present.has(*cid));
        self.signature = self.signature.difference(present);
    }

    /// Signature of the components in this bundle.
    #[inline]
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Number of component values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the bundle holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Component ids held by this bundle, in insertion order.
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.values.iter().map(|(cid, _)| *cid)
    }

    /// Surfaces a registration failure recorded while building.
    pub fn check(&self) -> ECSResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn into_values(self) -> Vec<(ComponentID, Box<dyn Any + Send>)> {
        self.values
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.values.iter().map(|(cid, _)| component_name(*cid)))
            .finish()
    }
}

/// Conversion into a [`Bundle`].
///
/// Implemented for `Bundle`, `()` and tuples of up to eight components.
pub trait IntoBundle {
    /// Packs `self` into a type-erased bundle.
    fn into_bundle(self) -> Bundle;
}

impl IntoBundle for Bundle {
    #[inline]
    fn into_bundle(self) -> Bundle {
        self
    }
}

/// A static set of component types.
///
/// Implemented for `()` and tuples of up to eight component types; used to
/// name kinds without values (removal, reservation, filters).
pub trait ComponentSet {
    /// Registers every type and returns their ids.
    fn component_ids() -> ECSResult<Vec<ComponentID>>;

    /// Signature formed by the set.
    fn signature() -> ECSResult<Signature> {
        Ok(Signature::from_ids(&Self::component_ids()?))
    }
}

macro_rules! impl_component_tuples {
    ($($name:ident),*) => {
        impl<$($name: Component),*> IntoBundle for ($($name,)*) {
            #[allow(non_snake_case, unused_mut)]
            fn into_bundle(self) -> Bundle {
                let ($($name,)*) = self;
                let mut bundle = Bundle::new();
                $( bundle.insert($name); )*
                bundle
            }
        }

        impl<$($name: Component),*> ComponentSet for ($($name,)*) {
            #[allow(unused_mut)]
            fn component_ids() -> ECSResult<Vec<ComponentID>> {
                let mut ids = Vec::new();
                $( ids.push(register_component::<$name>()?); )*
                Ok(ids)
            }
        }
    };
}

impl_component_tuples!();
impl_component_tuples!(A);
impl_component_tuples!(A, B);
impl_component_tuples!(A, B, C);
impl_component_tuples!(A, B, C, D);
impl_component_tuples!(A, B, C, D, E);
impl_component_tuples!(A, B, C, D, E, F);
impl_component_tuples!(A, B, C, D, E, F, G);
impl_component_tuples!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    struct Mass(f32);
    #[allow(dead_code)]
    struct Charge(i8);

    #[test]
    fn registration_is_idempotent() {
        let first = register_component::<Mass>().unwrap();
        let second = register_component::<Mass>().unwrap();
        assert_eq!(first, second);
        assert_eq!(component_id_of::<Mass>().unwrap(), first);
        assert!(component_description(first).unwrap().matches_type::<Mass>());
    }

    #[test]
    fn bundle_replaces_duplicate_types() {
        let bundle = Bundle::new().with(Mass(1.0)).with(Charge(-1)).with(Mass(2.0));
        assert_eq!(bundle.len(), 2);

        let mass_id = component_id_of::<Mass>().unwrap();
        let mut bundle = bundle;
        let value = bundle.take(mass_id).unwrap();
        assert_eq!(value.downcast_ref::<Mass>().map(|m| m.0), Some(2.0));
        assert!(!bundle.signature().has(mass_id));
    }

    #[test]
    fn tuple_order_does_not_change_signature() {
        let a = (Mass(1.0), Charge(1)).into_bundle().signature();
        let b = (Charge(1), Mass(1.0)).into_bundle().signature();
        assert_eq!(a, b);
        assert_eq!(<(Charge, Mass)>::signature().unwrap(), a);
    }
}

//! Type-keyed singleton storage.
//!
//! A resource is a value owned by the world and addressed by its Rust type,
//! not by an entity. Insertion is always explicit; reading a resource that
//! was never inserted is `NotFound`, never a default.
//!
//! Each resource sits behind its own `parking_lot::RwLock` so systems holding
//! `&World` can take shared or exclusive access. The stage planner keeps
//! conflicting declarations out of one stage, so these locks are uncontended
//! in a correctly planned schedule.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::error::{ECSError, ECSResult, NotFoundError};


type ResourceBox = Box<dyn Any + Send + Sync>;

/// Map from type to singleton value.

#[derive(Default)]
pub struct Resources {
    values: HashMap<TypeId, RwLock<ResourceBox>>,
}

impl Resources {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value`, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        let previous = self.values.insert(TypeId::of::<T>(), RwLock::new(Box::new(value)))?;
        previous.into_inner().downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Removes and returns the resource of type `T`.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        let locked = self.values.remove(&TypeId::of::<T>())?;
        locked.into_inner().downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Returns `true` if a `T` has been inserted.
    #[inline]
    pub fn contains<T: 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored resources.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no resource is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn locked<T: 'static>(&self) -> ECSResult<&RwLock<ResourceBox>> {
        self.values
            .get(&TypeId::of::<T>())
            .ok_or_else(|| NotFoundError::Resource(type_name::<T>()).into())
    }

    /// Shared access to `T`.
    pub fn get<T: 'static>(&self) -> ECSResult<MappedRwLockReadGuard<'_, T>> {
        let guard = self.locked::<T>()?.read();
        RwLockReadGuard::try_map(guard, |boxed| boxed.downcast_ref::<T>())
            .map_err(|_| mistyped::<T>())
    }

    /// Exclusive access to `T` through a shared world borrow.
    pub fn get_mut<T: 'static>(&self) -> ECSResult<MappedRwLockWriteGuard<'_, T>> {
        let guard = self.locked::<T>()?.write();
        RwLockWriteGuard::try_map(guard, |boxed| boxed.downcast_mut::<T>())
            .map_err(|_| mistyped::<T>())
    }

    /// Exclusive access to `T` without locking.
    pub fn get_exclusive<T: 'static>(&mut self) -> ECSResult<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .ok_or_else(|| ECSError::from(NotFoundError::Resource(type_name::<T>())))?
            .get_mut()
            .downcast_mut::<T>()
            .ok_or_else(mistyped::<T>)
    }
}

fn mistyped<T>() -> ECSError {
    ECSError::invariant(format!("resource slot for `{}` holds another type", type_name::<T>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Gravity(f32);

    #[test]
    fn missing_resource_is_not_found() {
        let resources = Resources::new();
        let err = resources.get::<Gravity>().unwrap_err();
        assert_eq!(err, ECSError::NotFound(NotFoundError::Resource(type_name::<Gravity>())));
    }

    #[test]
    fn insert_replaces_and_returns_previous() {
        let mut resources = Resources::new();
        assert_eq!(resources.insert(Gravity(9.8)), None);
        assert_eq!(resources.insert(Gravity(1.6)), Some(Gravity(9.8)));

        resources.get_mut::<Gravity>().unwrap().0 += 1.0;
        assert_eq!(*resources.get::<Gravity>().unwrap(), Gravity(2.6));

        *resources.get_exclusive::<Gravity>().unwrap() = Gravity(0.0);
        assert_eq!(resources.remove::<Gravity>(), Some(Gravity(0.0)));
        assert!(!resources.contains::<Gravity>());
    }
}

//! Error types for storage, structural mutation and system execution.
//!
//! Low-level operations return small, focused error values that carry enough
//! context to be actionable in logs. Each converts into the aggregate
//! [`ECSError`] so higher layers can use `?` and still return one type.
//!
//! ## Taxonomy
//! * [`NotFoundError`] — unknown or dead entity, unresolved placeholder,
//!   missing resource, unregistered component.
//! * [`SignatureMismatchError`] — a bundle does not cover a table's
//!   signature exactly, or a typed access names a component the table lacks.
//! * [`CapacityError`] — allocation failure while growing storage, or the
//!   component registry is full.
//! * [`ECSError::InvariantViolation`] — directory and table storage disagree.
//!   This is a bug, not a user error, and callers treat it as fatal.
//!
//! ## Display vs. Debug
//! `Display` messages are short and suitable for operator logs; `Debug`
//! keeps the full structure.

use thiserror::Error;

use crate::engine::commands::PendingEntity;
use crate::engine::entity::Entity;
use crate::engine::types::{ArchetypeID, ComponentID};


/// Convenience alias used throughout the engine.
pub type ECSResult<T> = Result<T, ECSError>;

/// Returned when a lookup by identifier finds nothing live.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    /// The entity was never allocated, was killed, or its generation is stale.
    #[error("entity {0} is not alive")]
    Entity(Entity),

    /// A deferred spawn placeholder has no resolved entity.
    #[error("pending entity {0} was never spawned")]
    Pending(PendingEntity),

    /// No resource of the named type has been inserted.
    #[error("resource `{0}` does not exist")]
    Resource(&'static str),

    /// The named Rust type has not been registered as a component.
    #[error("component type `{0}` is not registered")]
    Component(&'static str),

    /// A component id outside the registered range.
    #[error("component id {0} is not registered")]
    ComponentId(ComponentID),

    /// No archetype with the given id exists.
    #[error("archetype {0} does not exist")]
    Archetype(ArchetypeID),
}

/// Returned when supplied components do not match a table's signature.
///
/// ### Fields
/// * `archetype` — table whose signature was checked.
/// * `missing` — names of signature components the caller did not supply
///   (or, for typed access, requested components the table lacks).
/// * `unexpected` — names of supplied components outside the signature.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signature mismatch on archetype {archetype}: missing {missing:?}, unexpected {unexpected:?}")]
pub struct SignatureMismatchError {
    /// Table whose signature was checked.
    pub archetype: ArchetypeID,

    /// Components required but absent.
    pub missing: Vec<&'static str>,

    /// Components supplied but not part of the signature.
    pub unexpected: Vec<&'static str>,
}

/// Returned when storage cannot grow to satisfy a request.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("capacity exhausted in {what} ({requested} requested; capacity {capacity})")]
pub struct CapacityError {
    /// Which container failed to grow.
    pub what: &'static str,

    /// Total slots the operation attempted to hold.
    pub requested: usize,

    /// Capacity in place when the request failed.
    pub capacity: usize,
}

/// Why a query's declared access is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidAccessReason {
    /// The same component was requested both shared and exclusively.
    ReadAndWrite,
    /// The same component was requested exclusively twice.
    DuplicateWrite,
}

/// Returned when a query declares conflicting access to one component.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid query access to component {component_id}: {reason:?}")]
pub struct InvalidAccessError {
    /// Component named twice.
    pub component_id: ComponentID,

    /// Kind of conflict.
    pub reason: InvalidAccessReason,
}

/// Returned when configuration fails to parse or validate.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// TOML text could not be deserialized.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A field holds an unusable value.
    #[error("invalid configuration field `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Human-readable constraint.
        reason: &'static str,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Aggregate error for every engine operation.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ECSError {
    /// Unknown entity, placeholder, resource or component.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// Supplied or requested components do not match a table.
    #[error(transparent)]
    SignatureMismatch(#[from] SignatureMismatchError),

    /// Storage growth failed.
    #[error(transparent)]
    CapacityExhausted(#[from] CapacityError),

    /// A query declared conflicting access.
    #[error(transparent)]
    InvalidQueryAccess(#[from] InvalidAccessError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Directory and table storage have diverged.
    #[error("ECS invariant violation: {0}")]
    InvariantViolation(String),
}

impl ECSError {
    /// Returns `true` if the error means storage can no longer be trusted.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ECSError::InvariantViolation(_))
    }

    /// Returns `true` for any `NotFound` condition.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ECSError::NotFound(_))
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        ECSError::InvariantViolation(message.into())
    }
}

//! Error types for entity management, storage, queries, and systems.
//!
//! This module declares focused, composable error types used across the
//! runtime. Each error carries enough context to make failures actionable
//! while remaining small and cheap to pass around or convert into the
//! top-level [`EcsError`].
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (e.g.
//!   cross-world handle use, duplicate component addition, missing singleton).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`], and provide `From<T>` conversions into [`EcsError`].
//! * **Actionability:** Structured fields (component names, offending
//!   indices, expected vs. actual worlds) make logs useful without
//!   reproducing the issue.
//!
//! ## Typical flow
//! Low-level storage and archetype operations return small, dedicated error
//! types. Higher-level orchestration code uses `?` to bubble failures into
//! [`EcsError`], which callers can match on for control flow or log with
//! user-readable messages.
//!
//! All failures are synchronous and final; no operation in this crate
//! retries internally.
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is optimized for operator logs (short, imperative
//!   phrasing).
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::any::TypeId;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::types::{Entity, WorldId};


/// Convenience alias for results produced by this crate.
pub type EcsResult<T> = Result<T, EcsError>;

/// Returned when an entity handle from one world is passed to another.
///
/// Handles embed the identifier of their creating world, so the mismatch is
/// detected before any storage is touched.
///
/// ### Fields
/// * `expected` — The world servicing the request.
/// * `actual` — The world encoded in the offending handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossWorldError {
    /// World servicing the request.
    pub expected: WorldId,

    /// World the entity handle belongs to.
    pub actual: WorldId,
}

impl fmt::Display for CrossWorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entity belongs to world {} but was used in world {}",
            self.actual, self.expected
        )
    }
}

impl std::error::Error for CrossWorldError {}

/// Returned when a row index addresses storage outside valid bounds.
///
/// ### Fields
/// * `index` — The row index that was requested.
/// * `length` — The number of valid rows at the time of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutOfBoundsError {
    /// Offending row index.
    pub index: usize,

    /// Number of valid rows.
    pub length: usize,
}

impl fmt::Display for IndexOutOfBoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row index {} out of bounds (length {})",
            self.index, self.length
        )
    }
}

impl std::error::Error for IndexOutOfBoundsError {}

/// Returned when an attribute write targets a column whose element type does
/// not match the provided value's type.
///
/// This is a logic error surfaced by storage when a type-erased value fails
/// to downcast to the column's element type.
///
/// ### Fields
/// * `expected` — The [`TypeId`] that the destination column declares.
/// * `actual` — The [`TypeId`] of the value provided by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatchError {
    /// Destination column's declared element type.
    pub expected: TypeId,

    /// Provided value's dynamic type.
    pub actual: TypeId,
}

impl fmt::Display for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type mismatch: expected {:?}, actual {:?}", self.expected, self.actual)
    }
}

impl std::error::Error for TypeMismatchError {}

/// Top-level error for all runtime operations.
///
/// This aggregates the failure modes encountered while creating entities,
/// mutating their component sets, resolving queries, and running systems. It
/// intentionally preserves underlying structured errors to keep diagnostics
/// actionable.
///
/// `From<T>` conversions allow `?` from low-level operations, so internal
/// code can return focused errors while public APIs present a single type.
#[derive(Debug)]
pub enum EcsError {
    /// The entity is not present in the storage it was looked up in.
    UnknownEntity(Entity),

    /// The entity has no ownership record; it was never created here or has
    /// already been destroyed.
    NotCreated(Entity),

    /// An entity handle from a different world was used.
    CrossWorld(CrossWorldError),

    /// A component was added to an entity that already has it.
    DuplicateComponent {
        /// Human-readable component type name.
        name: &'static str,
    },

    /// An operation required a component the entity does not have.
    ComponentNotFound {
        /// Human-readable component type name.
        name: &'static str,
    },

    /// A declared component value was absent during entity construction or
    /// migration.
    MissingComponent {
        /// Human-readable component type name.
        name: &'static str,
    },

    /// A singleton lookup matched more than one live entity.
    MultipleSingletons {
        /// Number of entities that matched.
        found: usize,
    },

    /// A singleton lookup matched no live entity.
    NoEntityFound,

    /// A row index addressed storage outside valid bounds.
    IndexOutOfBounds(IndexOutOfBoundsError),

    /// A type-erased component value did not match its destination column.
    TypeMismatch(TypeMismatchError),

    /// A requested shared resource has not been created.
    ResourceMissing {
        /// Human-readable resource type name.
        name: &'static str,
    },

    /// A requested system type is not registered in the world.
    SystemNotFound {
        /// Human-readable system type name.
        name: &'static str,
    },

    /// An internal invariant was violated.
    ///
    /// This covers poisoned locks and storage states that should be
    /// unreachable; it is not recoverable by the caller.
    Internal(&'static str),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::UnknownEntity(entity) => {
                write!(f, "entity {} not found in archetype storage", entity)
            }
            EcsError::NotCreated(entity) => {
                write!(f, "entity {} was never created or has been destroyed", entity)
            }
            EcsError::CrossWorld(e) => write!(f, "{e}"),
            EcsError::DuplicateComponent { name } => {
                write!(f, "component {} is already attached", name)
            }
            EcsError::ComponentNotFound { name } => {
                write!(f, "component {} is not attached", name)
            }
            EcsError::MissingComponent { name } => {
                write!(f, "missing component value: {}", name)
            }
            EcsError::MultipleSingletons { found } => {
                write!(f, "singleton query matched {} entities", found)
            }
            EcsError::NoEntityFound => f.write_str("no entity matched the query"),
            EcsError::IndexOutOfBounds(e) => write!(f, "{e}"),
            EcsError::TypeMismatch(e) => write!(f, "{e}"),
            EcsError::ResourceMissing { name } => {
                write!(f, "resource {} has not been created", name)
            }
            EcsError::SystemNotFound { name } => {
                write!(f, "system {} is not registered", name)
            }
            EcsError::Internal(what) => write!(f, "internal invariant violated: {}", what),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<CrossWorldError> for EcsError {
    fn from(e: CrossWorldError) -> Self { EcsError::CrossWorld(e) }
}

impl From<IndexOutOfBoundsError> for EcsError {
    fn from(e: IndexOutOfBoundsError) -> Self { EcsError::IndexOutOfBounds(e) }
}

impl From<TypeMismatchError> for EcsError {
    fn from(e: TypeMismatchError) -> Self { EcsError::TypeMismatch(e) }
}

/// Acquires a read guard, mapping lock poisoning to an internal error.
#[inline]
pub(crate) fn read_guard<T>(lock: &RwLock<T>) -> EcsResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| EcsError::Internal("poisoned read lock"))
}

/// Acquires a write guard, mapping lock poisoning to an internal error.
#[inline]
pub(crate) fn write_guard<T>(lock: &RwLock<T>) -> EcsResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| EcsError::Internal("poisoned write lock"))
}

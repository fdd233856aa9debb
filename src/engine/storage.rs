//! Columnar Component Storage
//!
//! One [`Column`] holds the values of a single component type for every
//! entity in one archetype, stored densely in a `Vec`. Row `i` of every
//! column in an archetype belongs to the same entity, so structural
//! operations (push, swap, swap-remove) are mirrored across all columns by
//! the owning [`Archetype`](crate::engine::archetype::Archetype).
//!
//! ## Type erasure
//!
//! Archetypes store columns behind the [`ColumnStorage`] trait so they can
//! hold arbitrary component mixes. Values cross the erased boundary as
//! [`BoxedValue`]s and are downcast at the column edge; a failed downcast is
//! reported as a [`TypeMismatchError`] rather than a panic. Hot read paths
//! recover the concrete [`Column<T>`] once per archetype via `as_any` and
//! index it directly.
//!
//! ## Change tracking
//!
//! Every column carries the [`Tick`] of its most recent mutation. In-place
//! writes and value overwrites advance it; structural mirroring (swaps
//! driven by the enabled partition) does not, because the set of values is
//! unchanged. Query streams compare this tick against a caller watermark to
//! skip untouched columns.

use std::any::{Any, TypeId};

use crate::engine::component::Component;
use crate::engine::error::{EcsResult, IndexOutOfBoundsError, TypeMismatchError};
use crate::engine::types::{BoxedValue, Tick};


/// Type-erased interface over a single component column.
pub trait ColumnStorage: Send + Sync {
    /// Number of rows stored.
    fn len(&self) -> usize;

    /// Returns `true` if the column has no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value to the end of the column.
    fn push(&mut self, value: BoxedValue, tick: Tick) -> EcsResult<()>;

    /// Overwrites the value at `index` in place.
    fn set(&mut self, index: usize, value: BoxedValue, tick: Tick) -> EcsResult<()>;

    /// Swaps the values at rows `a` and `b`.
    fn swap(&mut self, a: usize, b: usize) -> EcsResult<()>;

    /// Removes the value at `index` by swapping in the last row, returning
    /// the removed value.
    fn take_swap(&mut self, index: usize) -> EcsResult<BoxedValue>;

    /// Removes and drops the value at `index` by swapping in the last row.
    fn swap_remove(&mut self, index: usize) -> EcsResult<()>;

    /// Tick of the most recent value mutation.
    fn updated_tick(&self) -> Tick;

    /// Records a value mutation at `tick`.
    fn mark_updated(&mut self, tick: Tick);

    /// [`TypeId`] of the stored element type.
    fn element_type(&self) -> TypeId;

    /// Borrows the column as [`Any`] for downcasting to [`Column<T>`].
    fn as_any(&self) -> &dyn Any;

    /// Mutably borrows the column as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Dense storage for all values of component `T` within one archetype.
pub struct Column<T: Component> {
    values: Vec<T>,
    updated: Tick,
}

impl<T: Component> Column<T> {
    /// Creates an empty column.
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            updated: 0,
        }
    }

    /// Borrows the value at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    /// Mutably borrows the value at `index`, recording the mutation at
    /// `tick`.
    #[inline]
    pub fn get_mut(&mut self, index: usize, tick: Tick) -> Option<&mut T> {
        let value = self.values.get_mut(index)?;
        self.updated = tick;
        Some(value)
    }

    /// Read-only view of all rows.
    #[inline]
    pub fn rows(&self) -> &[T] {
        &self.values
    }

    fn bounds_check(&self, index: usize) -> EcsResult<()> {
        if index >= self.values.len() {
            return Err(IndexOutOfBoundsError {
                index,
                length: self.values.len(),
            }
            .into());
        }
        Ok(())
    }

    fn downcast_value(value: BoxedValue) -> EcsResult<T> {
        value.downcast::<T>().map(|boxed| *boxed).map_err(|value| {
            TypeMismatchError {
                expected: TypeId::of::<T>(),
                actual: value.as_ref().type_id(),
            }
            .into()
        })
    }
}

impl<T: Component> Default for Column<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ColumnStorage for Column<T> {
    #[inline]
    fn len(&self) -> usize {
        self.values.len()
    }

    fn push(&mut self, value: BoxedValue, tick: Tick) -> EcsResult<()> {
        let value = Self::downcast_value(value)?;
        self.values.push(value);
        self.updated = tick;
        Ok(())
    }

    fn set(&mut self, index: usize, value: BoxedValue, tick: Tick) -> EcsResult<()> {
        self.bounds_check(index)?;
        let value = Self::downcast_value(value)?;
        self.values[index] = value;
        self.updated = tick;
        Ok(())
    }

    fn swap(&mut self, a: usize, b: usize) -> EcsResult<()> {
        self.bounds_check(a)?;
        self.bounds_check(b)?;
        self.values.swap(a, b);
        Ok(())
    }

    fn take_swap(&mut self, index: usize) -> EcsResult<BoxedValue> {
        self.bounds_check(index)?;
        Ok(Box::new(self.values.swap_remove(index)))
    }

    fn swap_remove(&mut self, index: usize) -> EcsResult<()> {
        self.bounds_check(index)?;
        self.values.swap_remove(index);
        Ok(())
    }

    #[inline]
    fn updated_tick(&self) -> Tick {
        self.updated
    }

    #[inline]
    fn mark_updated(&mut self, tick: Tick) {
        self.updated = tick;
    }

    #[inline]
    fn element_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::EcsError;

    struct Mass(f64);
    impl Component for Mass {}

    struct Label(#[allow(dead_code)] String);
    impl Component for Label {}

    #[test]
    fn push_set_and_swap_remove() {
        let mut column = Column::<Mass>::new();
        column.push(Box::new(Mass(1.0)), 1).unwrap();
        column.push(Box::new(Mass(2.0)), 1).unwrap();
        column.push(Box::new(Mass(3.0)), 1).unwrap();

        column.set(1, Box::new(Mass(20.0)), 2).unwrap();
        assert_eq!(column.updated_tick(), 2);

        column.swap_remove(0).unwrap();
        assert_eq!(column.len(), 2);
        assert_eq!(column.get(0).unwrap().0, 3.0);
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let mut column = Column::<Mass>::new();
        let err = column
            .push(Box::new(Label("oops".into())), 1)
            .unwrap_err();
        assert!(matches!(err, EcsError::TypeMismatch(_)));
    }

    #[test]
    fn take_swap_returns_the_value() {
        let mut column = Column::<Mass>::new();
        column.push(Box::new(Mass(7.0)), 1).unwrap();
        let value = column.take_swap(0).unwrap();
        let mass = value.downcast::<Mass>().unwrap();
        assert_eq!(mass.0, 7.0);
        assert!(column.is_empty());
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let mut column = Column::<Mass>::new();
        let err = column.swap_remove(3).unwrap_err();
        assert!(matches!(err, EcsError::IndexOutOfBounds(_)));
    }
}

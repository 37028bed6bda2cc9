//! Column storage and type-erased access for archetype tables.
//!
//! [`Attribute<T>`] is the column of one component kind inside one archetype
//! table: a dense `Vec<T>` plus a parallel `Vec<Tick>` holding the change
//! stamp of every row. [`TypeErasedAttribute`] is the object-safe interface
//! the table uses to drive columns of arbitrary element type from a
//! component id alone.
//!
//! # Core operations
//!
//! - **Append**: `push` writes a value and its stamp at the end.
//! - **Remove**: `swap_remove` deletes a row in `O(1)` by moving the last row
//!   into the vacated slot.
//! - **Transfer**: `move_row_dyn` swap-removes a row from one column and
//!   appends it, stamp included, to a column of the same type in another
//!   table.
//!
//! None of these preserve row order. Capacity is controlled by the owning
//! table through `try_reserve_total`; the column never decides on its own to
//! over-allocate beyond what `Vec` does for a single push.
//!
//! # Raw access
//!
//! Queries read columns through [`RawColumn`], a pointer/length triple taken
//! while the column's lock is held. The pointers stay valid until the next
//! structural change of the column, which cannot happen while any lock guard
//! on it is alive.

use std::any::{type_name, Any, TypeId};

use crate::engine::error::{CapacityError, ECSError, ECSResult};
use crate::engine::types::{RowID, Tick};


/// Untyped view of a column's buffers.
///
/// Produced under a lock; only valid while that lock is held.

#[derive(Clone, Copy, Debug)]
pub struct RawColumn {
    /// Start of the value buffer.
    pub values: *mut u8,
    /// Start of the change-stamp buffer.
    pub ticks: *mut Tick,
    /// Number of initialized rows.
    pub len: usize,
    /// `TypeId` of the element type.
    pub type_id: TypeId,
}

/// Object-safe interface over [`Attribute<T>`].
///
/// Every method that takes a row index reports an out-of-range row as an
/// invariant violation: the owning table only ever passes rows it knows to be
/// live.

pub trait TypeErasedAttribute: Any + Send + Sync {
    /// Number of rows stored.
    fn length(&self) -> usize;

    /// Rows that fit without reallocation.
    fn capacity(&self) -> usize;

    /// Grows the allocation so that at least `total` rows fit.
    fn try_reserve_total(&mut self, total: usize) -> Result<(), CapacityError>;

    /// Returns an immutable `&dyn Any` reference to this column.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable `&mut dyn Any` reference to this column.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Human-readable element type name.
    fn element_type_name(&self) -> &'static str;

    /// Appends a boxed value, which must be of the element type.
    fn push_dyn(&mut self, value: Box<dyn Any + Send>, tick: Tick) -> ECSResult<()>;

    /// Drops the value at `row`, moving the last row into its place.
    fn swap_remove_dyn(&mut self, row: RowID) -> ECSResult<()>;

    /// Moves the value at `row` to the end of `destination`, swap-removing it
    /// here. `destination` must hold the same element type.
    fn move_row_dyn(&mut self, row: RowID, destination: &mut dyn TypeErasedAttribute) -> ECSResult<()>;

    /// Change stamp of `row`.
    fn tick_at(&self, row: RowID) -> Option<Tick>;

    /// Buffer pointers for shared access.
    fn raw_parts(&self) -> RawColumn;

    /// Buffer pointers for exclusive access.
    fn raw_parts_mut(&mut self) -> RawColumn;

    /// Drops every value, keeping the allocation.
    fn clear(&mut self);
}

/// Dense column of component values with per-row change stamps.
///
/// ## Invariants
/// - `values.len() == ticks.len()`.
/// - Row `i` of `ticks` is the tick at which row `i` of `values` was last
///   written.

#[derive(Debug)]
pub struct Attribute<T> {
    values: Vec<T>,
    ticks: Vec<Tick>,
}

impl<T> Default for Attribute<T> {
    fn default() -> Self {
        Self { values: Vec::new(), ticks: Vec::new() }
    }
}

impl<T> Attribute<T> {
    /// Number of stored rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the column holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Appends a value stamped with `tick`.
    #[inline]
    pub fn push(&mut self, value: T, tick: Tick) {
        self.values.push(value);
        self.ticks.push(tick);
    }

    /// Removes `row`, returning its value and stamp; the last row takes its
    /// place.
    pub fn swap_remove(&mut self, row: RowID) -> Option<(T, Tick)> {
        if row >= self.values.len() {
            return None;
        }
        let value = self.values.swap_remove(row);
        let tick = self.ticks.swap_remove(row);
        Some((value, tick))
    }

    /// Value at `row`.
    #[inline]
    pub fn get(&self, row: RowID) -> Option<&T> {
        self.values.get(row)
    }

    /// Value at `row`, stamping it with `tick`.
    #[inline]
    pub fn get_mut(&mut self, row: RowID, tick: Tick) -> Option<&mut T> {
        let stamp = self.ticks.get_mut(row)?;
        *stamp = tick;
        self.values.get_mut(row)
    }

    /// All values in row order.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// All change stamps in row order.
    #[inline]
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    /// Iterates values in row order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    fn reserve_total(&mut self, total: usize) -> Result<(), CapacityError> {
        let capacity = self.capacity_rows();
        if total <= capacity {
            return Ok(());
        }
        let additional = total - self.values.len();
        let failed = CapacityError { what: type_name::<T>(), requested: total, capacity };
        self.values.try_reserve_exact(additional).map_err(|_| failed)?;
        self.ticks.try_reserve_exact(additional).map_err(|_| failed)?;
        Ok(())
    }

    #[inline]
    fn capacity_rows(&self) -> usize {
        self.values.capacity().min(self.ticks.capacity())
    }

    fn row_error(&self, row: RowID) -> ECSError {
        ECSError::invariant(format!(
            "row {row} out of range in column `{}` of length {}",
            type_name::<T>(),
            self.values.len()
        ))
    }
}

impl<T: 'static + Send + Sync> TypeErasedAttribute for Attribute<T> {
    fn length(&self) -> usize { self.values.len() }
    fn capacity(&self) -> usize { self.capacity_rows() }

    fn try_reserve_total(&mut self, total: usize) -> Result<(), CapacityError> {
        self.reserve_total(total)
    }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn element_type_id(&self) -> TypeId { TypeId::of::<T>() }
    fn element_type_name(&self) -> &'static str { type_name::<T>() }

    fn push_dyn(&mut self, value: Box<dyn Any + Send>, tick: Tick) -> ECSResult<()> {
        match value.downcast::<T>() {
            Ok(value) => {
                self.push(*value, tick);
                Ok(())
            }
            Err(_) => Err(ECSError::invariant(format!(
                "value pushed into column `{}` has a different type",
                type_name::<T>()
            ))),
        }
    }

    fn swap_remove_dyn(&mut self, row: RowID) -> ECSResult<()> {
        match self.swap_remove(row) {
            Some(_) => Ok(()),
            None => Err(self.row_error(row)),
        }
    }

    fn move_row_dyn(&mut self, row: RowID, destination: &mut dyn TypeErasedAttribute) -> ECSResult<()> {
        if row >= self.values.len() {
            return Err(self.row_error(row));
        }
        let Some(destination) = destination.as_any_mut().downcast_mut::<Attribute<T>>() else {
            return Err(ECSError::invariant(format!(
                "destination column for `{}` has a different type",
                type_name::<T>()
            )));
        };
        if let Some((value, tick)) = self.swap_remove(row) {
            destination.push(value, tick);
        }
        Ok(())
    }

    fn tick_at(&self, row: RowID) -> Option<Tick> {
        self.ticks.get(row).copied()
    }

    fn raw_parts(&self) -> RawColumn {
        RawColumn {
            values: self.values.as_ptr() as *mut u8,
            ticks: self.ticks.as_ptr() as *mut Tick,
            len: self.values.len(),
            type_id: TypeId::of::<T>(),
        }
    }

    fn raw_parts_mut(&mut self) -> RawColumn {
        RawColumn {
            values: self.values.as_mut_ptr() as *mut u8,
            ticks: self.ticks.as_mut_ptr(),
            len: self.values.len(),
            type_id: TypeId::of::<T>(),
        }
    }

    fn clear(&mut self) {
        self.values.clear();
        self.ticks.clear();
    }
}

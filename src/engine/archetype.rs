//! Columnar Archetype Storage with an Enabled/Disabled Partition
//!
//! An [`Archetype`] stores every entity whose component set is *exactly* the
//! archetype's [`Signature`]. Storage is columnar: one
//! [`ColumnStorage`](crate::engine::storage::ColumnStorage) per component
//! type, with row `i` of every column belonging to the same entity.
//!
//! ## Density
//!
//! Rows are kept dense at all times. Removal swaps the departing row with the
//! last row of its region and pops, so iteration never sees holes and removal
//! cost is independent of archetype size.
//!
//! ## Enabled partition
//!
//! Rows are partitioned so that every *enabled* entity occupies an index in
//! `[0, enabled_count)` and every *disabled* entity an index in
//! `[enabled_count, len)`. Toggling an entity is a single row swap across the
//! boundary plus a counter adjustment; no data is copied anywhere else.
//! Queries that iterate enabled entities simply walk the prefix.
//!
//! ## Change tracking
//!
//! Structural changes (rows entering or leaving, partition moves) stamp the
//! archetype's structural tick. In-place value writes stamp only the touched
//! column's tick. Change-filtered streams use both.
//!
//! ## Failure handling
//!
//! Row insertion validates the supplied [`Bundle`] against the signature
//! before consuming any value, and rolls back already-pushed columns if a
//! later column rejects its value. An archetype is therefore never left with
//! ragged columns.

use std::collections::HashMap;

use crate::engine::component::{component_name, new_column, Component, component_id_of};
use crate::engine::error::{EcsError, EcsResult, IndexOutOfBoundsError};
use crate::engine::storage::{Column, ColumnStorage};
use crate::engine::types::{Bundle, BoxedValue, ComponentId, Entity, Signature, Tick};


/// Dense columnar storage for one exact component set.
pub struct Archetype {
    signature: Signature,
    entities: Vec<Entity>,
    positions: HashMap<Entity, usize>,
    /// Columns sorted by component ID.
    columns: Vec<(ComponentId, Box<dyn ColumnStorage>)>,
    enabled_count: usize,
    structural_tick: Tick,
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("signature", &self.signature)
            .field("entities", &self.entities)
            .field("enabled_count", &self.enabled_count)
            .field("structural_tick", &self.structural_tick)
            .finish_non_exhaustive()
    }
}

impl Archetype {
    /// Creates an empty archetype for `signature`.
    ///
    /// ## Errors
    /// Returns [`EcsError::Internal`] if the signature names a component ID
    /// with no registered storage factory. Signatures built through
    /// [`component_id_of`](crate::engine::component::component_id_of) cannot
    /// trigger this.
    pub fn new(signature: &Signature) -> EcsResult<Self> {
        let mut columns = Vec::with_capacity(signature.len());
        for component_id in signature.iterate_over_components() {
            let column = new_column(component_id)
                .ok_or(EcsError::Internal("signature names an unregistered component"))?;
            columns.push((component_id, column));
        }

        Ok(Self {
            signature: *signature,
            entities: Vec::new(),
            positions: HashMap::new(),
            columns,
            enabled_count: 0,
            structural_tick: 0,
        })
    }

    /// The exact component set stored here.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Tick of the most recent structural change.
    #[inline]
    pub fn structural_tick(&self) -> Tick {
        self.structural_tick
    }

    /// Number of enabled entities.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.enabled_count
    }

    /// Number of entities regardless of enabled state.
    #[inline]
    pub fn entity_count_unfiltered(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entities are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns `true` if `entity` is stored here.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.positions.contains_key(&entity)
    }

    /// Returns the row index of `entity`, if stored here.
    #[inline]
    pub fn index_of(&self, entity: Entity) -> Option<usize> {
        self.positions.get(&entity).copied()
    }

    /// Returns the entity at row `index`.
    pub fn entity_at(&self, index: usize) -> EcsResult<Entity> {
        self.entities.get(index).copied().ok_or_else(|| {
            IndexOutOfBoundsError { index, length: self.entities.len() }.into()
        })
    }

    /// Returns `true` if the row at `index` is in the enabled region.
    pub fn is_enabled_at(&self, index: usize) -> EcsResult<bool> {
        if index >= self.entities.len() {
            return Err(IndexOutOfBoundsError { index, length: self.entities.len() }.into());
        }
        Ok(index < self.enabled_count)
    }

    /// All stored entities; enabled rows first.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Borrows the column for `component_id`, if present.
    #[inline]
    pub fn column(&self, component_id: ComponentId) -> Option<&dyn ColumnStorage> {
        self.columns
            .binary_search_by_key(&component_id, |(cid, _)| *cid)
            .ok()
            .map(|slot| self.columns[slot].1.as_ref())
    }

    /// Mutably borrows the column for `component_id`, if present.
    #[inline]
    pub fn column_mut(&mut self, component_id: ComponentId) -> Option<&mut dyn ColumnStorage> {
        let slot = self
            .columns
            .binary_search_by_key(&component_id, |(cid, _)| *cid)
            .ok()?;
        Some(self.columns[slot].1.as_mut())
    }

    /// Returns the slot of `component_id` in the sorted column list.
    ///
    /// Streams resolve slots once per archetype so row access is plain
    /// indexing.
    #[inline]
    pub fn column_slot(&self, component_id: ComponentId) -> Option<usize> {
        self.columns
            .binary_search_by_key(&component_id, |(cid, _)| *cid)
            .ok()
    }

    /// Borrows the typed column at `slot`.
    pub fn typed_column_at<T: Component>(&self, slot: usize) -> Option<&Column<T>> {
        self.columns
            .get(slot)?
            .1
            .as_any()
            .downcast_ref::<Column<T>>()
    }

    /// Mutably borrows the typed column at `slot`.
    pub fn typed_column_at_mut<T: Component>(&mut self, slot: usize) -> Option<&mut Column<T>> {
        self.columns
            .get_mut(slot)?
            .1
            .as_any_mut()
            .downcast_mut::<Column<T>>()
    }

    /// Borrows the typed column for component `T`, if present.
    pub fn typed_column<T: Component>(&self) -> Option<&Column<T>> {
        self.column(component_id_of::<T>())?
            .as_any()
            .downcast_ref::<Column<T>>()
    }

    /// Mutably borrows the typed column for component `T`, if present.
    pub fn typed_column_mut<T: Component>(&mut self) -> Option<&mut Column<T>> {
        self.column_mut(component_id_of::<T>())?
            .as_any_mut()
            .downcast_mut::<Column<T>>()
    }

    /// Borrows `entity`'s value of component `T`.
    ///
    /// ## Errors
    /// * [`EcsError::UnknownEntity`] if `entity` is not stored here.
    /// * [`EcsError::ComponentNotFound`] if the signature lacks `T`.
    pub fn component_ref<T: Component>(&self, entity: Entity) -> EcsResult<&T> {
        let index = self.index_of(entity).ok_or(EcsError::UnknownEntity(entity))?;
        let column = self.typed_column::<T>().ok_or(EcsError::ComponentNotFound {
            name: std::any::type_name::<T>(),
        })?;
        column
            .get(index)
            .ok_or(EcsError::Internal("entity position outside column bounds"))
    }

    /// Mutably borrows `entity`'s value of component `T`, recording the
    /// mutation at `tick`.
    ///
    /// ## Errors
    /// Same as [`component_ref`](Self::component_ref).
    pub fn component_mut<T: Component>(&mut self, entity: Entity, tick: Tick) -> EcsResult<&mut T> {
        let index = self.index_of(entity).ok_or(EcsError::UnknownEntity(entity))?;
        let column = self.typed_column_mut::<T>().ok_or(EcsError::ComponentNotFound {
            name: std::any::type_name::<T>(),
        })?;
        column
            .get_mut(index, tick)
            .ok_or(EcsError::Internal("entity position outside column bounds"))
    }

    /// Inserts `entity` with values drawn from `bundle`, returning its row.
    ///
    /// ## Behavior
    /// The bundle is validated against the signature before any value is
    /// consumed. The row lands in the enabled or disabled region according to
    /// `enabled`, and the structural tick advances to `tick`. Bundle entries
    /// not named by the signature are left untouched.
    ///
    /// ## Errors
    /// * [`EcsError::MissingComponent`] if the bundle lacks a declared
    ///   component; nothing is consumed in that case.
    /// * [`EcsError::TypeMismatch`] if a value fails to downcast; columns
    ///   pushed so far are rolled back.
    pub fn add_entity(
        &mut self,
        entity: Entity,
        bundle: &mut Bundle,
        enabled: bool,
        tick: Tick,
    ) -> EcsResult<usize> {
        if self.positions.contains_key(&entity) {
            return Err(EcsError::Internal("entity already stored in archetype"));
        }

        for (component_id, _) in &self.columns {
            if !bundle.has(*component_id) {
                return Err(EcsError::MissingComponent {
                    name: component_name(*component_id),
                });
            }
        }

        let mut pushed = 0usize;
        for (component_id, column) in &mut self.columns {
            let value = bundle
                .take(*component_id)
                .ok_or(EcsError::Internal("validated bundle lost a value"))?;
            if let Err(error) = column.push(value, tick) {
                for (_, column) in self.columns.iter_mut().take(pushed) {
                    let last = column.len().saturating_sub(1);
                    if column.swap_remove(last).is_err() {
                        return Err(EcsError::Internal("rollback failed after partial insert"));
                    }
                }
                return Err(error);
            }
            pushed += 1;
        }

        self.entities.push(entity);
        let mut index = self.entities.len() - 1;
        self.positions.insert(entity, index);

        if enabled {
            let boundary = self.enabled_count;
            self.swap_rows(boundary, index)?;
            self.enabled_count += 1;
            index = boundary;
        }

        self.structural_tick = tick;
        Ok(index)
    }

    /// Removes `entity`, dropping its component values.
    ///
    /// ## Errors
    /// [`EcsError::UnknownEntity`] if `entity` is not stored here.
    pub fn remove_entity(&mut self, entity: Entity, tick: Tick) -> EcsResult<()> {
        let last = self.detach(entity)?;
        for (_, column) in &mut self.columns {
            column.swap_remove(last)?;
        }
        self.entities.pop();
        self.positions.remove(&entity);
        self.structural_tick = tick;
        Ok(())
    }

    /// Removes `entity`, returning its enabled flag and component values.
    ///
    /// Used for migration: the returned bundle feeds the destination
    /// archetype's [`add_entity`](Self::add_entity).
    ///
    /// ## Errors
    /// [`EcsError::UnknownEntity`] if `entity` is not stored here.
    pub fn take_entity(&mut self, entity: Entity, tick: Tick) -> EcsResult<(bool, Bundle)> {
        let index = self.index_of(entity).ok_or(EcsError::UnknownEntity(entity))?;
        let was_enabled = index < self.enabled_count;

        let last = self.detach(entity)?;
        let mut bundle = Bundle::new();
        for (component_id, column) in &mut self.columns {
            let value = column.take_swap(last)?;
            bundle.insert_erased(*component_id, value);
        }
        self.entities.pop();
        self.positions.remove(&entity);
        self.structural_tick = tick;
        Ok((was_enabled, bundle))
    }

    /// Toggles the enabled state of the row at `index`.
    ///
    /// Returns `false` without touching storage when the row is already in
    /// the requested state. A real transition is one row swap across the
    /// partition boundary and stamps the structural tick.
    ///
    /// ## Errors
    /// [`EcsError::IndexOutOfBounds`] if `index` is not a valid row.
    pub fn set_enabled_state_at(
        &mut self,
        index: usize,
        enabled: bool,
        tick: Tick,
    ) -> EcsResult<bool> {
        if index >= self.entities.len() {
            return Err(IndexOutOfBoundsError { index, length: self.entities.len() }.into());
        }

        let currently_enabled = index < self.enabled_count;
        if currently_enabled == enabled {
            return Ok(false);
        }

        if enabled {
            self.swap_rows(index, self.enabled_count)?;
            self.enabled_count += 1;
        } else {
            self.swap_rows(index, self.enabled_count - 1)?;
            self.enabled_count -= 1;
        }

        self.structural_tick = tick;
        Ok(true)
    }

    /// Toggles the enabled state of `entity`.
    ///
    /// ## Errors
    /// [`EcsError::UnknownEntity`] if `entity` is not stored here.
    pub fn set_enabled_state(&mut self, entity: Entity, enabled: bool, tick: Tick) -> EcsResult<bool> {
        let index = self.index_of(entity).ok_or(EcsError::UnknownEntity(entity))?;
        self.set_enabled_state_at(index, enabled, tick)
    }

    /// Overwrites `entity`'s value for `component_id` in place.
    ///
    /// Only the column tick advances; the row does not move and the
    /// structural tick is untouched.
    ///
    /// ## Errors
    /// * [`EcsError::UnknownEntity`] if `entity` is not stored here.
    /// * [`EcsError::ComponentNotFound`] if the signature lacks the component.
    /// * [`EcsError::TypeMismatch`] if the value has the wrong type.
    pub fn set_value(
        &mut self,
        entity: Entity,
        component_id: ComponentId,
        value: BoxedValue,
        tick: Tick,
    ) -> EcsResult<()> {
        let index = self.index_of(entity).ok_or(EcsError::UnknownEntity(entity))?;
        let column = self.column_mut(component_id).ok_or(EcsError::ComponentNotFound {
            name: component_name(component_id),
        })?;
        column.set(index, value, tick)
    }

    /// Moves `entity` to the last row, routing through the partition so the
    /// enabled prefix stays intact. Returns the final (last) index.
    fn detach(&mut self, entity: Entity) -> EcsResult<usize> {
        let mut index = self.index_of(entity).ok_or(EcsError::UnknownEntity(entity))?;

        if index < self.enabled_count {
            let boundary = self.enabled_count - 1;
            self.swap_rows(index, boundary)?;
            self.enabled_count = boundary;
            index = boundary;
        }

        let last = self.entities.len() - 1;
        self.swap_rows(index, last)?;
        Ok(last)
    }

    fn swap_rows(&mut self, a: usize, b: usize) -> EcsResult<()> {
        if a == b {
            return Ok(());
        }
        for (_, column) in &mut self.columns {
            column.swap(a, b)?;
        }
        self.entities.swap(a, b);
        self.positions.insert(self.entities[a], a);
        self.positions.insert(self.entities[b], b);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::build_signature;

    struct Position(f32);
    impl Component for Position {}

    struct Velocity(#[allow(dead_code)] f32);
    impl Component for Velocity {}

    fn test_archetype() -> Archetype {
        let signature = build_signature(&[
            component_id_of::<Position>(),
            component_id_of::<Velocity>(),
        ]);
        Archetype::new(&signature).unwrap()
    }

    fn entity(serial: u64) -> Entity {
        Entity::pack(0, serial)
    }

    fn bundle(p: f32, v: f32) -> Bundle {
        let mut bundle = Bundle::new();
        bundle.insert(Position(p));
        bundle.insert(Velocity(v));
        bundle
    }

    fn assert_partition(archetype: &Archetype) {
        for index in 0..archetype.entity_count_unfiltered() {
            assert_eq!(
                archetype.is_enabled_at(index).unwrap(),
                index < archetype.entity_count(),
            );
        }
    }

    #[test]
    fn partition_holds_under_mixed_insertion() {
        let mut archetype = test_archetype();
        for serial in 0..10 {
            let enabled = serial % 2 == 0;
            archetype
                .add_entity(entity(serial), &mut bundle(serial as f32, 0.0), enabled, 1)
                .unwrap();
        }
        assert_eq!(archetype.entity_count(), 5);
        assert_eq!(archetype.entity_count_unfiltered(), 10);
        assert_partition(&archetype);
    }

    #[test]
    fn toggling_moves_rows_across_the_boundary() {
        let mut archetype = test_archetype();
        for serial in 0..4 {
            archetype
                .add_entity(entity(serial), &mut bundle(0.0, 0.0), true, 1)
                .unwrap();
        }

        assert!(archetype.set_enabled_state(entity(2), false, 2).unwrap());
        assert_eq!(archetype.entity_count(), 3);
        assert_partition(&archetype);

        // Already disabled; storage untouched.
        assert!(!archetype.set_enabled_state(entity(2), false, 3).unwrap());
        assert_eq!(archetype.structural_tick(), 2);

        assert!(archetype.set_enabled_state(entity(2), true, 4).unwrap());
        assert_eq!(archetype.entity_count(), 4);
        assert_partition(&archetype);
    }

    #[test]
    fn removal_keeps_columns_dense_and_aligned() {
        let mut archetype = test_archetype();
        for serial in 0..6 {
            let enabled = serial < 3;
            archetype
                .add_entity(entity(serial), &mut bundle(serial as f32, 0.0), enabled, 1)
                .unwrap();
        }

        archetype.remove_entity(entity(1), 2).unwrap();
        archetype.remove_entity(entity(4), 2).unwrap();

        assert_eq!(archetype.entity_count_unfiltered(), 4);
        assert_partition(&archetype);
        for &survivor in archetype.entities() {
            let value = archetype.component_ref::<Position>(survivor).unwrap();
            assert_eq!(value.0, survivor.serial() as f32);
        }
    }

    #[test]
    fn incomplete_bundle_is_rejected_before_consumption() {
        let mut archetype = test_archetype();
        let mut partial = Bundle::new();
        partial.insert(Position(1.0));

        let err = archetype
            .add_entity(entity(0), &mut partial, true, 1)
            .unwrap_err();
        assert!(matches!(err, EcsError::MissingComponent { .. }));
        assert!(partial.has(component_id_of::<Position>()));
        assert!(archetype.is_empty());
    }

    #[test]
    fn take_entity_reports_enabled_flag_and_values() {
        let mut archetype = test_archetype();
        archetype
            .add_entity(entity(0), &mut bundle(9.0, 1.0), false, 1)
            .unwrap();

        let (enabled, mut taken) = archetype.take_entity(entity(0), 2).unwrap();
        assert!(!enabled);
        let value = taken
            .take(component_id_of::<Position>())
            .unwrap()
            .downcast::<Position>()
            .unwrap();
        assert_eq!(value.0, 9.0);
        assert!(archetype.is_empty());
    }
}

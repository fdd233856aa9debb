//! Entity Ownership Index
//!
//! Archetype storage answers "which entities have this component set"; the
//! [`OwnershipIndex`] answers the inverse question, "where does this entity
//! live". It is an explicit side table from [`Entity`] to the entity's
//! current archetype, plus the creation metadata that has no archetype home
//! (the debug label).
//!
//! Records hold the archetype **weakly**. Liveness is decided by the
//! archetype registry alone: a record can never keep an empty archetype from
//! being pruned, and an upgrade failure inside a live record is an internal
//! invariant violation (the registry only prunes archetypes that store no
//! entities).
//!
//! Every lookup verifies the handle's world, so cross-world use surfaces as
//! [`CrossWorldError`](crate::engine::error::CrossWorldError) before any
//! storage is touched.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::engine::archetype::Archetype;
use crate::engine::error::{read_guard, write_guard, CrossWorldError, EcsError, EcsResult};
use crate::engine::registry::ArchetypeRef;
use crate::engine::types::{Entity, WorldId};


/// Where one entity currently lives.
struct OwnerRecord {
    archetype: Weak<RwLock<Archetype>>,
    label: Option<String>,
}

/// Side table mapping entities to their current archetype.
pub struct OwnershipIndex {
    world: WorldId,
    records: RwLock<HashMap<Entity, OwnerRecord>>,
}

impl OwnershipIndex {
    /// Creates an empty index for `world`.
    pub fn new(world: WorldId) -> Self {
        Self {
            world,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Rejects handles created by a different world.
    fn check_world(&self, entity: Entity) -> EcsResult<()> {
        if entity.world() != self.world {
            return Err(CrossWorldError {
                expected: self.world,
                actual: entity.world(),
            }
            .into());
        }
        Ok(())
    }

    /// Inserts a fresh record binding `entity` to `archetype`.
    pub fn insert(
        &self,
        entity: Entity,
        archetype: &ArchetypeRef,
        label: Option<String>,
    ) -> EcsResult<()> {
        self.check_world(entity)?;
        let mut records = write_guard(&self.records)?;
        records.insert(
            entity,
            OwnerRecord {
                archetype: Arc::downgrade(archetype),
                label,
            },
        );
        Ok(())
    }

    /// Rebinds `entity` to a new archetype after migration.
    ///
    /// ## Errors
    /// [`EcsError::NotCreated`] if no record exists.
    pub fn bind(&self, entity: Entity, archetype: &ArchetypeRef) -> EcsResult<()> {
        self.check_world(entity)?;
        let mut records = write_guard(&self.records)?;
        let record = records
            .get_mut(&entity)
            .ok_or(EcsError::NotCreated(entity))?;
        record.archetype = Arc::downgrade(archetype);
        Ok(())
    }

    /// Returns the archetype of `entity`, or `None` if it was never created
    /// or has been destroyed.
    ///
    /// ## Errors
    /// [`EcsError::CrossWorld`] for handles from another world.
    pub fn get_owner(&self, entity: Entity) -> EcsResult<Option<ArchetypeRef>> {
        self.check_world(entity)?;
        let records = read_guard(&self.records)?;
        match records.get(&entity) {
            None => Ok(None),
            Some(record) => record
                .archetype
                .upgrade()
                .map(Some)
                .ok_or(EcsError::Internal("owned archetype was collected")),
        }
    }

    /// Returns the archetype of `entity`.
    ///
    /// ## Errors
    /// * [`EcsError::CrossWorld`] for handles from another world.
    /// * [`EcsError::NotCreated`] if no record exists.
    pub fn require_owner(&self, entity: Entity) -> EcsResult<ArchetypeRef> {
        self.get_owner(entity)?.ok_or(EcsError::NotCreated(entity))
    }

    /// Returns `true` if a record exists for `entity`.
    pub fn contains(&self, entity: Entity) -> EcsResult<bool> {
        self.check_world(entity)?;
        Ok(read_guard(&self.records)?.contains_key(&entity))
    }

    /// Returns the debug label recorded at creation, if any.
    pub fn label(&self, entity: Entity) -> EcsResult<Option<String>> {
        self.check_world(entity)?;
        let records = read_guard(&self.records)?;
        Ok(records.get(&entity).and_then(|record| record.label.clone()))
    }

    /// Removes the record for `entity`, returning `true` if one existed.
    pub fn remove(&self, entity: Entity) -> EcsResult<bool> {
        self.check_world(entity)?;
        Ok(write_guard(&self.records)?.remove(&entity).is_some())
    }

    /// Number of live entities.
    pub fn len(&self) -> EcsResult<usize> {
        Ok(read_guard(&self.records)?.len())
    }

    /// Returns `true` if no entities are recorded.
    pub fn is_empty(&self) -> EcsResult<bool> {
        Ok(read_guard(&self.records)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{build_signature, Entity};

    fn empty_archetype() -> ArchetypeRef {
        Arc::new(RwLock::new(
            Archetype::new(&build_signature(&[])).unwrap(),
        ))
    }

    #[test]
    fn foreign_world_handles_are_rejected() {
        let index = OwnershipIndex::new(3);
        let foreign = Entity::pack(9, 1);
        let err = index.get_owner(foreign).unwrap_err();
        assert!(matches!(err, EcsError::CrossWorld(_)));
    }

    #[test]
    fn records_follow_rebinding_and_removal() {
        let index = OwnershipIndex::new(0);
        let entity = Entity::pack(0, 1);
        let first = empty_archetype();
        let second = empty_archetype();

        index.insert(entity, &first, Some("probe".into())).unwrap();
        assert!(Arc::ptr_eq(&index.require_owner(entity).unwrap(), &first));
        assert_eq!(index.label(entity).unwrap().as_deref(), Some("probe"));

        index.bind(entity, &second).unwrap();
        assert!(Arc::ptr_eq(&index.require_owner(entity).unwrap(), &second));

        assert!(index.remove(entity).unwrap());
        assert!(matches!(
            index.require_owner(entity).unwrap_err(),
            EcsError::NotCreated(_)
        ));
    }
}

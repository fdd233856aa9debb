//! Entity Manager and Shared World State
//!
//! [`WorldState`] bundles everything a world's subsystems share: the
//! archetype registry, the ownership index, the change-tick counter, and the
//! entity serial allocator. It is reference-counted so managers, command
//! buffers, and queries can coexist without lifetimes threading through user
//! code.
//!
//! [`EntityManager`] is the **immediate** mutation surface. Every call takes
//! effect before it returns; the deferred counterpart is the
//! [`CommandBuffer`](crate::engine::commands::CommandBuffer), which replays
//! through the same internals at flush time.
//!
//! ## Migration
//!
//! Adding or removing components moves an entity between archetypes. The
//! algorithm is uniform for every structural change:
//!
//! 1. capture the entity's enabled flag and take its row from the source,
//! 2. merge added values into the taken bundle,
//! 3. insert the bundle into the destination archetype,
//! 4. rebind the ownership record.
//!
//! Attachment cascades are flattened before step 1, so a single
//! `add_component` call performs exactly one migration regardless of how many
//! self-targeted companions the component's `on_attach` hook produces. An
//! intermediate archetype for the partial set is never created.
//!
//! ## Locking
//!
//! Source and destination archetype locks are taken strictly one at a time;
//! the registry lock is never held across either. Lock poisoning surfaces as
//! [`EcsError::Internal`].

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::component::{component_id_of, Component};
use crate::engine::error::{read_guard, write_guard, EcsError, EcsResult};
use crate::engine::ownership::OwnershipIndex;
use crate::engine::query::{Query, QueryBuilder};
use crate::engine::registry::ArchetypeRegistry;
use crate::engine::types::{BoxedValue, Bundle, ComponentId, Entity, Signature, Tick, WorldId};


static NEXT_WORLD: AtomicU16 = AtomicU16::new(0);

/// State shared by every subsystem of one world.
pub struct WorldState {
    world_id: WorldId,
    registry: ArchetypeRegistry,
    ownership: OwnershipIndex,
    change_tick: AtomicU64,
    next_serial: AtomicU64,
}

impl WorldState {
    /// Allocates state for a fresh world with a process-unique identifier.
    pub fn new() -> Arc<Self> {
        let world_id = NEXT_WORLD.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            world_id,
            registry: ArchetypeRegistry::new(),
            ownership: OwnershipIndex::new(world_id),
            change_tick: AtomicU64::new(1),
            next_serial: AtomicU64::new(1),
        })
    }

    /// Identifier of this world.
    #[inline]
    pub fn world_id(&self) -> WorldId {
        self.world_id
    }

    /// The archetype registry of this world.
    #[inline]
    pub fn registry(&self) -> &ArchetypeRegistry {
        &self.registry
    }

    /// The ownership index of this world.
    #[inline]
    pub fn ownership(&self) -> &OwnershipIndex {
        &self.ownership
    }

    /// Current change tick.
    #[inline]
    pub fn current_tick(&self) -> Tick {
        self.change_tick.load(Ordering::Acquire)
    }

    /// Advances the change tick by one accepted world update.
    #[inline]
    pub(crate) fn advance_tick(&self) -> Tick {
        self.change_tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn next_entity(&self) -> Entity {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        Entity::pack(self.world_id, serial)
    }
}

/// Immediate entity and component mutation API for one world.
#[derive(Clone)]
pub struct EntityManager {
    state: Arc<WorldState>,
}

impl EntityManager {
    /// Creates a manager over `state`.
    pub fn new(state: Arc<WorldState>) -> Self {
        Self { state }
    }

    /// Shared world state backing this manager.
    #[inline]
    pub fn state(&self) -> &Arc<WorldState> {
        &self.state
    }

    /// Starts building a query against this world.
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new(self.state.clone())
    }

    /// Creates an empty, enabled entity.
    pub fn create_entity(&self) -> EcsResult<Entity> {
        self.create_entity_inner(None)
    }

    /// Creates an empty, enabled entity with a debug label.
    pub fn create_entity_named(&self, label: &str) -> EcsResult<Entity> {
        self.create_entity_inner(Some(label.to_owned()))
    }

    fn create_entity_inner(&self, label: Option<String>) -> EcsResult<Entity> {
        let entity = self.state.next_entity();
        self.realize_entity(entity, label)?;
        Ok(entity)
    }

    /// Reserves an entity handle without placing it in storage.
    ///
    /// Used by command buffers: the handle is immediately valid as a value
    /// but resolves to nothing until [`realize_entity`](Self::realize_entity)
    /// runs at flush time.
    pub(crate) fn reserve_entity(&self) -> Entity {
        self.state.next_entity()
    }

    /// Places a reserved entity into the empty archetype.
    pub(crate) fn realize_entity(&self, entity: Entity, label: Option<String>) -> EcsResult<()> {
        let tick = self.state.current_tick();
        let archetype = self.state.registry.get_or_create(&Signature::default())?;
        {
            let mut guard = write_guard(&archetype)?;
            guard.add_entity(entity, &mut Bundle::new(), true, tick)?;
        }
        self.state.ownership.insert(entity, &archetype, label)
    }

    /// Returns `true` if `entity` is live in this world.
    pub fn exists(&self, entity: Entity) -> EcsResult<bool> {
        self.state.ownership.contains(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> EcsResult<usize> {
        self.state.ownership.len()
    }

    /// Returns the debug label recorded at creation, if any.
    pub fn label(&self, entity: Entity) -> EcsResult<Option<String>> {
        self.state.ownership.label(entity)
    }

    /// Attaches `value` to `entity`, migrating it to the wider archetype.
    ///
    /// The component's `on_attach` hook runs first; self-targeted companion
    /// components join the same migration, companions for other entities are
    /// attached immediately afterwards. Companions whose type is already
    /// present on their target are dropped silently.
    ///
    /// ## Errors
    /// * [`EcsError::DuplicateComponent`] if `entity` already has `T`.
    /// * [`EcsError::NotCreated`] / [`EcsError::CrossWorld`] for bad handles.
    pub fn add_component<T: Component>(&self, entity: Entity, mut value: T) -> EcsResult<()> {
        let component_id = component_id_of::<T>();

        {
            let owner = self.state.ownership.require_owner(entity)?;
            let guard = read_guard(&owner)?;
            if guard.signature().has(component_id) {
                return Err(EcsError::DuplicateComponent {
                    name: std::any::type_name::<T>(),
                });
            }
        }

        let effects = value.on_attach(entity);

        let mut self_additions: Vec<(ComponentId, BoxedValue)> =
            vec![(component_id, Box::new(value))];
        let mut remote_additions: Vec<(Entity, ComponentId, BoxedValue)> = Vec::new();

        for (target, cid, boxed) in effects.into_additions() {
            if target == entity {
                self_additions.push((cid, boxed));
            } else {
                remote_additions.push((target, cid, boxed));
            }
        }

        self.restructure(entity, self_additions, &[])?;

        for (target, cid, boxed) in remote_additions {
            self.restructure(target, vec![(cid, boxed)], &[])?;
        }

        Ok(())
    }

    /// Detaches component `T` from `entity`.
    ///
    /// A no-op when the component is absent. An entity whose last component
    /// is removed stays live in the empty archetype.
    pub fn remove_component<T: Component>(&self, entity: Entity) -> EcsResult<()> {
        let component_id = component_id_of::<T>();

        {
            let owner = self.state.ownership.require_owner(entity)?;
            let guard = read_guard(&owner)?;
            if !guard.signature().has(component_id) {
                return Ok(());
            }
        }

        self.restructure(entity, Vec::new(), &[component_id])
    }

    /// Overwrites `entity`'s existing value of component `T` in place.
    ///
    /// ## Errors
    /// [`EcsError::ComponentNotFound`] if `entity` does not have `T`; an
    /// overwrite never implies an attachment.
    pub fn set_component<T: Component>(&self, entity: Entity, value: T) -> EcsResult<()> {
        let owner = self.state.ownership.require_owner(entity)?;
        let tick = self.state.current_tick();
        let mut guard = write_guard(&owner)?;
        guard.set_value(entity, component_id_of::<T>(), Box::new(value), tick)
    }

    /// Type-erased in-place overwrite used by command playback.
    pub(crate) fn set_value_erased(
        &self,
        entity: Entity,
        component_id: ComponentId,
        value: BoxedValue,
    ) -> EcsResult<()> {
        let owner = self.state.ownership.require_owner(entity)?;
        let tick = self.state.current_tick();
        let mut guard = write_guard(&owner)?;
        guard.set_value(entity, component_id, value, tick)
    }

    /// Returns `true` if `entity` currently has component `T`.
    pub fn has_component<T: Component>(&self, entity: Entity) -> EcsResult<bool> {
        let owner = self.state.ownership.require_owner(entity)?;
        let guard = read_guard(&owner)?;
        Ok(guard.signature().has(component_id_of::<T>()))
    }

    /// Returns a clone of `entity`'s value of component `T`.
    pub fn get_component<T: Component + Clone>(&self, entity: Entity) -> EcsResult<T> {
        self.read_component(entity, |value: &T| value.clone())
    }

    /// Runs `f` against a shared borrow of `entity`'s component `T`.
    pub fn read_component<T: Component, R>(
        &self,
        entity: Entity,
        f: impl FnOnce(&T) -> R,
    ) -> EcsResult<R> {
        let owner = self.state.ownership.require_owner(entity)?;
        let guard = read_guard(&owner)?;
        Ok(f(guard.component_ref::<T>(entity)?))
    }

    /// Runs `f` against an exclusive borrow of `entity`'s component `T`,
    /// recording the mutation on the component's column.
    pub fn write_component<T: Component, R>(
        &self,
        entity: Entity,
        f: impl FnOnce(&mut T) -> R,
    ) -> EcsResult<R> {
        let owner = self.state.ownership.require_owner(entity)?;
        let tick = self.state.current_tick();
        let mut guard = write_guard(&owner)?;
        Ok(f(guard.component_mut::<T>(entity, tick)?))
    }

    /// Returns `true` if `entity` is in its archetype's enabled region.
    pub fn is_enabled(&self, entity: Entity) -> EcsResult<bool> {
        let owner = self.state.ownership.require_owner(entity)?;
        let guard = read_guard(&owner)?;
        let index = guard
            .index_of(entity)
            .ok_or(EcsError::UnknownEntity(entity))?;
        guard.is_enabled_at(index)
    }

    /// Toggles `entity`'s enabled state; returns `true` if it changed.
    pub fn set_enabled_state(&self, entity: Entity, enabled: bool) -> EcsResult<bool> {
        let owner = self.state.ownership.require_owner(entity)?;
        let tick = self.state.current_tick();
        let mut guard = write_guard(&owner)?;
        guard.set_enabled_state(entity, enabled, tick)
    }

    /// Destroys `entity`, dropping all its component values.
    pub fn destroy_entity(&self, entity: Entity) -> EcsResult<()> {
        let owner = self.state.ownership.require_owner(entity)?;
        let tick = self.state.current_tick();
        {
            let mut guard = write_guard(&owner)?;
            guard.remove_entity(entity, tick)?;
        }
        self.state.ownership.remove(entity)?;
        Ok(())
    }

    /// Destroys every entity currently matched by `query`, enabled or not.
    pub fn destroy_query(&self, query: &Query) -> EcsResult<()> {
        for entity in query.entities_unfiltered()? {
            self.destroy_entity(entity)?;
        }
        Ok(())
    }

    /// Moves `entity` to the archetype produced by applying `additions` and
    /// `removals` to its current component set. One migration, regardless of
    /// how many components change.
    ///
    /// Additions whose component is already present are dropped; removals of
    /// absent components are ignored. When the resulting set equals the
    /// current one, storage is untouched.
    pub(crate) fn restructure(
        &self,
        entity: Entity,
        additions: Vec<(ComponentId, BoxedValue)>,
        removals: &[ComponentId],
    ) -> EcsResult<()> {
        let owner = self.state.ownership.require_owner(entity)?;
        let tick = self.state.current_tick();

        let source_signature = *read_guard(&owner)?.signature();
        let mut target_signature = source_signature;
        for &component_id in removals {
            target_signature.clear(component_id);
        }

        let mut kept: Vec<(ComponentId, BoxedValue)> = Vec::with_capacity(additions.len());
        for (component_id, value) in additions {
            if target_signature.has(component_id) {
                continue;
            }
            target_signature.set(component_id);
            kept.push((component_id, value));
        }

        if target_signature == source_signature {
            return Ok(());
        }

        let target = self.state.registry.get_or_create(&target_signature)?;

        let (enabled, mut bundle) = {
            let mut guard = write_guard(&owner)?;
            guard.take_entity(entity, tick)?
        };
        for (component_id, value) in kept {
            bundle.insert_erased(component_id, value);
        }

        let inserted = {
            let mut guard = write_guard(&target)?;
            guard.add_entity(entity, &mut bundle, enabled, tick)
        };
        if let Err(error) = inserted {
            // Put the row back where it came from before reporting.
            let mut guard = write_guard(&owner)?;
            guard
                .add_entity(entity, &mut bundle, enabled, tick)
                .map_err(|_| EcsError::Internal("migration rollback failed"))?;
            return Err(error);
        }

        self.state.ownership.bind(entity, &target)
    }
}

//! Deferred Mutation Log and End-of-Frame Playback
//!
//! A [`CommandBuffer`] records structural intent while systems iterate and
//! replays it later through the same entity-manager internals. Recording
//! never touches archetype storage, so it is always safe mid-iteration.
//!
//! ## Handles are real
//!
//! [`CommandBuffer::create_entity`] reserves a genuine entity handle
//! immediately; the entity materializes in storage at flush time. Edits
//! recorded against the handle before the flush resolve correctly because
//! creations replay first.
//!
//! ## Playback order
//!
//! [`flush`](CommandBuffer::flush) applies phases in a fixed order:
//!
//! 1. **Creations** place reserved entities into the empty archetype.
//! 2. **Per-entity merges** collapse all component edits recorded for one
//!    entity into a *single* archetype migration. The conflict rules:
//!    an `add` for a component the entity already has is dropped; an
//!    explicit `set` always wins over a dropped `add`; a `set` for a
//!    component that is neither present nor pending attaches it; a `remove`
//!    cancels a pending `add` of the same component. Enabled-state changes
//!    apply after the entity's move, last write wins. Entities destroyed
//!    later in the same buffer are skipped entirely.
//! 3. **Query-wide enabled changes** toggle every entity of every matching
//!    archetype.
//! 4. **Destroys**, individual then query-wide. A destroy of an already-dead
//!    entity is a no-op at this stage.
//! 5. The buffer is left empty.
//!
//! ## Attachment hooks
//!
//! `on_attach` cascades expand at **record** time, mirroring the immediate
//! path: by the time the buffer flushes, companion components are ordinary
//! queued additions and each affected entity still moves archetype once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::engine::component::{component_id_of, Component};
use crate::engine::error::{read_guard, write_guard, EcsError, EcsResult};
use crate::engine::manager::EntityManager;
use crate::engine::query::Query;
use crate::engine::systems::System;
use crate::engine::types::{BoxedValue, ComponentId, Entity, Priority, Signature};
use crate::engine::world::World;


enum Edit {
    Add { component_id: ComponentId, value: BoxedValue },
    Set { component_id: ComponentId, value: BoxedValue },
    Remove { component_id: ComponentId },
    SetEnabled { enabled: bool },
}

struct PendingCreate {
    entity: Entity,
    label: Option<String>,
}

#[derive(Default)]
struct BufferInner {
    creations: Vec<PendingCreate>,
    edits: Vec<(Entity, Edit)>,
    query_enabled: Vec<(Query, bool)>,
    destroys: Vec<Entity>,
    query_destroys: Vec<Query>,
}

impl BufferInner {
    fn len(&self) -> usize {
        self.creations.len()
            + self.edits.len()
            + self.query_enabled.len()
            + self.destroys.len()
            + self.query_destroys.len()
    }
}

/// Deferred, replayable mutation log for one world.
pub struct CommandBuffer {
    manager: EntityManager,
    inner: Mutex<BufferInner>,
}

impl CommandBuffer {
    /// Creates an empty buffer replaying through `manager`.
    pub fn new(manager: EntityManager) -> Self {
        Self {
            manager,
            inner: Mutex::new(BufferInner::default()),
        }
    }

    fn lock(&self) -> EcsResult<std::sync::MutexGuard<'_, BufferInner>> {
        self.inner
            .lock()
            .map_err(|_| EcsError::Internal("poisoned command buffer"))
    }

    /// Number of recorded commands.
    pub fn len(&self) -> EcsResult<usize> {
        Ok(self.lock()?.len())
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> EcsResult<bool> {
        Ok(self.lock()?.len() == 0)
    }

    /// Discards everything recorded so far.
    pub fn clear(&self) -> EcsResult<()> {
        *self.lock()? = BufferInner::default();
        Ok(())
    }

    /// Reserves an entity handle; the entity materializes at flush time.
    pub fn create_entity(&self) -> EcsResult<Entity> {
        self.create_entity_inner(None)
    }

    /// Reserves a labeled entity handle.
    pub fn create_entity_named(&self, label: &str) -> EcsResult<Entity> {
        self.create_entity_inner(Some(label.to_owned()))
    }

    fn create_entity_inner(&self, label: Option<String>) -> EcsResult<Entity> {
        let entity = self.manager.reserve_entity();
        self.lock()?.creations.push(PendingCreate { entity, label });
        Ok(entity)
    }

    /// Queues attaching `value` to `entity`, expanding its attachment
    /// effects into the same buffer.
    pub fn add_component<T: Component>(&self, entity: Entity, mut value: T) -> EcsResult<()> {
        let effects = value.on_attach(entity);

        let mut inner = self.lock()?;
        inner.edits.push((
            entity,
            Edit::Add {
                component_id: component_id_of::<T>(),
                value: Box::new(value),
            },
        ));
        for (target, component_id, boxed) in effects.into_additions() {
            inner
                .edits
                .push((target, Edit::Add { component_id, value: boxed }));
        }
        Ok(())
    }

    /// Queues overwriting `entity`'s value of component `T`, expanding its
    /// attachment effects into the same buffer. If the component turns out
    /// to be absent at flush time the set attaches it instead.
    pub fn set_component<T: Component>(&self, entity: Entity, mut value: T) -> EcsResult<()> {
        let effects = value.on_attach(entity);

        let mut inner = self.lock()?;
        inner.edits.push((
            entity,
            Edit::Set {
                component_id: component_id_of::<T>(),
                value: Box::new(value),
            },
        ));
        for (target, component_id, boxed) in effects.into_additions() {
            inner
                .edits
                .push((target, Edit::Add { component_id, value: boxed }));
        }
        Ok(())
    }

    /// Queues detaching component `T` from `entity`.
    pub fn remove_component<T: Component>(&self, entity: Entity) -> EcsResult<()> {
        self.lock()?.edits.push((
            entity,
            Edit::Remove {
                component_id: component_id_of::<T>(),
            },
        ));
        Ok(())
    }

    /// Queues toggling `entity`'s enabled state.
    pub fn set_enabled_state(&self, entity: Entity, enabled: bool) -> EcsResult<()> {
        self.lock()?
            .edits
            .push((entity, Edit::SetEnabled { enabled }));
        Ok(())
    }

    /// Queues toggling every entity matched by `query`.
    pub fn set_enabled_state_for_query(&self, query: Query, enabled: bool) -> EcsResult<()> {
        self.lock()?.query_enabled.push((query, enabled));
        Ok(())
    }

    /// Queues destroying `entity`.
    pub fn destroy_entity(&self, entity: Entity) -> EcsResult<()> {
        self.lock()?.destroys.push(entity);
        Ok(())
    }

    /// Queues destroying every entity matched by `query` at flush time.
    pub fn destroy_query(&self, query: Query) -> EcsResult<()> {
        self.lock()?.query_destroys.push(query);
        Ok(())
    }

    /// Replays everything recorded so far and leaves the buffer empty.
    pub fn flush(&self) -> EcsResult<()> {
        let recorded = std::mem::take(&mut *self.lock()?);
        if recorded.len() == 0 {
            return Ok(());
        }

        log::debug!(
            "flushing command buffer: {} creations, {} edits, {} destroys",
            recorded.creations.len(),
            recorded.edits.len(),
            recorded.destroys.len() + recorded.query_destroys.len()
        );

        for pending in recorded.creations {
            self.manager.realize_entity(pending.entity, pending.label)?;
        }

        let doomed: Vec<Entity> = recorded.destroys.clone();
        self.replay_edits(recorded.edits, &doomed)?;

        for (query, enabled) in recorded.query_enabled {
            self.apply_query_enabled(&query, enabled)?;
        }

        for entity in recorded.destroys {
            if self.manager.exists(entity)? {
                self.manager.destroy_entity(entity)?;
            }
        }
        for query in recorded.query_destroys {
            self.manager.destroy_query(&query)?;
        }

        Ok(())
    }

    /// Collapses all edits per entity into one migration plus in-place
    /// overwrites, applied in recorded entity order.
    fn replay_edits(&self, edits: Vec<(Entity, Edit)>, doomed: &[Entity]) -> EcsResult<()> {
        let mut order: Vec<Entity> = Vec::new();
        let mut grouped: HashMap<Entity, Vec<Edit>> = HashMap::new();
        for (entity, edit) in edits {
            if doomed.contains(&entity) {
                continue;
            }
            grouped
                .entry(entity)
                .or_insert_with(|| {
                    order.push(entity);
                    Vec::new()
                })
                .push(edit);
        }

        for entity in order {
            let Some(entity_edits) = grouped.remove(&entity) else { continue };
            self.replay_entity(entity, entity_edits)?;
        }
        Ok(())
    }

    fn replay_entity(&self, entity: Entity, edits: Vec<Edit>) -> EcsResult<()> {
        let owner = self.manager.state().ownership().require_owner(entity)?;
        let mut working: Signature = {
            let guard = read_guard(&owner)?;
            *guard.signature()
        };
        let current = working;

        let mut additions: Vec<(ComponentId, BoxedValue)> = Vec::new();
        let mut overrides: Vec<(ComponentId, BoxedValue)> = Vec::new();
        let mut removals: Vec<ComponentId> = Vec::new();
        let mut enabled: Option<bool> = None;

        for edit in edits {
            match edit {
                Edit::Add { component_id, value } => {
                    if working.has(component_id) {
                        continue;
                    }
                    working.set(component_id);
                    removals.retain(|cid| *cid != component_id);
                    additions.push((component_id, value));
                }
                Edit::Set { component_id, value } => {
                    if let Some(slot) = additions
                        .iter_mut()
                        .find(|(cid, _)| *cid == component_id)
                    {
                        slot.1 = value;
                    } else if working.has(component_id) {
                        if let Some(slot) = overrides
                            .iter_mut()
                            .find(|(cid, _)| *cid == component_id)
                        {
                            slot.1 = value;
                        } else {
                            overrides.push((component_id, value));
                        }
                    } else if removals.contains(&component_id) {
                        // Present in storage, removed earlier in this buffer:
                        // the set revives it as an in-place overwrite.
                        removals.retain(|cid| *cid != component_id);
                        working.set(component_id);
                        overrides.push((component_id, value));
                    } else {
                        // Absent entirely: the set attaches the component.
                        working.set(component_id);
                        additions.push((component_id, value));
                    }
                }
                Edit::Remove { component_id } => {
                    if let Some(slot) = additions
                        .iter()
                        .position(|(cid, _)| *cid == component_id)
                    {
                        additions.remove(slot);
                        working.clear(component_id);
                    } else if working.has(component_id) {
                        working.clear(component_id);
                        removals.push(component_id);
                        overrides.retain(|(cid, _)| *cid != component_id);
                    }
                }
                Edit::SetEnabled { enabled: state } => {
                    enabled = Some(state);
                }
            }
        }

        if working != current || !additions.is_empty() {
            self.manager.restructure(entity, additions, &removals)?;
        }
        for (component_id, value) in overrides {
            self.manager.set_value_erased(entity, component_id, value)?;
        }
        if let Some(state) = enabled {
            self.manager.set_enabled_state(entity, state)?;
        }
        Ok(())
    }

    fn apply_query_enabled(&self, query: &Query, enabled: bool) -> EcsResult<()> {
        let tick = self.manager.state().current_tick();
        for archetype in query.matching_archetypes()? {
            let mut guard = write_guard(&archetype)?;
            if enabled {
                while guard.entity_count() < guard.entity_count_unfiltered() {
                    let boundary = guard.entity_count();
                    guard.set_enabled_state_at(boundary, true, tick)?;
                }
            } else {
                while guard.entity_count() > 0 {
                    guard.set_enabled_state_at(0, false, tick)?;
                }
            }
        }
        Ok(())
    }
}

/// End-of-frame system that replays a shared [`CommandBuffer`].
///
/// Runs at the maximum priority value, after every sibling at its level of
/// the system tree.
pub struct CommandBufferFlushSystem {
    buffer: Arc<CommandBuffer>,
}

impl CommandBufferFlushSystem {
    /// Wraps `buffer` for end-of-frame playback.
    pub fn new(buffer: Arc<CommandBuffer>) -> Self {
        Self { buffer }
    }
}

impl System for CommandBufferFlushSystem {
    fn priority(&self) -> Priority {
        Priority::MAX
    }

    fn on_update(&mut self, _world: &World, _delta_time: f64) -> EcsResult<()> {
        self.buffer.flush()
    }
}

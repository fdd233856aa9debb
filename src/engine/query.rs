//! Incrementally Cached Queries and Change-Filtered Streams
//!
//! A [`Query`] names a component filter: every *included* component must be
//! present and every *excluded* component absent. Matching is pure signature
//! arithmetic against archetypes, never per-entity.
//!
//! ## Caching
//!
//! Each query owns a cache of matching archetypes. The cache is **lazy**: the
//! first access performs one full scan of the registry. From then on it is
//! extended **incrementally** through archetype-creation notifications from
//! the registry, so a long-lived query never rescans no matter how many
//! archetypes exist. The cache holds strong references, which is what keeps
//! matched-but-momentarily-empty archetypes alive between GC sweeps.
//!
//! Queries are cheap to clone; clones share one cache.
//!
//! ## Streams
//!
//! A [`QueryStream`] is the bulk access path. Callers declare *fields* (a
//! component plus an access mode) up front and receive [`FieldId`] handles.
//! Each visited archetype resolves the declared fields to column slots once;
//! inside the loop, [`StreamRow::get`] and [`StreamRow::get_mut`] are a
//! fixed number of indexed reads, with no per-row hashing or search.
//!
//! With a watermark installed via [`QueryStream::changed_since`], an
//! archetype is visited only when its structural tick, or the updated tick of
//! any watched non-forced column, exceeds the watermark. Fields declared with
//! [`read_always`](QueryStream::read_always) never trigger a visit on their
//! own but remain readable whenever the archetype is visited for another
//! reason; use them for context data that changes every frame but should not
//! defeat the filter.

use std::sync::{Arc, Mutex, Weak};

use crate::engine::archetype::Archetype;
use crate::engine::component::{component_desc, component_id_of, Component};
use crate::engine::error::{read_guard, write_guard, EcsError, EcsResult, TypeMismatchError};
use crate::engine::manager::WorldState;
use crate::engine::registry::{ArchetypeObserver, ArchetypeRef};
use crate::engine::types::{ComponentId, Entity, Signature, Tick};


struct CacheInner {
    primed: bool,
    matches: Vec<ArchetypeRef>,
}

pub(crate) struct QueryCache {
    include: Signature,
    exclude: Signature,
    inner: Mutex<CacheInner>,
}

impl QueryCache {
    fn matches_signature(&self, signature: &Signature) -> bool {
        signature.contains_all(&self.include) && signature.disjoint_with(&self.exclude)
    }
}

impl ArchetypeObserver for QueryCache {
    fn archetype_created(&self, archetype: &ArchetypeRef) {
        let signature = match archetype.read() {
            Ok(guard) => *guard.signature(),
            Err(_) => return,
        };
        if !self.matches_signature(&signature) {
            return;
        }

        let Ok(mut inner) = self.inner.lock() else { return };
        // An unprimed cache will pick this archetype up in its first scan.
        if !inner.primed {
            return;
        }
        if !inner.matches.iter().any(|known| Arc::ptr_eq(known, archetype)) {
            inner.matches.push(archetype.clone());
        }
    }
}

/// Builder for a [`Query`].
pub struct QueryBuilder {
    state: Arc<WorldState>,
    include: Signature,
    exclude: Signature,
}

impl QueryBuilder {
    pub(crate) fn new(state: Arc<WorldState>) -> Self {
        Self {
            state,
            include: Signature::default(),
            exclude: Signature::default(),
        }
    }

    /// Requires component `T` to be present.
    pub fn with<T: Component>(mut self) -> Self {
        self.include.set(component_id_of::<T>());
        self
    }

    /// Requires component `T` to be absent.
    pub fn without<T: Component>(mut self) -> Self {
        self.exclude.set(component_id_of::<T>());
        self
    }

    /// Finalizes the filter and subscribes its cache to the registry.
    pub fn build(self) -> EcsResult<Query> {
        let cache = Arc::new(QueryCache {
            include: self.include,
            exclude: self.exclude,
            inner: Mutex::new(CacheInner {
                primed: false,
                matches: Vec::new(),
            }),
        });

        self.state
            .registry()
            .subscribe(Arc::downgrade(&cache) as Weak<dyn ArchetypeObserver>)?;

        Ok(Query {
            state: self.state,
            cache,
        })
    }
}

/// A cached component filter over one world.
#[derive(Clone)]
pub struct Query {
    state: Arc<WorldState>,
    cache: Arc<QueryCache>,
}

impl Query {
    /// Shared world state backing this query.
    #[inline]
    pub(crate) fn state(&self) -> &Arc<WorldState> {
        &self.state
    }

    /// Snapshot of the matching archetypes, priming the cache on first use.
    pub fn matching_archetypes(&self) -> EcsResult<Vec<ArchetypeRef>> {
        let mut inner = self
            .cache
            .inner
            .lock()
            .map_err(|_| EcsError::Internal("poisoned query cache"))?;

        if !inner.primed {
            for archetype in self.state.registry().archetypes()? {
                let matched = {
                    let guard = read_guard(&archetype)?;
                    self.cache.matches_signature(guard.signature())
                };
                if matched && !inner.matches.iter().any(|known| Arc::ptr_eq(known, &archetype)) {
                    inner.matches.push(archetype);
                }
            }
            inner.primed = true;
        }

        Ok(inner.matches.clone())
    }

    /// Number of matching archetypes.
    pub fn archetype_count(&self) -> EcsResult<usize> {
        Ok(self.matching_archetypes()?.len())
    }

    /// Number of enabled entities across all matches.
    pub fn entity_count(&self) -> EcsResult<usize> {
        let mut count = 0;
        for archetype in self.matching_archetypes()? {
            let guard = read_guard(&archetype)?;
            count += guard.entity_count();
        }
        Ok(count)
    }

    /// Number of matching entities regardless of enabled state.
    pub fn entity_count_unfiltered(&self) -> EcsResult<usize> {
        let mut count = 0;
        for archetype in self.matching_archetypes()? {
            let guard = read_guard(&archetype)?;
            count += guard.entity_count_unfiltered();
        }
        Ok(count)
    }

    /// Returns `true` if at least one enabled entity matches.
    pub fn has_matches(&self) -> EcsResult<bool> {
        for archetype in self.matching_archetypes()? {
            let guard = read_guard(&archetype)?;
            if guard.entity_count() > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Snapshot of all enabled matching entities.
    pub fn entities(&self) -> EcsResult<Vec<Entity>> {
        self.collect_entities(false)
    }

    /// Snapshot of all matching entities regardless of enabled state.
    pub fn entities_unfiltered(&self) -> EcsResult<Vec<Entity>> {
        self.collect_entities(true)
    }

    fn collect_entities(&self, include_disabled: bool) -> EcsResult<Vec<Entity>> {
        let mut entities = Vec::new();
        for archetype in self.matching_archetypes()? {
            let guard = read_guard(&archetype)?;
            let limit = if include_disabled {
                guard.entity_count_unfiltered()
            } else {
                guard.entity_count()
            };
            entities.extend_from_slice(&guard.entities()[..limit]);
        }
        Ok(entities)
    }

    /// Returns the unique matching entity.
    ///
    /// ## Errors
    /// * [`EcsError::NoEntityFound`] if nothing matches.
    /// * [`EcsError::MultipleSingletons`] if more than one entity matches.
    pub fn singleton_entity(&self, include_disabled: bool) -> EcsResult<Entity> {
        let entities = self.collect_entities(include_disabled)?;
        match entities.len() {
            0 => Err(EcsError::NoEntityFound),
            1 => Ok(entities[0]),
            found => Err(EcsError::MultipleSingletons { found }),
        }
    }

    /// Returns a clone of component `T` from the unique enabled matching
    /// entity.
    pub fn singleton<T: Component + Clone>(&self) -> EcsResult<T> {
        let entity = self.singleton_entity(false)?;
        let owner = self.state.ownership().require_owner(entity)?;
        let guard = read_guard(&owner)?;
        Ok(guard.component_ref::<T>(entity)?.clone())
    }

    /// Starts declaring a stream over this query's matches.
    pub fn stream(&self) -> QueryStream {
        QueryStream {
            query: self.clone(),
            fields: Vec::new(),
            watermark: None,
        }
    }
}

/// Access mode of a stream field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldAccess {
    Read,
    Write,
}

#[derive(Clone, Copy)]
struct FieldSpec {
    component_id: ComponentId,
    access: FieldAccess,
    /// Never triggers a change-filtered visit on its own.
    forced: bool,
}

/// Handle to a declared stream field.
#[derive(Clone, Copy, Debug)]
pub struct FieldId(usize);

/// Bulk row access over a query's matching archetypes.
pub struct QueryStream {
    query: Query,
    fields: Vec<FieldSpec>,
    watermark: Option<Tick>,
}

impl QueryStream {
    fn push_field(&mut self, component_id: ComponentId, access: FieldAccess, forced: bool) -> FieldId {
        self.fields.push(FieldSpec {
            component_id,
            access,
            forced,
        });
        FieldId(self.fields.len() - 1)
    }

    /// Declares read access to component `T`.
    pub fn read<T: Component>(&mut self) -> FieldId {
        self.push_field(component_id_of::<T>(), FieldAccess::Read, false)
    }

    /// Declares write access to component `T`.
    pub fn write<T: Component>(&mut self) -> FieldId {
        self.push_field(component_id_of::<T>(), FieldAccess::Write, false)
    }

    /// Declares read access to component `T` without letting its changes
    /// trigger change-filtered visits.
    pub fn read_always<T: Component>(&mut self) -> FieldId {
        self.push_field(component_id_of::<T>(), FieldAccess::Read, true)
    }

    /// Installs a change watermark: only archetypes touched after `tick` are
    /// visited.
    pub fn changed_since(&mut self, tick: Tick) -> &mut Self {
        self.watermark = Some(tick);
        self
    }

    fn should_visit(&self, archetype: &Archetype) -> bool {
        let Some(watermark) = self.watermark else { return true };

        if archetype.structural_tick() > watermark {
            return true;
        }
        self.fields
            .iter()
            .filter(|field| !field.forced)
            .any(|field| {
                archetype
                    .column(field.component_id)
                    .map(|column| column.updated_tick() > watermark)
                    .unwrap_or(false)
            })
    }

    /// Runs `f` for every enabled row of every visited archetype.
    ///
    /// Writes performed through [`StreamRow::get_mut`] are stamped with the
    /// world's current tick. Field columns are resolved once per visited
    /// archetype, so each row access is plain indexing.
    ///
    /// The archetype stays write-locked for the duration of the callback:
    /// structural mutation of matched archetypes through the immediate
    /// [`EntityManager`](crate::engine::manager::EntityManager) surface from
    /// inside `f` deadlocks. Record such edits on the command buffer
    /// instead.
    pub fn for_each<F>(&self, mut f: F) -> EcsResult<()>
    where
        F: FnMut(&mut StreamRow<'_>) -> EcsResult<()>,
    {
        let tick = self.query.state().current_tick();

        for archetype in self.query.matching_archetypes()? {
            let mut guard = write_guard(&archetype)?;
            if !self.should_visit(&guard) {
                continue;
            }

            let slots: Vec<Option<usize>> = self
                .fields
                .iter()
                .map(|field| guard.column_slot(field.component_id))
                .collect();

            let enabled = guard.entity_count();
            for index in 0..enabled {
                let mut row = StreamRow {
                    archetype: &mut *guard,
                    fields: &self.fields,
                    slots: &slots,
                    index,
                    tick,
                };
                f(&mut row)?;
            }
        }
        Ok(())
    }
}

/// One enabled row during stream iteration.
pub struct StreamRow<'a> {
    archetype: &'a mut Archetype,
    fields: &'a [FieldSpec],
    /// Column slot per declared field, resolved once per archetype.
    slots: &'a [Option<usize>],
    index: usize,
    tick: Tick,
}

impl StreamRow<'_> {
    /// The entity this row belongs to.
    pub fn entity(&self) -> EcsResult<Entity> {
        self.archetype.entity_at(self.index)
    }

    fn field(&self, field: FieldId) -> EcsResult<FieldSpec> {
        self.fields
            .get(field.0)
            .copied()
            .ok_or(EcsError::Internal("stream field handle out of range"))
    }

    fn slot(&self, field: FieldId) -> EcsResult<Option<usize>> {
        self.slots
            .get(field.0)
            .copied()
            .ok_or(EcsError::Internal("stream field handle out of range"))
    }

    fn check_type<T: Component>(&self, spec: &FieldSpec) -> EcsResult<()> {
        if spec.component_id != component_id_of::<T>() {
            let expected = component_desc(spec.component_id)
                .map(|desc| desc.type_id)
                .unwrap_or_else(std::any::TypeId::of::<()>);
            return Err(TypeMismatchError {
                expected,
                actual: std::any::TypeId::of::<T>(),
            }
            .into());
        }
        Ok(())
    }

    /// Borrows this row's value of the declared field.
    pub fn get<T: Component>(&self, field: FieldId) -> EcsResult<&T> {
        let spec = self.field(field)?;
        self.check_type::<T>(&spec)?;
        let slot = self.slot(field)?.ok_or(EcsError::ComponentNotFound {
            name: std::any::type_name::<T>(),
        })?;
        let column = self
            .archetype
            .typed_column_at::<T>(slot)
            .ok_or(EcsError::ComponentNotFound {
                name: std::any::type_name::<T>(),
            })?;
        column
            .get(self.index)
            .ok_or(EcsError::Internal("stream row outside column bounds"))
    }

    /// Mutably borrows this row's value of a field declared with
    /// [`QueryStream::write`].
    pub fn get_mut<T: Component>(&mut self, field: FieldId) -> EcsResult<&mut T> {
        let spec = self.field(field)?;
        self.check_type::<T>(&spec)?;
        if spec.access != FieldAccess::Write {
            return Err(EcsError::Internal("write access to a read-only stream field"));
        }
        let slot = self.slot(field)?.ok_or(EcsError::ComponentNotFound {
            name: std::any::type_name::<T>(),
        })?;
        let tick = self.tick;
        let column = self
            .archetype
            .typed_column_at_mut::<T>(slot)
            .ok_or(EcsError::ComponentNotFound {
                name: std::any::type_name::<T>(),
            })?;
        column
            .get_mut(self.index, tick)
            .ok_or(EcsError::Internal("stream row outside column bounds"))
    }
}

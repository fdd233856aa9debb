//! Component Trait and Global Component-Type Registry
//!
//! This module defines what it means to *be* a component and maintains the
//! process-wide mapping from Rust types to compact [`ComponentId`] values.
//!
//! ## Identifier assignment
//!
//! Component IDs are assigned **on first use**: the first time a type flows
//! through [`component_id_of`], the registry allocates the next sequential ID
//! and records a factory that can build an empty storage column for the type.
//! There is no explicit registration or freeze step; any code path that names
//! a component type (adding it to an entity, filtering a query on it) is
//! enough to register it.
//!
//! IDs are process-global and shared by all worlds, so a signature computed
//! in one world is meaningful in another. The registry never forgets a type.
//!
//! ## Attachment effects
//!
//! Components may react to being attached by producing [`AttachEffects`]: a
//! flat list of additional `(entity, component)` attachments. Effects are
//! expanded eagerly while they are being described, so by the time the
//! runtime sees them the cascade is fully flattened. The entity manager folds
//! all self-targeted effects into the *same* archetype migration as the
//! triggering addition; an entity therefore transitions archetypes exactly
//! once per top-level `add_component` call, no matter how deep the cascade.
//!
//! ## Capacity
//!
//! The ID space is capped at [`COMPONENT_CAP`] types. Exceeding the cap is a
//! programming error in the embedding application and panics with a clear
//! message; it cannot be triggered by runtime data.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::engine::storage::{Column, ColumnStorage};
use crate::engine::types::{BoxedValue, ComponentId, Entity, COMPONENT_CAP};


/// Upcast helper that gives every component a route to [`Any`].
///
/// Blanket-implemented for all eligible types; user code never implements
/// this directly.
pub trait AsAny {
    /// Borrows the value as [`Any`].
    fn as_any(&self) -> &dyn Any;

    /// Mutably borrows the value as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Converts the boxed value into a type-erased transport box.
    fn into_any(self: Box<Self>) -> BoxedValue;
}

impl<T: Any + Send> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any { self }

    #[inline]
    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    #[inline]
    fn into_any(self: Box<Self>) -> BoxedValue { self }
}

/// Additional attachments produced by a component's [`Component::on_attach`]
/// hook.
///
/// Effects are expanded at construction time: [`AttachEffects::and_attach`]
/// immediately runs the nested component's own `on_attach`, so the resulting
/// list is always fully flattened and the runtime never recurses.
#[derive(Default)]
pub struct AttachEffects {
    additions: Vec<(Entity, ComponentId, BoxedValue)>,
}

impl AttachEffects {
    /// No additional attachments.
    #[inline]
    pub fn none() -> Self {
        Self::default()
    }

    /// Queues `value` for attachment to `target`, expanding its own
    /// attachment effects in turn.
    pub fn and_attach<C: Component>(mut self, target: Entity, mut value: C) -> Self {
        let nested = value.on_attach(target);
        self.additions.push((target, component_id_of::<C>(), Box::new(value)));
        self.additions.extend(nested.additions);
        self
    }

    /// Returns `true` if no additional attachments were produced.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
    }

    pub(crate) fn into_additions(self) -> Vec<(Entity, ComponentId, BoxedValue)> {
        self.additions
    }
}

/// A value that can be attached to entities.
///
/// Implementations are plain data most of the time:
///
/// ```ignore
/// struct Health(f32);
/// impl Component for Health {}
/// ```
///
/// A component that needs companion data on attachment overrides
/// [`on_attach`](Component::on_attach):
///
/// ```ignore
/// impl Component for Turret {
///     fn on_attach(&mut self, entity: Entity) -> AttachEffects {
///         AttachEffects::none().and_attach(entity, AmmoStore::default())
///     }
/// }
/// ```
///
/// Self-targeted effects land in the same archetype migration as the
/// triggering addition; effects targeting other entities are applied
/// immediately afterwards. A cascaded component that is already present on
/// its target is dropped silently.
pub trait Component: AsAny + Send + Sync + 'static {
    /// Called once when the component is attached to `entity`, before the
    /// value is stored. Returns further attachments to perform.
    fn on_attach(&mut self, entity: Entity) -> AttachEffects {
        let _ = entity;
        AttachEffects::none()
    }
}

/// Factory producing an empty storage column for a component type.
pub type ColumnFactory = fn() -> Box<dyn ColumnStorage>;

/// Descriptor for a registered component type.
#[derive(Clone, Copy)]
pub struct ComponentDesc {
    /// Compact identifier assigned on first use.
    pub component_id: ComponentId,

    /// Human-readable type name.
    pub name: &'static str,

    /// Runtime type identifier.
    pub type_id: TypeId,

    /// Builds an empty column for this type.
    pub factory: ColumnFactory,
}

#[derive(Default)]
struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentId>,
    descs: Vec<ComponentDesc>,
}

fn registry() -> &'static RwLock<ComponentRegistry> {
    static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(ComponentRegistry::default()))
}

fn make_column<T: Component>() -> Box<dyn ColumnStorage> {
    Box::new(Column::<T>::new())
}

/// Returns the ID for component type `T`, assigning one on first use.
///
/// # Panics
/// Panics if more than [`COMPONENT_CAP`] distinct component types are used in
/// one process, or if the registry lock is poisoned. Both indicate programmer
/// error rather than runtime conditions.
pub fn component_id_of<T: Component>() -> ComponentId {
    let type_id = TypeId::of::<T>();

    {
        let registry = registry().read().unwrap_or_else(|e| e.into_inner());
        if let Some(&component_id) = registry.by_type.get(&type_id) {
            return component_id;
        }
    }

    let mut registry = registry().write().unwrap_or_else(|e| e.into_inner());

    // A racing caller may have registered between the two lock scopes.
    if let Some(&component_id) = registry.by_type.get(&type_id) {
        return component_id;
    }

    let next = registry.descs.len();
    assert!(
        next < COMPONENT_CAP,
        "component type cap ({COMPONENT_CAP}) exceeded registering {}",
        std::any::type_name::<T>()
    );

    let component_id = next as ComponentId;
    registry.by_type.insert(type_id, component_id);
    registry.descs.push(ComponentDesc {
        component_id,
        name: std::any::type_name::<T>(),
        type_id,
        factory: make_column::<T>,
    });

    component_id
}

/// Returns the descriptor for a registered component ID, if any.
pub fn component_desc(component_id: ComponentId) -> Option<ComponentDesc> {
    let registry = registry().read().unwrap_or_else(|e| e.into_inner());
    registry.descs.get(component_id as usize).copied()
}

/// Returns the human-readable name of a registered component ID.
pub fn component_name(component_id: ComponentId) -> &'static str {
    component_desc(component_id).map(|desc| desc.name).unwrap_or("<unregistered>")
}

/// Builds an empty storage column for a registered component ID.
pub(crate) fn new_column(component_id: ComponentId) -> Option<Box<dyn ColumnStorage>> {
    component_desc(component_id).map(|desc| (desc.factory)())
}

//! # Kestrel ECS
//!
//! Archetype-based Entity-Component-System runtime for simulations and
//! games that want dense storage with explicit control over structure.
//!
//! ## Design Goals
//! - Archetype storage with an enabled/disabled partition per archetype
//! - Deferred structural changes via replayable command buffers
//! - Incrementally cached queries and change-filtered streams
//! - A priority-ordered system tree driving a pacing world loop
//!
//! ## Quick tour
//! ```ignore
//! let world = World::new()?;
//! let player = world.entities().create_entity_named("player")?;
//! world.entities().add_component(player, Health(100.0))?;
//!
//! let query = world.query().with::<Health>().build()?;
//! let mut stream = query.stream();
//! let health = stream.write::<Health>();
//! stream.for_each(|row| {
//!     row.get_mut::<Health>(health)?.0 -= 1.0;
//!     Ok(())
//! })?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core ECS types

pub use engine::world::{
    ArchetypeGcSystem,
    LoopControl,
    World,
};

pub use engine::manager::{
    EntityManager,
    WorldState,
};

pub use engine::component::{
    AttachEffects,
    Component,
    component_id_of,
};

pub use engine::commands::{
    CommandBuffer,
    CommandBufferFlushSystem,
};

pub use engine::query::{
    FieldId,
    Query,
    QueryBuilder,
    QueryStream,
    StreamRow,
};

pub use engine::systems::System;

pub use engine::error::{
    EcsError,
    EcsResult,
};

pub use engine::types::{
    Bundle,
    ComponentId,
    Entity,
    Priority,
    Signature,
    Tick,
    WorldId,
    build_signature,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used runtime types.
///
/// Import with:
/// ```rust
/// use kestrel_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AttachEffects,
        Component,
        EcsError,
        EcsResult,
        Entity,
        EntityManager,
        Query,
        QueryBuilder,
        System,
        World,
        component_id_of,
    };
}

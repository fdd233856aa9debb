//! Core ECS Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental types, identifiers, bit layouts, and
//! signatures** used throughout the ECS runtime. These definitions form the
//! *semantic backbone* of the system and are shared across all subsystems,
//! including entity management, archetypes, queries, command buffers, and
//! systems.
//!
//! ## Design Philosophy
//!
//! The runtime is designed around:
//!
//! - **Dense columnar storage**
//! - **Bitset-based signatures**
//! - **Stable numeric identifiers**
//! - **Explicit structural change tracking**
//!
//! To support these goals efficiently, this module:
//!
//! - Encodes entities into a single 64-bit value,
//! - Represents component sets as fixed-size bit arrays,
//! - Uses small, copyable numeric IDs for all ECS concepts,
//! - Avoids heap allocation in hot paths.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer with the following layout:
//!
//! ```text
//! | world | serial |
//! ```
//!
//! - **Serial** is a monotonically increasing, never-recycled counter.
//! - **World** identifies the [`World`](crate::engine::world::World) the
//!   entity was created in, which lets every lookup reject handles from a
//!   foreign world with a precise error instead of silently resolving to the
//!   wrong storage.
//!
//! The exact bit widths are controlled by compile-time constants and validated
//! using static assertions.
//!
//! ## Archetypes and Components
//!
//! Components are identified by compact [`ComponentId`] values assigned on
//! first use. Archetypes are described by [`Signature`] bitsets indicating
//! which components they contain.
//!
//! Component signatures:
//!
//! - are fixed-size arrays of `u64`,
//! - support fast bitwise comparison,
//! - allow efficient iteration over set bits,
//! - are used for both archetype identity and query matching.
//!
//! Because a bitset has no notion of element order, signature identity is
//! inherently canonical: any two component lists with the same membership
//! produce the same [`Signature`], and therefore resolve to the same
//! archetype.
//!
//! ## Change Tracking
//!
//! All structural and per-column modification timestamps are expressed as
//! [`Tick`] values drawn from a single per-world counter that advances once
//! per accepted world update. Change-filtered query streams compare these
//! ticks against a caller-supplied watermark.

use std::any::Any;

use crate::engine::component::{component_id_of, Component};


/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Raw packed representation of an [`Entity`].
pub type EntityBits = u64;
/// Identifier for the world an entity belongs to.
pub type WorldId = u16;
/// Simulation tick counter.
pub type Tick = u64;
/// Execution priority of a system; children run in ascending order.
pub type Priority = i32;

/// Total number of bits in an entity handle.
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for world identification.
pub const WORLD_BITS: Bits = 16;
/// Number of bits reserved for the entity serial number.
pub const SERIAL_BITS: Bits = ENTITY_BITS - WORLD_BITS;

const _: [(); 1] = [(); (WORLD_BITS < ENTITY_BITS) as usize];
const _: [(); 1] = [(); (SERIAL_BITS > 0) as usize];
const _: [(); 1] = [(); (WORLD_BITS as usize + SERIAL_BITS as usize == ENTITY_BITS as usize) as usize];

const fn mask(bits: Bits) -> EntityBits {
    if bits == 0 { 0 } else { ((1 as EntityBits) << bits) - 1 }
}

/// Mask selecting the serial portion of an entity handle.
pub const SERIAL_MASK: EntityBits = mask(SERIAL_BITS);
/// Mask selecting the world portion of an entity handle.
pub const WORLD_MASK: EntityBits = mask(WORLD_BITS);

/// Opaque handle to an entity.
///
/// Entities are plain identifiers; all state lives in archetype storage and
/// the ownership index. Handles are `Copy`, hashable, and stable for the
/// lifetime of the process. Serial numbers are never recycled, so a destroyed
/// entity's handle can never alias a later one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(EntityBits);

impl Entity {
    /// Packs a world identifier and serial number into a handle.
    #[inline]
    pub(crate) fn pack(world: WorldId, serial: u64) -> Self {
        debug_assert!(serial <= SERIAL_MASK);
        Entity(((world as EntityBits) << SERIAL_BITS) | (serial & SERIAL_MASK))
    }

    /// Returns the identifier of the world this entity was created in.
    #[inline]
    pub fn world(&self) -> WorldId {
        ((self.0 >> SERIAL_BITS) & WORLD_MASK) as WorldId
    }

    /// Returns the entity's serial number within its world.
    #[inline]
    pub fn serial(&self) -> u64 {
        self.0 & SERIAL_MASK
    }

    /// Returns the raw packed representation.
    #[inline]
    pub fn bits(&self) -> EntityBits {
        self.0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}w{}", self.serial(), self.world())
    }
}

/// Unique identifier for a component type.
pub type ComponentId = u16;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 1024;
/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = (COMPONENT_CAP + 63) / 64;

/// Bitset representing a set of components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            components: [0u64; SIGNATURE_SIZE],
        }
    }
}

impl Signature {
    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentId) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentId) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentId) -> bool {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if no bits are set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|word| *word == 0)
    }

    /// Returns the number of components in this signature.
    #[inline]
    pub fn len(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        for (word_a, word_b) in self.components.iter().zip(signature.components.iter()) {
            if (word_a & word_b) != *word_b { return false; }
        }
        true
    }

    /// Returns `true` if no component is shared with `signature`.
    #[inline]
    pub fn disjoint_with(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(word_a, word_b)| (word_a & word_b) == 0)
    }

    /// Iterates over all component IDs set in this signature.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as ComponentId)
                })
            })
    }
}

/// Builds a component signature from a list of component IDs.
pub fn build_signature(component_ids: &[ComponentId]) -> Signature {
    let mut signature = Signature::default();
    for &component_id in component_ids { signature.set(component_id); }
    signature
}

/// Type-erased, heap-allocated component value in transit between storages.
pub type BoxedValue = Box<dyn Any + Send>;

/// Type-erased container for component values keyed by [`ComponentId`].
///
/// Bundles carry component values between archetypes during structural
/// changes (spawning, migration, command playback). They trade compile-time
/// typing for flexibility and stay out of hot iteration paths.
pub struct Bundle {
    /// Component presence signature
    signature: Signature,
    /// Sparse storage of component values
    values: Vec<(ComponentId, BoxedValue)>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self {
            signature: Signature::default(),
            values: Vec::new(),
        }
    }

    /// Clears all stored component values.
    #[inline]
    pub fn clear(&mut self) {
        self.signature = Signature::default();
        self.values.clear();
    }

    /// Inserts a typed component value into the bundle.
    #[inline]
    pub fn insert<T: Component>(&mut self, value: T) {
        self.insert_erased(component_id_of::<T>(), Box::new(value));
    }

    /// Inserts a type-erased component value under an explicit ID.
    ///
    /// A later insert under the same ID replaces the earlier value.
    #[inline]
    pub fn insert_erased(&mut self, component_id: ComponentId, value: BoxedValue) {
        if let Some(slot) = self
            .values
            .iter_mut()
            .find(|(cid, _)| *cid == component_id)
        {
            slot.1 = value;
        } else {
            self.values.push((component_id, value));
        }
        self.signature.set(component_id);
    }

    /// Removes and returns the value for `component_id`, if present.
    #[inline]
    pub fn take(&mut self, component_id: ComponentId) -> Option<BoxedValue> {
        let index = self
            .values
            .iter()
            .position(|(cid, _)| *cid == component_id)?;

        let (_, value) = self.values.swap_remove(index);
        self.signature.clear(component_id);
        Some(value)
    }

    /// Returns `true` if a value is stored for `component_id`.
    #[inline]
    pub fn has(&self, component_id: ComponentId) -> bool {
        self.signature.has(component_id)
    }

    /// Number of values currently stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the bundle holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds a signature representing the components present in this bundle.
    #[inline]
    pub fn signature(&self) -> Signature {
        self.signature
    }
}

impl Default for Bundle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_membership_is_order_independent() {
        let forward = build_signature(&[3, 7, 200]);
        let backward = build_signature(&[200, 7, 3]);
        assert_eq!(forward, backward);
        assert!(forward.has(7));
        assert!(!forward.has(8));
        assert_eq!(forward.len(), 3);
    }

    #[test]
    fn signature_containment_and_disjointness() {
        let outer = build_signature(&[1, 2, 3, 64]);
        let inner = build_signature(&[2, 64]);
        let other = build_signature(&[5, 900]);

        assert!(outer.contains_all(&inner));
        assert!(!inner.contains_all(&outer));
        assert!(outer.disjoint_with(&other));
        assert!(!outer.disjoint_with(&inner));
    }

    #[test]
    fn signature_iteration_yields_sorted_ids() {
        let signature = build_signature(&[900, 0, 65, 2]);
        let ids: Vec<ComponentId> = signature.iterate_over_components().collect();
        assert_eq!(ids, vec![0, 2, 65, 900]);
    }

    #[test]
    fn entity_bit_layout_round_trips() {
        let entity = Entity::pack(41, 123_456_789);
        assert_eq!(entity.world(), 41);
        assert_eq!(entity.serial(), 123_456_789);
    }
}

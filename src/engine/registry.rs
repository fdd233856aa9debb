//! Archetype Registry, Creation Notifications, and Garbage Collection
//!
//! The [`ArchetypeRegistry`] owns the canonical mapping from component-set
//! [`Signature`]s to live [`Archetype`]s. Because signatures are bitsets,
//! identity is order-independent: any two component lists with the same
//! membership resolve to the same archetype.
//!
//! ## Creation notifications
//!
//! Query caches avoid rescanning the registry by subscribing as
//! [`ArchetypeObserver`]s. When a new archetype is created, every live
//! subscriber is told about it exactly once, after the registry lock has been
//! released; a cache extends itself incrementally and never scans again once
//! primed. Subscribers are held weakly so a dropped query never has to
//! unsubscribe.
//!
//! ## Collection
//!
//! Registry entries are strong [`Arc`]s and query caches hold strong clones;
//! entity ownership records hold only [`Weak`] references. [`prune`]
//! (ArchetypeRegistry::prune) removes entries that are both **empty** and
//! **unreferenced outside the registry** (strong count of one). An archetype
//! that still stores entities, or that any query cache has matched, survives
//! every sweep. Pruning is driven on a cadence by the world's GC system
//! rather than eagerly on emptiness, so churn between two archetypes does not
//! thrash allocation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::engine::archetype::Archetype;
use crate::engine::error::{read_guard, write_guard, EcsResult};
use crate::engine::types::{Signature, SIGNATURE_SIZE};


/// Shared handle to a live archetype.
pub type ArchetypeRef = Arc<RwLock<Archetype>>;

/// Receiver for archetype-creation notifications.
pub trait ArchetypeObserver: Send + Sync {
    /// Called once for every archetype created after subscription.
    fn archetype_created(&self, archetype: &ArchetypeRef);
}

#[derive(Default)]
struct RegistryInner {
    by_signature: HashMap<[u64; SIGNATURE_SIZE], ArchetypeRef>,
    observers: Vec<Weak<dyn ArchetypeObserver>>,
}

/// Canonical signature-to-archetype map for one world.
#[derive(Default)]
pub struct ArchetypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl ArchetypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the archetype for `signature`, creating it if absent.
    ///
    /// Creation notifies all live observers after the registry lock is
    /// dropped, so observers are free to call back into the registry.
    pub fn get_or_create(&self, signature: &Signature) -> EcsResult<ArchetypeRef> {
        {
            let inner = read_guard(&self.inner)?;
            if let Some(archetype) = inner.by_signature.get(&signature.components) {
                return Ok(archetype.clone());
            }
        }

        let (archetype, observers) = {
            let mut inner = write_guard(&self.inner)?;

            // A racing creator may have won between the two lock scopes.
            if let Some(archetype) = inner.by_signature.get(&signature.components) {
                return Ok(archetype.clone());
            }

            let archetype: ArchetypeRef = Arc::new(RwLock::new(Archetype::new(signature)?));
            inner
                .by_signature
                .insert(signature.components, archetype.clone());

            log::trace!(
                "created archetype with {} components ({} live)",
                signature.len(),
                inner.by_signature.len()
            );

            inner.observers.retain(|observer| observer.strong_count() > 0);
            let observers: Vec<Arc<dyn ArchetypeObserver>> = inner
                .observers
                .iter()
                .filter_map(|observer| observer.upgrade())
                .collect();

            (archetype, observers)
        };

        for observer in observers {
            observer.archetype_created(&archetype);
        }

        Ok(archetype)
    }

    /// Returns the archetype for `signature` only if it already exists.
    pub fn get(&self, signature: &Signature) -> EcsResult<Option<ArchetypeRef>> {
        let inner = read_guard(&self.inner)?;
        Ok(inner.by_signature.get(&signature.components).cloned())
    }

    /// Snapshot of every live archetype.
    pub fn archetypes(&self) -> EcsResult<Vec<ArchetypeRef>> {
        let inner = read_guard(&self.inner)?;
        Ok(inner.by_signature.values().cloned().collect())
    }

    /// Number of live archetypes.
    pub fn len(&self) -> EcsResult<usize> {
        Ok(read_guard(&self.inner)?.by_signature.len())
    }

    /// Returns `true` if no archetypes are registered.
    pub fn is_empty(&self) -> EcsResult<bool> {
        Ok(read_guard(&self.inner)?.by_signature.is_empty())
    }

    /// Registers an observer for future archetype creations.
    ///
    /// The observer is held weakly; dropping all strong references is enough
    /// to unsubscribe.
    pub fn subscribe(&self, observer: Weak<dyn ArchetypeObserver>) -> EcsResult<()> {
        let mut inner = write_guard(&self.inner)?;
        inner.observers.push(observer);
        Ok(())
    }

    /// Removes archetypes that are empty and referenced by nothing outside
    /// the registry. Returns the number removed.
    pub fn prune(&self) -> EcsResult<usize> {
        let mut inner = write_guard(&self.inner)?;
        let before = inner.by_signature.len();

        inner.by_signature.retain(|_, archetype| {
            if Arc::strong_count(archetype) > 1 {
                return true;
            }
            match archetype.read() {
                Ok(guard) => !guard.is_empty(),
                // Poisoned storage is unusable; drop it with the entry.
                Err(_) => false,
            }
        });

        let removed = before - inner.by_signature.len();
        if removed > 0 {
            log::debug!(
                "pruned {} archetype(s), {} remain",
                removed,
                inner.by_signature.len()
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::component::{component_id_of, Component};
    use crate::engine::types::{build_signature, Bundle, Entity};
    use std::sync::Mutex;

    struct Marker;
    impl Component for Marker {}

    struct Recorder {
        seen: Mutex<usize>,
    }

    impl ArchetypeObserver for Recorder {
        fn archetype_created(&self, _archetype: &ArchetypeRef) {
            *self.seen.lock().unwrap() += 1;
        }
    }

    #[test]
    fn signatures_resolve_to_one_archetype() {
        let registry = ArchetypeRegistry::new();
        let signature = build_signature(&[component_id_of::<Marker>()]);

        let first = registry.get_or_create(&signature).unwrap();
        let second = registry.get_or_create(&signature).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn observers_hear_about_creations_once() {
        let registry = ArchetypeRegistry::new();
        let recorder = Arc::new(Recorder { seen: Mutex::new(0) });
        registry
            .subscribe(Arc::downgrade(&recorder) as Weak<dyn ArchetypeObserver>)
            .unwrap();

        let signature = build_signature(&[component_id_of::<Marker>()]);
        registry.get_or_create(&signature).unwrap();
        registry.get_or_create(&signature).unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), 1);
    }

    #[test]
    fn prune_spares_populated_and_externally_held_archetypes() {
        let registry = ArchetypeRegistry::new();

        let empty_sig = build_signature(&[]);
        let marker_sig = build_signature(&[component_id_of::<Marker>()]);

        let populated = registry.get_or_create(&marker_sig).unwrap();
        {
            let mut guard = populated.write().unwrap();
            let mut bundle = Bundle::new();
            bundle.insert(Marker);
            guard.add_entity(Entity::pack(0, 1), &mut bundle, true, 1).unwrap();
        }
        let held = registry.get_or_create(&empty_sig).unwrap();

        // Both survive: one has entities, the other an outside holder.
        assert_eq!(registry.prune().unwrap(), 0);

        drop(held);
        assert_eq!(registry.prune().unwrap(), 1);
        assert_eq!(registry.len().unwrap(), 1);

        drop(populated);
        // Still populated, so the strong count rule alone does not kill it.
        assert_eq!(registry.prune().unwrap(), 0);
    }
}

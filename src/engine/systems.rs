//! System Trait and the Priority-Ordered System Tree
//!
//! Systems are the unit of per-frame behavior. Each concrete system type
//! appears **at most once** per world and is addressed by its [`TypeId`];
//! the world offers `get_or_create` semantics on top of this.
//!
//! ## Tree shape
//!
//! Systems form a tree. A system chooses its parent *group* statically via
//! [`System::parent_group`]; returning `None` places it at the root level.
//! Execution is a pre-order walk: a parent updates before its children, and
//! siblings update in **ascending [`System::priority`]** order, insertion
//! order breaking ties. The command-buffer flush system uses the maximum
//! priority value so it runs after everything else at its level.
//!
//! Disabling a system skips its entire subtree.
//!
//! ## Lifecycle hooks
//!
//! `on_create` fires once at registration, `on_destroy` when the system (or
//! an ancestor) is removed, `on_enable`/`on_disable` on actual state
//! transitions, and `on_update` every accepted world update. Only
//! `on_update` is mandatory; the rest default to no-ops.
//!
//! ## Update gating
//!
//! A system may attach *gate queries* to itself (conventionally from
//! `on_create`): with any-gates, at least one query must currently match an
//! enabled entity; with all-gates, every query must. A gated skip covers the
//! subtree and does **not** advance the skipped systems' last-update ticks,
//! so change-filtered streams observe the full span of missed frames when
//! the gate reopens.

use std::any::TypeId;
use std::collections::HashMap;

use crate::engine::component::AsAny;
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::query::Query;
use crate::engine::types::{Priority, Tick};
use crate::engine::world::World;


/// A unit of per-frame behavior registered in a world's system tree.
pub trait System: AsAny {
    /// Ordering key among siblings; lower values run earlier.
    fn priority(&self) -> Priority {
        0
    }

    /// [`TypeId`] of the parent group system, or `None` for root level.
    fn parent_group(&self) -> Option<TypeId> {
        None
    }

    /// Runs once when the system is registered.
    fn on_create(&mut self, world: &World) -> EcsResult<()> {
        let _ = world;
        Ok(())
    }

    /// Runs every accepted world update.
    fn on_update(&mut self, world: &World, delta_time: f64) -> EcsResult<()>;

    /// Runs when the system or one of its ancestors is removed.
    fn on_destroy(&mut self, world: &World) -> EcsResult<()> {
        let _ = world;
        Ok(())
    }

    /// Runs when the system transitions from disabled to enabled.
    fn on_enable(&mut self, world: &World) -> EcsResult<()> {
        let _ = world;
        Ok(())
    }

    /// Runs when the system transitions from enabled to disabled.
    fn on_disable(&mut self, world: &World) -> EcsResult<()> {
        let _ = world;
        Ok(())
    }
}

pub(crate) struct SystemNode {
    /// `None` while the system is checked out for a hook call.
    system: Option<Box<dyn System>>,
    name: &'static str,
    parent: Option<TypeId>,
    children: Vec<TypeId>,
    priority: Priority,
    seq: u64,
    enabled: bool,
    last_update_tick: Tick,
    gate_any: Vec<Query>,
    gate_all: Vec<Query>,
}

impl SystemNode {
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn parent(&self) -> Option<TypeId> {
        self.parent
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn last_update_tick(&self) -> Tick {
        self.last_update_tick
    }

    pub(crate) fn set_last_update_tick(&mut self, tick: Tick) {
        self.last_update_tick = tick;
    }

    pub(crate) fn push_gate_any(&mut self, query: Query) {
        self.gate_any.push(query);
    }

    pub(crate) fn push_gate_all(&mut self, query: Query) {
        self.gate_all.push(query);
    }

    /// Evaluates this node's gate queries against current world contents.
    pub(crate) fn gates_open(&self) -> EcsResult<bool> {
        if !self.gate_any.is_empty() {
            let mut any = false;
            for query in &self.gate_any {
                if query.has_matches()? {
                    any = true;
                    break;
                }
            }
            if !any {
                return Ok(false);
            }
        }
        for query in &self.gate_all {
            if !query.has_matches()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn take_system(&mut self) -> Option<Box<dyn System>> {
        self.system.take()
    }

    pub(crate) fn put_back(&mut self, system: Box<dyn System>) {
        self.system = Some(system);
    }

    pub(crate) fn system_ref(&self) -> Option<&dyn System> {
        self.system.as_deref()
    }
}

/// Priority-ordered tree of at-most-one-instance-per-type systems.
#[derive(Default)]
pub(crate) struct SystemTree {
    nodes: HashMap<TypeId, SystemNode>,
    roots: Vec<TypeId>,
    next_seq: u64,
}

impl SystemTree {
    pub(crate) fn contains(&self, type_id: TypeId) -> bool {
        self.nodes.contains_key(&type_id)
    }

    pub(crate) fn node(&self, type_id: TypeId) -> Option<&SystemNode> {
        self.nodes.get(&type_id)
    }

    pub(crate) fn node_mut(&mut self, type_id: TypeId) -> Option<&mut SystemNode> {
        self.nodes.get_mut(&type_id)
    }

    /// Inserts `system` under its declared parent group.
    ///
    /// ## Errors
    /// * [`EcsError::Internal`] if the type is already registered or the
    ///   declared parent group is not.
    pub(crate) fn insert(
        &mut self,
        type_id: TypeId,
        name: &'static str,
        system: Box<dyn System>,
    ) -> EcsResult<()> {
        if self.nodes.contains_key(&type_id) {
            return Err(EcsError::Internal("system type already registered"));
        }

        let parent = system.parent_group();
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(&parent_id) {
                return Err(EcsError::Internal("parent system group is not registered"));
            }
        }

        let priority = system.priority();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.nodes.insert(
            type_id,
            SystemNode {
                system: Some(system),
                name,
                parent,
                children: Vec::new(),
                priority,
                seq,
                enabled: true,
                last_update_tick: 0,
                gate_any: Vec::new(),
                gate_all: Vec::new(),
            },
        );

        match parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.push(type_id);
                }
                self.sort_siblings(parent);
            }
            None => {
                self.roots.push(type_id);
                self.sort_siblings(None);
            }
        }

        Ok(())
    }

    fn sort_siblings(&mut self, parent: Option<TypeId>) {
        let key = |nodes: &HashMap<TypeId, SystemNode>, id: &TypeId| {
            nodes
                .get(id)
                .map(|node| (node.priority, node.seq))
                .unwrap_or((Priority::MAX, u64::MAX))
        };

        match parent {
            Some(parent_id) => {
                let mut children = match self.nodes.get(&parent_id) {
                    Some(node) => node.children.clone(),
                    None => return,
                };
                children.sort_by_key(|id| key(&self.nodes, id));
                if let Some(node) = self.nodes.get_mut(&parent_id) {
                    node.children = children;
                }
            }
            None => {
                let mut roots = std::mem::take(&mut self.roots);
                roots.sort_by_key(|id| key(&self.nodes, id));
                self.roots = roots;
            }
        }
    }

    /// Removes the subtree rooted at `type_id`, returning its nodes in
    /// top-down order for `on_destroy` dispatch.
    pub(crate) fn remove_subtree(&mut self, type_id: TypeId) -> Vec<(TypeId, SystemNode)> {
        let Some(root) = self.nodes.get(&type_id) else {
            return Vec::new();
        };

        match root.parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.retain(|id| *id != type_id);
                }
            }
            None => self.roots.retain(|id| *id != type_id),
        }

        let mut removed = Vec::new();
        let mut stack = vec![type_id];
        let mut order = Vec::new();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.nodes.get(&id) {
                // Reverse so pop order matches child order.
                stack.extend(node.children.iter().rev().copied());
            }
        }
        for id in order {
            if let Some(node) = self.nodes.remove(&id) {
                removed.push((id, node));
            }
        }
        removed
    }

    /// Pre-order execution plan over enabled subtrees.
    ///
    /// Gate evaluation happens at dispatch time, not here, so a gate closed
    /// by an earlier system in the same frame still takes effect.
    pub(crate) fn execution_order(&self) -> Vec<TypeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<TypeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else { continue };
            if !node.enabled {
                continue;
            }
            order.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        order
    }

    /// Type IDs of the subtree rooted at `type_id`, top-down.
    pub(crate) fn subtree(&self, type_id: TypeId) -> Vec<TypeId> {
        let mut order = Vec::new();
        let mut stack = vec![type_id];
        while let Some(id) = stack.pop() {
            if self.nodes.contains_key(&id) {
                order.push(id);
                if let Some(node) = self.nodes.get(&id) {
                    stack.extend(node.children.iter().rev().copied());
                }
            }
        }
        order
    }

    /// Flips the enabled flag; returns the previous value if the node exists.
    pub(crate) fn set_enabled(&mut self, type_id: TypeId, enabled: bool) -> Option<bool> {
        let node = self.nodes.get_mut(&type_id)?;
        let previous = node.enabled;
        node.enabled = enabled;
        Some(previous)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

//! World Facade, Tick Loop, Resources, and Garbage Collection
//!
//! A [`World`] ties the pieces together: one [`EntityManager`], one default
//! [`CommandBuffer`], one system tree, and a resource table, all over a
//! single shared [`WorldState`]. Multiple worlds coexist in a process and
//! share nothing but the component-type registry; entity handles embed their
//! world and are rejected elsewhere.
//!
//! ## Updating
//!
//! [`update`](World::update) runs one frame: the change tick advances, then
//! every enabled, un-gated system updates in tree order. A system error
//! **halts the world**: the error is logged, the frame aborts, and further
//! updates are refused. There is no partial-frame recovery; state after a
//! failed system is not trustworthy enough to keep simulating.
//!
//! [`run`](World::run) is the blocking loop form. A
//! [`crossbeam_channel::tick`] ticker fires at a tenth of the target delta
//! time; each wake checks whether enough time has elapsed and runs
//! [`update`] when it has, so actual frame spacing tracks the target within
//! a tenth. Pause, resume, and stop come from a cloneable [`LoopControl`]
//! handle and may be issued from any thread. Overlapping update attempts are
//! dropped with a warning rather than queued.
//!
//! ## Default systems
//!
//! Every world starts with two housekeeping systems: the
//! [`CommandBufferFlushSystem`] at maximum priority (end of frame) and the
//! [`ArchetypeGcSystem`] just before it. The GC accumulates frame time and
//! prunes the archetype registry on an adaptive cadence: a sweep that
//! collects something schedules the next one sooner, a fruitless sweep backs
//! off.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::engine::commands::{CommandBuffer, CommandBufferFlushSystem};
use crate::engine::error::{read_guard, write_guard, EcsError, EcsResult};
use crate::engine::manager::{EntityManager, WorldState};
use crate::engine::query::{Query, QueryBuilder};
use crate::engine::systems::{System, SystemTree};
use crate::engine::types::{Priority, Tick, WorldId};


/// Default target update rate for a fresh world.
pub const DEFAULT_TARGET_FRAMERATE: f64 = 60.0;

/// Sweep interval after a collection that found garbage.
const GC_INTERVAL_SHORT: f64 = 1.0;
/// Sweep interval while the registry is stable.
const GC_INTERVAL_LONG: f64 = 10.0;

/// Cross-thread control handle for a running world loop.
#[derive(Default)]
pub struct LoopControl {
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl LoopControl {
    /// Suspends updates; the loop keeps ticking but skips frames.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resumes updates after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Makes [`World::run`] return after the current frame.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Returns `true` while updates are suspended.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Returns `true` once the loop has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

type ResourceMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// One self-contained simulation: entities, systems, resources, and a loop.
pub struct World {
    state: Arc<WorldState>,
    manager: EntityManager,
    commands: Arc<CommandBuffer>,
    systems: RefCell<SystemTree>,
    resources: RwLock<ResourceMap>,
    control: Arc<LoopControl>,
    target_dt_bits: AtomicU64,
    in_update: Cell<bool>,
    halted: Cell<bool>,
}

impl World {
    /// Creates a world with the default housekeeping systems installed.
    pub fn new() -> EcsResult<Self> {
        let state = WorldState::new();
        let manager = EntityManager::new(state.clone());
        let commands = Arc::new(CommandBuffer::new(manager.clone()));

        let world = Self {
            state,
            manager,
            commands: commands.clone(),
            systems: RefCell::new(SystemTree::default()),
            resources: RwLock::new(HashMap::new()),
            control: Arc::new(LoopControl::default()),
            target_dt_bits: AtomicU64::new((1.0 / DEFAULT_TARGET_FRAMERATE).to_bits()),
            in_update: Cell::new(false),
            halted: Cell::new(false),
        };

        world.create_system(ArchetypeGcSystem::default())?;
        world.create_system(CommandBufferFlushSystem::new(commands))?;
        Ok(world)
    }

    /// Identifier of this world.
    pub fn world_id(&self) -> WorldId {
        self.state.world_id()
    }

    /// Immediate entity mutation API.
    pub fn entities(&self) -> &EntityManager {
        &self.manager
    }

    /// The world's default deferred command buffer, flushed at end of frame.
    pub fn commands(&self) -> &Arc<CommandBuffer> {
        &self.commands
    }

    /// Starts building a query against this world.
    pub fn query(&self) -> QueryBuilder {
        self.manager.query()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> EcsResult<usize> {
        self.manager.entity_count()
    }

    /// Current change tick.
    pub fn current_tick(&self) -> Tick {
        self.state.current_tick()
    }

    /// Immediately sweeps the archetype registry; returns archetypes freed.
    pub fn collect_garbage(&self) -> EcsResult<usize> {
        self.state.registry().prune()
    }

    // ── systems ─────────────────────────────────────────────────────────

    /// Registers `system` and runs its `on_create` hook.
    ///
    /// ## Errors
    /// [`EcsError::Internal`] if the type is already registered or its
    /// declared parent group is missing.
    pub fn create_system<S: System + 'static>(&self, system: S) -> EcsResult<()> {
        let type_id = TypeId::of::<S>();
        self.systems.borrow_mut().insert(
            type_id,
            std::any::type_name::<S>(),
            Box::new(system),
        )?;
        self.dispatch_hook(type_id, |system, world| system.on_create(world))
    }

    /// Registers `S::default()` unless the type is already present.
    pub fn get_or_create_system<S: System + Default + 'static>(&self) -> EcsResult<()> {
        if self.has_system::<S>() {
            return Ok(());
        }
        self.create_system(S::default())
    }

    /// Returns `true` if a system of type `S` is registered.
    pub fn has_system<S: System + 'static>(&self) -> bool {
        self.systems.borrow().contains(TypeId::of::<S>())
    }

    /// Number of registered systems, housekeeping included.
    pub fn system_count(&self) -> usize {
        self.systems.borrow().len()
    }

    /// Runs `f` against a shared borrow of the registered system `S`.
    pub fn with_system<S: System + 'static, R>(&self, f: impl FnOnce(&S) -> R) -> EcsResult<R> {
        let systems = self.systems.borrow();
        let node = systems
            .node(TypeId::of::<S>())
            .ok_or(EcsError::SystemNotFound { name: std::any::type_name::<S>() })?;
        let system = node
            .system_ref()
            .ok_or(EcsError::Internal("system is currently executing"))?;
        let concrete = system
            .as_any()
            .downcast_ref::<S>()
            .ok_or(EcsError::Internal("system stored under foreign type id"))?;
        Ok(f(concrete))
    }

    /// Removes system `S` and its whole subtree, running `on_destroy`
    /// top-down. Returns `true` if the system existed.
    pub fn remove_system<S: System + 'static>(&self) -> EcsResult<bool> {
        let removed = self.systems.borrow_mut().remove_subtree(TypeId::of::<S>());
        if removed.is_empty() {
            return Ok(false);
        }

        let mut first_error = None;
        for (_, mut node) in removed {
            if let Some(mut system) = node.take_system() {
                if let Err(error) = system.on_destroy(self) {
                    log::error!("on_destroy failed for {}: {error}", node.name());
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(true),
        }
    }

    /// Toggles system `S`, running `on_enable`/`on_disable` on transitions.
    /// Returns `true` if the state changed. A disabled system's subtree is
    /// skipped entirely during updates.
    pub fn set_system_enabled<S: System + 'static>(&self, enabled: bool) -> EcsResult<bool> {
        let type_id = TypeId::of::<S>();
        let previous = self
            .systems
            .borrow_mut()
            .set_enabled(type_id, enabled)
            .ok_or(EcsError::SystemNotFound { name: std::any::type_name::<S>() })?;

        if previous == enabled {
            return Ok(false);
        }
        self.dispatch_hook(type_id, |system, world| {
            if enabled {
                system.on_enable(world)
            } else {
                system.on_disable(world)
            }
        })?;
        Ok(true)
    }

    /// Gates `S`'s updates on `query` matching at least one enabled entity;
    /// multiple any-gates are alternatives.
    pub fn require_any_for_update<S: System + 'static>(&self, query: Query) -> EcsResult<()> {
        let mut systems = self.systems.borrow_mut();
        let node = systems
            .node_mut(TypeId::of::<S>())
            .ok_or(EcsError::SystemNotFound { name: std::any::type_name::<S>() })?;
        node.push_gate_any(query);
        Ok(())
    }

    /// Gates `S`'s updates on `query` matching; all all-gates must hold.
    pub fn require_all_for_update<S: System + 'static>(&self, query: Query) -> EcsResult<()> {
        let mut systems = self.systems.borrow_mut();
        let node = systems
            .node_mut(TypeId::of::<S>())
            .ok_or(EcsError::SystemNotFound { name: std::any::type_name::<S>() })?;
        node.push_gate_all(query);
        Ok(())
    }

    /// Tick of `S`'s most recent completed update. Gated skips do not
    /// advance it.
    pub fn last_update_tick<S: System + 'static>(&self) -> EcsResult<Tick> {
        let systems = self.systems.borrow();
        let node = systems
            .node(TypeId::of::<S>())
            .ok_or(EcsError::SystemNotFound { name: std::any::type_name::<S>() })?;
        Ok(node.last_update_tick())
    }

    /// Takes the system out of its node, runs `f`, and puts it back.
    fn dispatch_hook(
        &self,
        type_id: TypeId,
        f: impl FnOnce(&mut Box<dyn System>, &World) -> EcsResult<()>,
    ) -> EcsResult<()> {
        let taken = {
            let mut systems = self.systems.borrow_mut();
            match systems.node_mut(type_id) {
                Some(node) => node.take_system(),
                None => None,
            }
        };
        let Some(mut system) = taken else {
            return Err(EcsError::Internal("system is currently executing"));
        };

        let result = f(&mut system, self);

        let mut systems = self.systems.borrow_mut();
        if let Some(node) = systems.node_mut(type_id) {
            node.put_back(system);
        }
        result
    }

    // ── resources ───────────────────────────────────────────────────────

    /// Returns the shared resource of type `R`, creating it from `Default`
    /// on first access.
    pub fn get_or_create_resource<R: Any + Send + Sync + Default>(&self) -> EcsResult<Arc<R>> {
        {
            let resources = read_guard(&self.resources)?;
            if let Some(resource) = resources.get(&TypeId::of::<R>()) {
                return resource
                    .clone()
                    .downcast::<R>()
                    .map_err(|_| EcsError::Internal("resource stored under foreign type id"));
            }
        }

        let mut resources = write_guard(&self.resources)?;
        let resource = resources
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Arc::new(R::default()))
            .clone();
        resource
            .downcast::<R>()
            .map_err(|_| EcsError::Internal("resource stored under foreign type id"))
    }

    /// Returns the shared resource of type `R` if it exists.
    pub fn try_get_resource<R: Any + Send + Sync>(&self) -> EcsResult<Option<Arc<R>>> {
        let resources = read_guard(&self.resources)?;
        match resources.get(&TypeId::of::<R>()) {
            None => Ok(None),
            Some(resource) => resource
                .clone()
                .downcast::<R>()
                .map(Some)
                .map_err(|_| EcsError::Internal("resource stored under foreign type id")),
        }
    }

    /// Returns the shared resource of type `R`.
    ///
    /// ## Errors
    /// [`EcsError::ResourceMissing`] if it was never created.
    pub fn get_resource<R: Any + Send + Sync>(&self) -> EcsResult<Arc<R>> {
        self.try_get_resource::<R>()?
            .ok_or(EcsError::ResourceMissing { name: std::any::type_name::<R>() })
    }

    // ── updating ────────────────────────────────────────────────────────

    /// Runs one frame with an explicit delta time.
    ///
    /// Re-entrant calls (a system updating the world from inside its own
    /// update) are dropped with a warning. After a system error the world is
    /// halted and every further call fails.
    pub fn update(&self, delta_time: f64) -> EcsResult<()> {
        if self.halted.get() {
            return Err(EcsError::Internal("world is halted after a system error"));
        }
        if self.in_update.get() {
            log::warn!("world {}: dropped overlapping update", self.world_id());
            return Ok(());
        }

        self.in_update.set(true);
        let result = self.update_inner(delta_time);
        self.in_update.set(false);

        if let Err(error) = &result {
            log::error!("world {} halted: {error}", self.world_id());
            self.halted.set(true);
        }
        result
    }

    fn update_inner(&self, delta_time: f64) -> EcsResult<()> {
        let tick = self.state.advance_tick();
        let plan = self.systems.borrow().execution_order();
        let mut skipped: Vec<TypeId> = Vec::new();

        for type_id in plan {
            let gate_open = {
                let systems = self.systems.borrow();
                let Some(node) = systems.node(type_id) else { continue };

                // A gate-skipped ancestor silences the whole subtree.
                if node
                    .parent()
                    .map(|parent| skipped.contains(&parent))
                    .unwrap_or(false)
                {
                    skipped.push(type_id);
                    continue;
                }
                node.gates_open()?
            };

            if !gate_open {
                skipped.push(type_id);
                continue;
            }

            self.dispatch_hook(type_id, |system, world| {
                system.on_update(world, delta_time)
            })?;

            let mut systems = self.systems.borrow_mut();
            if let Some(node) = systems.node_mut(type_id) {
                node.set_last_update_tick(tick);
            }
        }
        Ok(())
    }

    /// Returns `true` once a system error has halted this world.
    pub fn is_halted(&self) -> bool {
        self.halted.get()
    }

    // ── run loop ────────────────────────────────────────────────────────

    /// Control handle for [`run`](Self::run); cloneable and thread-safe.
    pub fn control(&self) -> Arc<LoopControl> {
        self.control.clone()
    }

    /// Sets the target update rate in frames per second.
    pub fn set_target_framerate(&self, fps: f64) {
        self.set_target_delta_time(1.0 / fps);
    }

    /// Sets the target delta time in seconds. Takes effect on the next
    /// ticker wake when the loop is running.
    pub fn set_target_delta_time(&self, delta_time: f64) {
        self.target_dt_bits
            .store(delta_time.to_bits(), Ordering::Release);
    }

    /// Current target delta time in seconds.
    pub fn target_delta_time(&self) -> f64 {
        f64::from_bits(self.target_dt_bits.load(Ordering::Acquire))
    }

    /// Blocks and updates at the target rate until stopped or halted.
    ///
    /// The internal ticker fires at a tenth of the target delta time; a
    /// frame runs once the elapsed time since the previous frame reaches the
    /// target. Pausing freezes the elapsed-time clock.
    pub fn run(&self) -> EcsResult<()> {
        let mut period = self.target_delta_time() / 10.0;
        let mut ticker = crossbeam_channel::tick(Duration::from_secs_f64(period));
        let mut last_frame = Instant::now();

        loop {
            if self.control.is_stopped() {
                return Ok(());
            }

            let desired = self.target_delta_time() / 10.0;
            if desired != period {
                period = desired;
                ticker = crossbeam_channel::tick(Duration::from_secs_f64(period));
            }

            if ticker.recv().is_err() {
                return Err(EcsError::Internal("run loop ticker disconnected"));
            }

            if self.control.is_paused() {
                last_frame = Instant::now();
                continue;
            }

            let elapsed = last_frame.elapsed();
            if elapsed.as_secs_f64() >= self.target_delta_time() {
                last_frame = Instant::now();
                self.update(elapsed.as_secs_f64())?;
            }
        }
    }
}

/// Periodic archetype garbage collector.
///
/// Accumulates frame time and prunes the registry when its interval
/// elapses. A sweep that frees archetypes shortens the next interval to
/// [`GC_INTERVAL_SHORT`]; a fruitless sweep backs off to
/// [`GC_INTERVAL_LONG`].
pub struct ArchetypeGcSystem {
    accumulated: f64,
    interval: f64,
}

impl Default for ArchetypeGcSystem {
    fn default() -> Self {
        Self {
            accumulated: 0.0,
            interval: GC_INTERVAL_LONG,
        }
    }
}

impl System for ArchetypeGcSystem {
    fn priority(&self) -> Priority {
        // Right before the end-of-frame command flush.
        Priority::MAX - 1
    }

    fn on_update(&mut self, world: &World, delta_time: f64) -> EcsResult<()> {
        self.accumulated += delta_time;
        if self.accumulated < self.interval {
            return Ok(());
        }
        self.accumulated = 0.0;

        let pruned = world.collect_garbage()?;
        self.interval = if pruned > 0 {
            GC_INTERVAL_SHORT
        } else {
            GC_INTERVAL_LONG
        };
        Ok(())
    }
}

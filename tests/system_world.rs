use std::any::TypeId;
use std::sync::Mutex;
use std::time::Duration;

use kestrel_ecs::prelude::*;

#[derive(Clone, Debug, PartialEq)]
struct Sentinel;
impl Component for Sentinel {}

#[derive(Clone, Debug, PartialEq)]
struct Extra;
impl Component for Extra {}

#[derive(Clone, Debug, PartialEq)]
struct Third;
impl Component for Third {}

/// Shared scratchpad the test systems append to.
#[derive(Default)]
struct Trace(Mutex<Vec<&'static str>>);

fn record(world: &World, step: &'static str) -> EcsResult<()> {
    let trace = world.get_or_create_resource::<Trace>()?;
    trace
        .0
        .lock()
        .map_err(|_| EcsError::Internal("poisoned trace"))?
        .push(step);
    Ok(())
}

fn trace_of(world: &World) -> EcsResult<Vec<&'static str>> {
    let trace = world.get_or_create_resource::<Trace>()?;
    let steps = trace
        .0
        .lock()
        .map_err(|_| EcsError::Internal("poisoned trace"))?;
    Ok(steps.clone())
}

struct Movement;
impl System for Movement {
    fn priority(&self) -> i32 {
        -10
    }
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        record(world, "movement")
    }
}

#[derive(Default)]
struct SpawnGroup;
impl System for SpawnGroup {
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        record(world, "group")
    }
}

struct SpawnA;
impl System for SpawnA {
    fn priority(&self) -> i32 {
        2
    }
    fn parent_group(&self) -> Option<TypeId> {
        Some(TypeId::of::<SpawnGroup>())
    }
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        record(world, "spawn_a")
    }
}

struct SpawnB;
impl System for SpawnB {
    fn priority(&self) -> i32 {
        1
    }
    fn parent_group(&self) -> Option<TypeId> {
        Some(TypeId::of::<SpawnGroup>())
    }
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        record(world, "spawn_b")
    }
}

struct Cleanup;
impl System for Cleanup {
    fn priority(&self) -> i32 {
        5
    }
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        record(world, "cleanup")
    }
}

#[test]
fn updates_run_in_tree_order() -> EcsResult<()> {
    let world = World::new()?;
    world.create_system(Cleanup)?;
    world.create_system(SpawnGroup)?;
    world.create_system(SpawnA)?;
    world.create_system(SpawnB)?;
    world.create_system(Movement)?;

    world.update(0.016)?;
    assert_eq!(
        trace_of(&world)?,
        vec!["movement", "group", "spawn_b", "spawn_a", "cleanup"]
    );
    Ok(())
}

#[test]
fn duplicate_and_orphan_registrations_are_rejected() -> EcsResult<()> {
    let world = World::new()?;
    world.create_system(Movement)?;
    assert!(world.create_system(Movement).is_err());
    // The parent group was never registered.
    assert!(world.create_system(SpawnA).is_err());

    world.get_or_create_system::<SpawnGroup>()?;
    world.get_or_create_system::<SpawnGroup>()?;
    assert!(world.has_system::<SpawnGroup>());
    Ok(())
}

struct Guarded;
impl System for Guarded {
    fn on_create(&mut self, world: &World) -> EcsResult<()> {
        let query = world.query().with::<Sentinel>().build()?;
        world.require_any_for_update::<Guarded>(query)
    }
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        record(world, "guarded")
    }
}

struct GuardedChild;
impl System for GuardedChild {
    fn parent_group(&self) -> Option<TypeId> {
        Some(TypeId::of::<Guarded>())
    }
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        record(world, "guarded_child")
    }
}

#[test]
fn gated_systems_skip_their_subtree_without_advancing_ticks() -> EcsResult<()> {
    let world = World::new()?;
    world.create_system(Guarded)?;
    world.create_system(GuardedChild)?;

    world.update(0.016)?;
    assert!(trace_of(&world)?.is_empty());
    assert_eq!(world.last_update_tick::<Guarded>()?, 0);
    assert_eq!(world.last_update_tick::<GuardedChild>()?, 0);

    let sentinel = world.entities().create_entity()?;
    world.entities().add_component(sentinel, Sentinel)?;
    world.update(0.016)?;
    assert_eq!(trace_of(&world)?, vec!["guarded", "guarded_child"]);
    assert_eq!(world.last_update_tick::<Guarded>()?, world.current_tick());

    // Disabling the matched entity closes the gate again.
    world.entities().set_enabled_state(sentinel, false)?;
    world.update(0.016)?;
    assert_eq!(trace_of(&world)?, vec!["guarded", "guarded_child"]);
    Ok(())
}

struct Toggled;
impl System for Toggled {
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        record(world, "update")
    }
    fn on_enable(&mut self, world: &World) -> EcsResult<()> {
        record(world, "enable")
    }
    fn on_disable(&mut self, world: &World) -> EcsResult<()> {
        record(world, "disable")
    }
}

#[test]
fn enable_transitions_fire_hooks_once() -> EcsResult<()> {
    let world = World::new()?;
    world.create_system(Toggled)?;

    assert!(world.set_system_enabled::<Toggled>(false)?);
    assert!(!world.set_system_enabled::<Toggled>(false)?);
    world.update(0.016)?;
    assert!(world.set_system_enabled::<Toggled>(true)?);
    world.update(0.016)?;

    assert_eq!(trace_of(&world)?, vec!["disable", "enable", "update"]);
    Ok(())
}

struct Root;
impl System for Root {
    fn on_update(&mut self, _world: &World, _delta_time: f64) -> EcsResult<()> {
        Ok(())
    }
    fn on_destroy(&mut self, world: &World) -> EcsResult<()> {
        record(world, "destroy_root")
    }
}

struct Leaf;
impl System for Leaf {
    fn parent_group(&self) -> Option<TypeId> {
        Some(TypeId::of::<Root>())
    }
    fn on_update(&mut self, _world: &World, _delta_time: f64) -> EcsResult<()> {
        Ok(())
    }
    fn on_destroy(&mut self, world: &World) -> EcsResult<()> {
        record(world, "destroy_leaf")
    }
}

#[test]
fn removing_a_group_destroys_the_subtree_top_down() -> EcsResult<()> {
    let world = World::new()?;
    world.create_system(Root)?;
    world.create_system(Leaf)?;

    assert!(world.remove_system::<Root>()?);
    assert!(!world.has_system::<Root>());
    assert!(!world.has_system::<Leaf>());
    assert_eq!(trace_of(&world)?, vec!["destroy_root", "destroy_leaf"]);

    assert!(!world.remove_system::<Root>()?);
    Ok(())
}

struct Spawner {
    spawned: Option<Entity>,
}
impl System for Spawner {
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        if self.spawned.is_none() {
            let entity = world.commands().create_entity()?;
            world.commands().add_component(entity, Sentinel)?;
            self.spawned = Some(entity);
        }
        Ok(())
    }
}

#[test]
fn deferred_commands_flush_at_end_of_frame() -> EcsResult<()> {
    let world = World::new()?;
    world.create_system(Spawner { spawned: None })?;

    world.update(0.016)?;
    let spawned = world
        .with_system(|spawner: &Spawner| spawner.spawned)?
        .ok_or(EcsError::Internal("spawner never ran"))?;
    assert!(world.entities().exists(spawned)?);
    assert!(world.entities().has_component::<Sentinel>(spawned)?);
    Ok(())
}

struct Reentrant;
impl System for Reentrant {
    fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
        // Dropped with a warning instead of recursing.
        world.update(0.0)
    }
}

#[test]
fn overlapping_updates_are_dropped() -> EcsResult<()> {
    let world = World::new()?;
    world.create_system(Reentrant)?;
    world.update(0.016)?;
    assert!(!world.is_halted());
    Ok(())
}

struct Faulty;
impl System for Faulty {
    fn on_update(&mut self, _world: &World, _delta_time: f64) -> EcsResult<()> {
        Err(EcsError::NoEntityFound)
    }
}

#[test]
fn a_system_error_halts_the_world() -> EcsResult<()> {
    let world = World::new()?;
    world.create_system(Faulty)?;

    assert!(matches!(world.update(0.016), Err(EcsError::NoEntityFound)));
    assert!(world.is_halted());
    assert!(matches!(world.update(0.016), Err(EcsError::Internal(_))));
    Ok(())
}

#[test]
fn missing_systems_and_resources_report_cleanly() -> EcsResult<()> {
    let world = World::new()?;
    assert!(matches!(
        world.with_system(|_: &Movement| ()),
        Err(EcsError::SystemNotFound { .. })
    ));
    assert!(world.try_get_resource::<Trace>()?.is_none());
    assert!(matches!(
        world.get_resource::<Trace>(),
        Err(EcsError::ResourceMissing { .. })
    ));
    world.get_or_create_resource::<Trace>()?;
    assert!(world.try_get_resource::<Trace>()?.is_some());
    Ok(())
}

#[test]
fn manual_garbage_collection_respects_holders() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();
    let entity = entities.create_entity()?;
    entities.add_component(entity, Sentinel)?;

    let query = world.query().with::<Sentinel>().build()?;
    assert_eq!(query.entity_count()?, 1);

    entities.destroy_entity(entity)?;
    // The empty-signature archetype goes; the cached one stays.
    assert_eq!(world.collect_garbage()?, 1);
    assert_eq!(query.archetype_count()?, 1);

    drop(query);
    assert_eq!(world.collect_garbage()?, 1);
    Ok(())
}

#[test]
fn gc_system_adapts_its_cadence() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();
    let registry_len = || -> EcsResult<usize> { world.entities().state().registry().len() };

    // Leaves the empty-signature archetype behind as garbage.
    let entity = entities.create_entity()?;
    entities.add_component(entity, Sentinel)?;
    assert_eq!(registry_len()?, 2);

    // The first sweep waits out the long interval, finds garbage, and
    // shortens the cadence.
    world.update(11.0)?;
    assert_eq!(registry_len()?, 1);

    entities.add_component(entity, Extra)?;
    assert_eq!(registry_len()?, 2);
    world.update(1.5)?;
    assert_eq!(registry_len()?, 1);

    // A fruitless sweep backs off again.
    world.update(1.5)?;
    entities.add_component(entity, Third)?;
    assert_eq!(registry_len()?, 2);
    world.update(1.5)?;
    assert_eq!(registry_len()?, 2);
    Ok(())
}

#[test]
fn run_loop_paces_and_stops() -> EcsResult<()> {
    struct FrameCounter;
    impl System for FrameCounter {
        fn on_update(&mut self, world: &World, _delta_time: f64) -> EcsResult<()> {
            record(world, "frame")
        }
    }

    let _ = env_logger::builder().is_test(true).try_init();

    let world = World::new()?;
    world.create_system(FrameCounter)?;
    world.set_target_framerate(500.0);

    let control = world.control();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(80));
        control.stop();
    });

    world.run()?;
    stopper
        .join()
        .map_err(|_| EcsError::Internal("stopper thread panicked"))?;

    assert!(world.control().is_stopped());
    assert!(!trace_of(&world)?.is_empty());
    Ok(())
}

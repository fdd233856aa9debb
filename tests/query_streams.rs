use kestrel_ecs::prelude::*;

#[derive(Clone, Debug, PartialEq)]
struct Position(f32, f32);
impl Component for Position {}

#[derive(Clone, Debug, PartialEq)]
struct Velocity(f32);
impl Component for Velocity {}

#[derive(Clone, Debug, PartialEq)]
struct Player(u32);
impl Component for Player {}

#[test]
fn caches_extend_incrementally_after_priming() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();

    let query = world.query().with::<Position>().build()?;
    // Prime against an empty registry.
    assert_eq!(query.entity_count()?, 0);
    assert!(!query.has_matches()?);

    let walker = entities.create_entity()?;
    entities.add_component(walker, Position(0.0, 0.0))?;
    assert_eq!(query.archetype_count()?, 1);
    assert_eq!(query.entity_count()?, 1);

    let runner = entities.create_entity()?;
    entities.add_component(runner, Position(1.0, 1.0))?;
    entities.add_component(runner, Velocity(2.0))?;
    assert_eq!(query.archetype_count()?, 2);
    assert_eq!(query.entity_count()?, 2);
    assert!(query.has_matches()?);
    Ok(())
}

#[test]
fn exclusion_filters_and_snapshots() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();

    let still = entities.create_entity()?;
    entities.add_component(still, Position(0.0, 0.0))?;
    let moving = entities.create_entity()?;
    entities.add_component(moving, Position(1.0, 1.0))?;
    entities.add_component(moving, Velocity(1.0))?;

    let stationary = world
        .query()
        .with::<Position>()
        .without::<Velocity>()
        .build()?;
    assert_eq!(stationary.entities()?, vec![still]);

    entities.set_enabled_state(still, false)?;
    assert!(stationary.entities()?.is_empty());
    assert_eq!(stationary.entities_unfiltered()?, vec![still]);
    Ok(())
}

#[test]
fn clones_share_one_cache() -> EcsResult<()> {
    let world = World::new()?;
    let query = world.query().with::<Position>().build()?;
    let clone = query.clone();
    assert_eq!(clone.entity_count()?, 0);

    let entity = world.entities().create_entity()?;
    world.entities().add_component(entity, Position(0.0, 0.0))?;
    assert_eq!(query.entity_count()?, 1);
    assert_eq!(clone.entity_count()?, 1);
    Ok(())
}

#[test]
fn singleton_lookups() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();
    let query = world.query().with::<Player>().build()?;

    assert!(matches!(
        query.singleton_entity(false),
        Err(EcsError::NoEntityFound)
    ));

    let player = entities.create_entity()?;
    entities.add_component(player, Player(7))?;
    assert_eq!(query.singleton_entity(false)?, player);
    assert_eq!(query.singleton::<Player>()?, Player(7));

    // A disabled singleton is invisible unless asked for.
    entities.set_enabled_state(player, false)?;
    assert!(matches!(
        query.singleton_entity(false),
        Err(EcsError::NoEntityFound)
    ));
    assert_eq!(query.singleton_entity(true)?, player);
    entities.set_enabled_state(player, true)?;

    let impostor = entities.create_entity()?;
    entities.add_component(impostor, Player(8))?;
    assert!(matches!(
        query.singleton_entity(false),
        Err(EcsError::MultipleSingletons { found: 2 })
    ));
    Ok(())
}

#[test]
fn streams_read_and_write_rows() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();
    for i in 0..3 {
        let entity = entities.create_entity()?;
        entities.add_component(entity, Position(i as f32, 0.0))?;
        entities.add_component(entity, Velocity(10.0))?;
    }

    let query = world.query().with::<Position>().with::<Velocity>().build()?;
    let mut stream = query.stream();
    let position = stream.write::<Position>();
    let velocity = stream.read::<Velocity>();

    stream.for_each(|row| {
        let speed = row.get::<Velocity>(velocity)?.0;
        row.get_mut::<Position>(position)?.0 += speed;
        Ok(())
    })?;

    let mut positions: Vec<f32> = Vec::new();
    for entity in query.entities()? {
        positions.push(entities.get_component::<Position>(entity)?.0);
    }
    positions.sort_by(f32::total_cmp);
    assert_eq!(positions, vec![10.0, 11.0, 12.0]);
    Ok(())
}

#[test]
fn streams_skip_disabled_rows() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();
    let active = entities.create_entity()?;
    entities.add_component(active, Position(0.0, 0.0))?;
    let dormant = entities.create_entity()?;
    entities.add_component(dormant, Position(0.0, 0.0))?;
    entities.set_enabled_state(dormant, false)?;

    let query = world.query().with::<Position>().build()?;
    let mut stream = query.stream();
    stream.read::<Position>();

    let mut seen = Vec::new();
    stream.for_each(|row| {
        seen.push(row.entity()?);
        Ok(())
    })?;
    assert_eq!(seen, vec![active]);
    Ok(())
}

#[test]
fn stream_field_access_is_checked() -> EcsResult<()> {
    let world = World::new()?;
    let entity = world.entities().create_entity()?;
    world.entities().add_component(entity, Position(0.0, 0.0))?;
    world.entities().add_component(entity, Velocity(1.0))?;

    let query = world.query().with::<Position>().with::<Velocity>().build()?;
    let mut stream = query.stream();
    let position = stream.read::<Position>();

    stream.for_each(|row| {
        // Read-only fields refuse mutable access.
        assert!(matches!(
            row.get_mut::<Position>(position),
            Err(EcsError::Internal(_))
        ));
        // A field handle only resolves its declared component type.
        assert!(matches!(
            row.get::<Velocity>(position),
            Err(EcsError::TypeMismatch(_))
        ));
        Ok(())
    })
}

#[test]
fn fields_outside_the_filter_resolve_per_archetype() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();
    let plain = entities.create_entity()?;
    entities.add_component(plain, Position(1.0, 0.0))?;
    let mover = entities.create_entity()?;
    entities.add_component(mover, Position(2.0, 0.0))?;
    entities.add_component(mover, Velocity(3.0))?;

    // Velocity is declared but not part of the filter, so one of the two
    // matched archetypes has no column for it.
    let query = world.query().with::<Position>().build()?;
    let mut stream = query.stream();
    let position = stream.read::<Position>();
    let velocity = stream.read::<Velocity>();

    let mut speeds = Vec::new();
    stream.for_each(|row| {
        let _ = row.get::<Position>(position)?;
        match row.get::<Velocity>(velocity) {
            Ok(value) => speeds.push(value.0),
            Err(EcsError::ComponentNotFound { .. }) => {}
            Err(other) => return Err(other),
        }
        Ok(())
    })?;
    assert_eq!(speeds, vec![3.0]);
    Ok(())
}

#[test]
fn change_filter_skips_untouched_archetypes() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();
    let entity = entities.create_entity()?;
    entities.add_component(entity, Position(0.0, 0.0))?;
    entities.add_component(entity, Velocity(0.0))?;

    world.update(0.0)?;
    let watermark = world.current_tick();
    world.update(0.0)?;
    entities.write_component(entity, |velocity: &mut Velocity| velocity.0 = 5.0)?;

    let query = world.query().with::<Position>().with::<Velocity>().build()?;

    // A watched write after the watermark triggers the visit.
    let mut watched = query.stream();
    watched.read::<Position>();
    watched.read::<Velocity>();
    watched.changed_since(watermark);
    let mut visited = 0;
    watched.for_each(|_| {
        visited += 1;
        Ok(())
    })?;
    assert_eq!(visited, 1);

    // Nothing has changed since the current tick.
    let mut quiet = query.stream();
    quiet.read::<Position>();
    quiet.read::<Velocity>();
    quiet.changed_since(world.current_tick());
    let mut quiet_visits = 0;
    quiet.for_each(|_| {
        quiet_visits += 1;
        Ok(())
    })?;
    assert_eq!(quiet_visits, 0);
    Ok(())
}

#[test]
fn forced_fields_never_trigger_visits_alone() -> EcsResult<()> {
    let world = World::new()?;
    let entities = world.entities();
    let entity = entities.create_entity()?;
    entities.add_component(entity, Position(0.0, 0.0))?;
    entities.add_component(entity, Velocity(0.0))?;

    world.update(0.0)?;
    let watermark = world.current_tick();
    world.update(0.0)?;
    entities.write_component(entity, |velocity: &mut Velocity| velocity.0 = 5.0)?;

    let query = world.query().with::<Position>().with::<Velocity>().build()?;
    let mut stream = query.stream();
    stream.read::<Position>();
    let velocity = stream.read_always::<Velocity>();
    stream.changed_since(watermark);

    let mut visited = 0;
    stream.for_each(|row| {
        // Still readable whenever a visit happens for another reason.
        let _ = row.get::<Velocity>(velocity)?;
        visited += 1;
        Ok(())
    })?;
    assert_eq!(visited, 0);

    // A write to the watched field makes the forced one readable again.
    entities.write_component(entity, |position: &mut Position| position.1 = 1.0)?;
    let mut values = Vec::new();
    stream.for_each(|row| {
        values.push(row.get::<Velocity>(velocity)?.0);
        Ok(())
    })?;
    assert_eq!(values, vec![5.0]);
    Ok(())
}

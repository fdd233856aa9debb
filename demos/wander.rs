//! Minimal wandering-agents simulation.
//!
//! Run with `RUST_LOG=debug cargo run --example wander` to watch the
//! runtime's command flushes and garbage-collection sweeps.

use std::time::Duration;

use kestrel_ecs::prelude::*;

const AGENTS: usize = 64;

#[derive(Clone, Copy, Debug)]
struct Position {
    x: f32,
    y: f32,
}
impl Component for Position {}

#[derive(Clone, Copy, Debug)]
struct Heading {
    dx: f32,
    dy: f32,
}
impl Component for Heading {}

struct WanderSystem {
    movers: Option<Query>,
}

impl System for WanderSystem {
    fn on_create(&mut self, world: &World) -> EcsResult<()> {
        self.movers = Some(
            world
                .query()
                .with::<Position>()
                .with::<Heading>()
                .build()?,
        );
        Ok(())
    }

    fn on_update(&mut self, _world: &World, delta_time: f64) -> EcsResult<()> {
        let Some(movers) = &self.movers else { return Ok(()) };

        let mut stream = movers.stream();
        let position = stream.write::<Position>();
        let heading = stream.read::<Heading>();
        stream.for_each(|row| {
            let step = *row.get::<Heading>(heading)?;
            let place = row.get_mut::<Position>(position)?;
            place.x += step.dx * delta_time as f32;
            place.y += step.dy * delta_time as f32;
            Ok(())
        })
    }
}

fn main() -> EcsResult<()> {
    env_logger::init();

    let world = World::new()?;
    for i in 0..AGENTS {
        let angle = i as f32 * std::f32::consts::TAU / AGENTS as f32;
        let agent = world.entities().create_entity()?;
        world
            .entities()
            .add_component(agent, Position { x: 0.0, y: 0.0 })?;
        world.entities().add_component(
            agent,
            Heading {
                dx: angle.cos(),
                dy: angle.sin(),
            },
        )?;
    }
    world.create_system(WanderSystem { movers: None })?;
    world.set_target_framerate(120.0);

    let control = world.control();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(2));
        control.stop();
    });
    world.run()?;

    let movers = world.query().with::<Position>().build()?;
    let mut farthest = 0.0f32;
    for agent in movers.entities()? {
        let distance = world
            .entities()
            .read_component(agent, |place: &Position| place.x.hypot(place.y))?;
        farthest = farthest.max(distance);
    }
    println!(
        "{} agents wandered up to {farthest:.2} units",
        movers.entity_count()?
    );
    Ok(())
}

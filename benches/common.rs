#![allow(dead_code)]

use kestrel_ecs::{Component, EcsResult, World};

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
impl Component for Position {}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}
impl Component for Wealth {}

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}
impl Component for Productivity {}

pub fn setup_world(agent_count: usize) -> EcsResult<World> {
    let world = World::new()?;
    let commands = world.commands();

    for _ in 0..agent_count {
        let entity = commands.create_entity()?;
        commands.add_component(entity, Position { x: 0.0, y: 0.0 })?;
        commands.add_component(entity, Wealth { value: 100.0 })?;
        commands.add_component(entity, Productivity { rate: 1.0 })?;
    }
    commands.flush()?;

    Ok(world)
}

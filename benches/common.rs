#![allow(dead_code)]

use strata::engine::error::ECSResult;
use strata::engine::world::World;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}

pub fn agent(i: usize) -> (Position, Wealth, Productivity) {
    (
        Position { x: i as f32, y: 0.0 },
        Wealth { value: 100.0 },
        Productivity { rate: 1.0 },
    )
}

pub fn setup_world(agent_count: usize) -> ECSResult<World> {
    let mut world = World::new();
    world.reserve_for::<(Position, Wealth, Productivity)>(agent_count)?;
    world.spawn_batch((0..agent_count).map(agent))?;
    Ok(world)
}

use strata::engine::component::Bundle;
use strata::engine::config::WorldConfig;
use strata::engine::error::{ConfigError, ECSError, NotFoundError};
use strata::engine::world::World;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(i32);

#[derive(Debug, Clone, PartialEq)]
struct Name(String);

#[test]
fn spawn_then_read_round_trips() {
    let mut world = World::new();
    let e = world
        .spawn((Position { x: 1.0, y: 2.0 }, Health(7), Name("scout".into())))
        .unwrap();

    assert_eq!(*world.get::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
    assert_eq!(*world.get::<Health>(e).unwrap(), Health(7));
    assert_eq!(world.get::<Name>(e).unwrap().0, "scout");
    world.check_invariants().unwrap();
}

#[test]
fn adding_present_kind_keeps_existing_value() {
    let mut world = World::new();
    let e = world.spawn((Health(10),)).unwrap();
    let before = world.location(e).unwrap();

    world.add_components(e, (Health(99),)).unwrap();

    assert_eq!(*world.get::<Health>(e).unwrap(), Health(10));
    assert_eq!(world.location(e), Some(before));
}

#[test]
fn adding_mixed_kinds_only_attaches_new_ones() {
    let mut world = World::new();
    let e = world.spawn((Health(10),)).unwrap();

    world.add_components(e, (Health(99), Position { x: 3.0, y: 4.0 })).unwrap();

    assert_eq!(*world.get::<Health>(e).unwrap(), Health(10));
    assert_eq!(*world.get::<Position>(e).unwrap(), Position { x: 3.0, y: 4.0 });
    world.check_invariants().unwrap();
}

#[test]
fn removing_components_relocates_and_fixes_moved_entity() {
    let mut world = World::new();
    let a = world.spawn((Position { x: 0.0, y: 0.0 }, Health(1))).unwrap();
    let b = world.spawn((Position { x: 1.0, y: 1.0 }, Health(2))).unwrap();

    world.remove_components::<(Health,)>(a).unwrap();

    assert!(!world.has::<Health>(a));
    assert_eq!(*world.get::<Position>(a).unwrap(), Position { x: 0.0, y: 0.0 });
    assert_eq!(world.location(b).unwrap().row, 0);
    assert_eq!(*world.get::<Health>(b).unwrap(), Health(2));
    world.check_invariants().unwrap();
}

#[test]
fn removing_absent_kind_is_a_no_op() {
    let mut world = World::new();
    let e = world.spawn((Health(3),)).unwrap();
    let before = world.location(e);

    world.remove_components::<(Name,)>(e).unwrap();

    assert_eq!(world.location(e), before);
}

#[test]
fn missing_component_is_signature_mismatch() {
    let mut world = World::new();
    let e = world.spawn((Health(3),)).unwrap();
    world.spawn((Position { x: 0.0, y: 0.0 },)).unwrap();

    assert!(matches!(world.get::<Position>(e), Err(ECSError::SignatureMismatch(_))));
}

#[test]
fn killed_entities_are_not_found() {
    let mut world = World::new();
    let e = world.spawn((Health(3),)).unwrap();
    world.kill(e).unwrap();

    assert!(!world.contains(e));
    assert_eq!(world.kill(e), Err(ECSError::NotFound(NotFoundError::Entity(e))));
    assert!(world.add_components(e, (Health(1),)).unwrap_err().is_not_found());
    assert!(world.get::<Health>(e).unwrap_err().is_not_found());

    let reused = world.spawn((Health(4),)).unwrap();
    assert_eq!(reused.index(), e.index());
    assert!(!world.contains(e));
    assert_eq!(*world.get::<Health>(reused).unwrap(), Health(4));
}

#[test]
fn empty_bundle_spawns_into_empty_archetype() {
    let mut world = World::new();
    let e = world.spawn(()).unwrap();
    assert!(world.signature_of(e).unwrap().is_empty());

    world.add_components(e, Bundle::new().with(Health(5))).unwrap();
    assert_eq!(*world.get::<Health>(e).unwrap(), Health(5));
    world.check_invariants().unwrap();
}

#[test]
fn spawn_batch_keeps_order() {
    let mut world = World::new();
    let spawned = world.spawn_batch((0..100).map(|i| (Health(i),))).unwrap();

    assert_eq!(world.len(), 100);
    for (i, e) in spawned.iter().enumerate() {
        assert_eq!(*world.get::<Health>(*e).unwrap(), Health(i as i32));
    }
}

#[test]
fn reserve_for_preallocates_table() {
    let mut world = World::new();
    world.reserve_for::<(Position, Health)>(500).unwrap();

    let id = world
        .archetypes()
        .iter()
        .find(|table| table.len() == 0 && table.signature().len() == 2)
        .map(|table| table.archetype_id())
        .unwrap();
    assert!(world.archetype(id).unwrap().capacity() >= 500);
}

#[test]
fn get_mut_writes_through() {
    let mut world = World::new();
    let e = world.spawn((Position { x: 0.0, y: 0.0 },)).unwrap();

    world.get_mut::<Position>(e).unwrap().x = 9.0;

    assert_eq!(world.get::<Position>(e).unwrap().x, 9.0);
}

#[test]
fn resources_are_explicit() {
    #[derive(Debug, PartialEq)]
    struct Clock(u64);

    let mut world = World::new();
    assert!(world.resource::<Clock>().unwrap_err().is_not_found());

    world.insert_resource(Clock(1));
    world.resource_mut::<Clock>().unwrap().0 += 1;
    world.get_resource_mut::<Clock>().unwrap().0 += 1;

    assert_eq!(*world.resource::<Clock>().unwrap(), Clock(3));
    assert_eq!(world.remove_resource::<Clock>(), Some(Clock(3)));
    assert!(!world.contains_resource::<Clock>());
}

#[test]
fn config_loads_from_toml() {
    let config = WorldConfig::from_toml_str("initial_table_capacity = 8\ngrowth_factor = 4\n").unwrap();
    assert_eq!(config.initial_table_capacity, 8);
    assert_eq!(config.growth_factor, 4);
    assert_eq!(config.initial_entity_capacity, 0);

    let mut world = World::with_config(config).unwrap();
    let e = world.spawn((Health(1),)).unwrap();
    let table = world.archetype(world.location(e).unwrap().archetype).unwrap();
    assert_eq!(table.capacity(), 8);

    assert!(matches!(
        WorldConfig::from_toml_str("initial_table_capacity = 0"),
        Err(ConfigError::Invalid { field: "initial_table_capacity", .. })
    ));
    assert!(matches!(
        WorldConfig::from_toml_str("growth = 3"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn kill_swaps_last_row_into_vacated_slot() {
    let mut world = World::new();
    let e1 = world.spawn((Health(1),)).unwrap();
    let e2 = world.spawn((Health(2),)).unwrap();
    let e3 = world.spawn((Health(3),)).unwrap();
    let table_id = world.location(e1).unwrap().archetype;

    world.kill(e2).unwrap();

    let table = world.archetype(table_id).unwrap();
    assert_eq!(table.entities(), &[e1, e3]);
    assert_eq!(world.location(e3).unwrap().row, 1);
    assert_eq!(*world.get::<Health>(e3).unwrap(), Health(3));
    world.check_invariants().unwrap();
}

#[test]
fn reserve_preserves_existing_rows() {
    let mut world = World::new();
    let spawned = world.spawn_batch((0..10).map(|i| (Health(i),))).unwrap();

    world.reserve_for::<(Health,)>(10_000).unwrap();

    for (i, e) in spawned.iter().enumerate() {
        assert_eq!(*world.get::<Health>(*e).unwrap(), Health(i as i32));
    }
    world.check_invariants().unwrap();
}

#[test]
fn table_view_exposes_typed_slices() {
    let mut world = World::new();
    let e = world.spawn((Health(5), Position { x: 1.0, y: 1.0 })).unwrap();
    let table_id = world.location(e).unwrap().archetype;
    assert!(world.archetype(table_id).unwrap().has_components::<(Position, Health)>());

    {
        let mut view = world.view::<(&Position, &mut Health)>(table_id).unwrap();
        let (positions, health) = view.slices();
        health[0].0 += positions[0].x as i32;
    }

    assert_eq!(*world.get::<Health>(e).unwrap(), Health(6));
}

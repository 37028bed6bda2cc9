use strata::engine::entity::Entity;
use strata::engine::error::ECSError;
use strata::engine::query::{query_access, Changed, Query, With, Without};
use strata::engine::types::SystemTicks;
use strata::engine::world::World;

#[derive(Debug, Clone, Copy, PartialEq)]
struct A(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct B(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct C(u32);

/// Tables {A,B}, {A,B,C} and {A}, one entity each.
fn three_tables() -> (World, [Entity; 3]) {
    let mut world = World::new();
    let ab = world.spawn((A(1), B(1))).unwrap();
    let abc = world.spawn((A(2), B(2), C(2))).unwrap();
    let a = world.spawn((A(3),)).unwrap();
    (world, [ab, abc, a])
}

#[test]
fn with_and_without_select_tables() {
    let (world, _) = three_tables();

    let mut query = Query::<&A, (With<B>, Without<C>)>::new(&world).unwrap();
    let mut borrow = query.borrow().unwrap();
    let values: Vec<u32> = borrow.iter().map(|a| a.0).collect();
    assert_eq!(values, vec![1]);
}

#[test]
fn inclusion_matches_supersets_in_discovery_order() {
    let (world, [ab, abc, _]) = three_tables();

    let mut query = Query::<(Entity, &A, &B)>::new(&world).unwrap();
    assert_eq!(query.matched_archetypes().len(), 2);

    let mut borrow = query.borrow().unwrap();
    let rows: Vec<(Entity, u32, u32)> = borrow
        .iter()
        .map(|(e, a, b)| (e, a.0, b.0))
        .collect();
    assert_eq!(rows, vec![(ab, 1, 1), (abc, 2, 2)]);
}

#[test]
fn iteration_is_restartable() {
    let (world, _) = three_tables();

    let mut query = Query::<&A>::new(&world).unwrap();
    let mut borrow = query.borrow().unwrap();
    assert_eq!(borrow.count(), 3);
    assert_eq!(borrow.count(), 3);
}

#[test]
fn with_entity_yields_handles() {
    let (world, [ab, abc, a]) = three_tables();

    let mut query = Query::<&A>::new(&world).unwrap();
    let mut borrow = query.borrow().unwrap();
    let entities: Vec<Entity> = borrow.iter_with_entity().map(|(e, _)| e).collect();
    assert_eq!(entities, vec![ab, abc, a]);
}

#[test]
fn new_tables_are_picked_up_on_next_borrow() {
    let (mut world, _) = three_tables();
    {
        let mut query = Query::<&C>::new(&world).unwrap();
        assert_eq!(query.borrow().unwrap().count(), 1);
    }

    world.spawn((C(9),)).unwrap();

    let mut query = Query::<&C>::new(&world).unwrap();
    let mut borrow = query.borrow().unwrap();
    let values: Vec<u32> = borrow.iter().map(|c| c.0).collect();
    assert_eq!(values, vec![2, 9]);
}

#[test]
fn writes_through_mut_are_visible() {
    let (world, [ab, ..]) = three_tables();

    {
        let mut query = Query::<(&mut A, &B)>::new(&world).unwrap();
        query.borrow().unwrap().for_each(|(mut a, b)| a.0 += b.0 * 10);
    }

    assert_eq!(*world.get::<A>(ab).unwrap(), A(11));
}

#[test]
fn get_looks_up_single_entity() {
    let (world, [ab, _, a]) = three_tables();

    let mut query = Query::<&B>::new(&world).unwrap();
    let mut borrow = query.borrow().unwrap();
    assert_eq!(borrow.get(ab).map(|b| b.0), Some(1));
    assert!(borrow.get(a).is_none());
}

#[test]
fn changed_compares_strictly_against_last_run() {
    let (world, [ab, abc, a]) = three_tables();
    let observed = world.change_tick();

    // Nothing written after `observed`.
    let mut query = Query::<Entity, Changed<A>>::with_ticks(&world, SystemTicks::new(observed, observed + 1)).unwrap();
    assert_eq!(query.borrow().unwrap().count(), 0);

    world.get_mut::<A>(abc).unwrap().0 = 20;

    let now = world.increment_change_tick();
    let mut query = Query::<Entity, Changed<A>>::with_ticks(&world, SystemTicks::new(observed, now)).unwrap();
    let changed: Vec<Entity> = query.borrow().unwrap().iter().collect();
    assert_eq!(changed, vec![abc]);

    // A window starting at 0 sees every spawned row.
    let mut query = Query::<Entity, Changed<A>>::with_ticks(&world, SystemTicks::new(0, now)).unwrap();
    let all: Vec<Entity> = query.borrow().unwrap().iter().collect();
    assert_eq!(all, vec![ab, abc, a]);
}

#[test]
fn mut_only_stamps_on_write() {
    let (world, [ab, ..]) = three_tables();
    let observed = world.change_tick();

    {
        let now = world.increment_change_tick();
        let mut query = Query::<&mut B>::with_ticks(&world, SystemTicks::new(observed, now)).unwrap();
        query.borrow().unwrap().for_each(|b| {
            let _ = b.0;
        });
    }

    let now = world.increment_change_tick();
    let mut query = Query::<Entity, Changed<B>>::with_ticks(&world, SystemTicks::new(observed, now)).unwrap();
    assert_eq!(query.borrow().unwrap().count(), 0);
    drop(query);

    {
        let now = world.increment_change_tick();
        let mut query = Query::<(Entity, &mut B)>::with_ticks(&world, SystemTicks::new(observed, now)).unwrap();
        query.borrow().unwrap().for_each(|(e, mut b)| {
            if e == ab {
                b.0 = 100;
            }
        });
    }

    let now = world.increment_change_tick();
    let mut query = Query::<Entity, Changed<B>>::with_ticks(&world, SystemTicks::new(observed, now)).unwrap();
    let changed: Vec<Entity> = query.borrow().unwrap().iter().collect();
    assert_eq!(changed, vec![ab]);
}

#[test]
fn conflicting_access_is_rejected() {
    let (world, _) = three_tables();
    assert!(matches!(
        Query::<(&A, &mut A)>::new(&world),
        Err(ECSError::InvalidQueryAccess(_))
    ));
    assert!(matches!(
        query_access::<(&mut A, &mut A), ()>(),
        Err(ECSError::InvalidQueryAccess(_))
    ));
}

#[test]
fn declared_access_feeds_planner() {
    let access = query_access::<(&mut A, &B), (With<C>, Changed<B>)>().unwrap();
    let other = query_access::<&B, ()>().unwrap();
    let writer = query_access::<&mut B, ()>().unwrap();

    assert!(!access.conflicts_with(&other));
    assert!(access.conflicts_with(&writer));
    assert_eq!(access.write.len(), 1);
}

#[test]
fn table_slices_cover_whole_tables() {
    let (world, _) = three_tables();

    let mut query = Query::<(&A, &B)>::new(&world).unwrap();
    let mut borrow = query.borrow().unwrap();
    let lengths: Vec<usize> = borrow
        .iter_tables()
        .map(|(entities, (a, b))| {
            assert_eq!(a.len(), b.len());
            entities.len()
        })
        .collect();
    assert_eq!(lengths, vec![1, 1]);
}

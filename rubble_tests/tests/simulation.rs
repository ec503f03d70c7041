//! End-to-end simulation scenarios driven straight through the world, with
//! real rapier stepping and no session layer.

use rubble_server::rock::{Neutrality, GRAB_MAX_SCALE, SPLIT_SCALE_RATIO};
use rubble_shared::math::Vec2;
use rubble_tests::{assert_ownership_consistent, quiet_world};

#[test]
fn depleted_rock_splits_after_exactly_one_tick() {
    let mut world = quiet_world();
    let id = world
        .spawn_rock_at(Vec2::new(100.0, 100.0), 2.0, 3)
        .expect("rock spawns");
    let parent_scale = world.rocks[&id].scale;
    let parent_chunk = world.rocks[&id].chunk;

    // Drain the tier-3 health pool (246) slightly past zero.
    world.rocks.get_mut(&id).unwrap().apply_damage(250.0);

    // Tick 1: the split is armed but deferred, so a final update goes out.
    world.step();
    assert!(world.rocks.contains_key(&id), "rock must survive one tick");
    assert_eq!(world.rocks.len(), 1);
    assert!(world.rocks[&id].splitting.is_some());

    // Tick 2: the split executes.
    world.step();
    assert!(!world.rocks.contains_key(&id), "parent gone from registry");
    assert!(
        !world.grid.chunk(parent_chunk).rocks.contains(&id),
        "parent gone from its chunk"
    );
    assert_eq!(world.rocks.len(), 2, "exactly two fragments");
    for child in world.rocks.values() {
        assert!(
            (child.scale - parent_scale * SPLIT_SCALE_RATIO).abs() < 1e-3,
            "child scale {} should be ~3/5 of parent {}",
            child.scale,
            parent_scale
        );
        assert_eq!(child.texture, 3, "fragments inherit the texture tier");
    }
}

#[test]
fn tiny_depleted_rock_is_deleted_instead_of_split() {
    let mut world = quiet_world();
    let id = world
        .spawn_rock_at(Vec2::new(100.0, 100.0), 0.05, 1)
        .expect("rock spawns");
    world.rocks.get_mut(&id).unwrap().apply_damage(1000.0);
    world.step();
    world.step();
    assert!(world.rocks.is_empty(), "no fragments below the minimum scale");
}

#[test]
fn grabbed_rock_survives_owner_disconnect() {
    let mut world = quiet_world();
    let pid = world.spawn_player("grabber");
    let rid = world
        .spawn_rock_at(Vec2::new(160.0, 150.0), 1.5, 1)
        .expect("rock spawns");
    world.rocks.get_mut(&rid).unwrap().neutrality = Neutrality::Cleared;

    world.try_grab(rid, pid, GRAB_MAX_SCALE);
    assert_eq!(world.rocks[&rid].owner, Some(pid));
    assert!(world.players[&pid].rocks.contains(&rid));
    assert_ownership_consistent(&world);

    world.despawn_player(pid);
    assert!(world.rocks.contains_key(&rid), "rock outlives its owner");
    assert_eq!(world.rocks[&rid].owner, None);
    assert_ownership_consistent(&world);
}

#[test]
fn neutral_rock_blocks_excluded_party_only() {
    let mut world = quiet_world();
    let shooter = world.spawn_player("shooter");
    let other = world.spawn_player("other");
    let rid = world
        .spawn_rock_at(Vec2::new(120.0, 120.0), 1.0, 1)
        .expect("rock spawns");

    // Shooter-neutral: the excluded party cannot grab, anyone else can.
    world.rocks.get_mut(&rid).unwrap().neutrality = Neutrality::Toward(shooter);
    world.try_grab(rid, shooter, GRAB_MAX_SCALE);
    assert_eq!(world.rocks[&rid].owner, None);
    world.try_grab(rid, other, GRAB_MAX_SCALE);
    assert_eq!(world.rocks[&rid].owner, Some(other));

    // Spawn-window neutrality blocks everyone.
    let fresh = world
        .spawn_rock_at(Vec2::new(130.0, 130.0), 1.0, 1)
        .expect("rock spawns");
    world.try_grab(fresh, other, GRAB_MAX_SCALE);
    assert_eq!(world.rocks[&fresh].owner, None);
    assert_ownership_consistent(&world);
}

#[test]
fn same_owner_rocks_take_no_contact_damage() {
    let mut world = quiet_world();
    let pid = world.spawn_player("holder");
    let a = world
        .spawn_rock_at(Vec2::new(100.0, 100.0), 2.0, 2)
        .expect("rock spawns");
    let b = world
        .spawn_rock_at(Vec2::new(100.5, 100.2), 2.0, 2)
        .expect("rock spawns");

    for id in [a, b] {
        let rock = world.rocks.get_mut(&id).unwrap();
        rock.neutrality = Neutrality::Cleared;
        rock.owner = Some(pid);
    }
    let player = world.players.get_mut(&pid).unwrap();
    player.rocks.push(a);
    player.rocks.push(b);

    // Opposing velocities: an enabled contact would deal impact damage.
    let body_a = world.rocks[&a].body;
    let body_b = world.rocks[&b].body;
    world.physics.set_linvel(body_a, Vec2::new(5.0, 0.0));
    world.physics.set_linvel(body_b, Vec2::new(-5.0, 0.0));

    world.step_physics();

    for id in [a, b] {
        let rock = &world.rocks[&id];
        assert_eq!(
            rock.health, rock.max_health,
            "same-owner contact must be disabled"
        );
    }
    assert_ownership_consistent(&world);
}

#[test]
fn unowned_overlapping_rocks_do_take_impact_damage() {
    let mut world = quiet_world();
    let a = world
        .spawn_rock_at(Vec2::new(100.0, 100.0), 2.0, 2)
        .expect("rock spawns");
    let b = world
        .spawn_rock_at(Vec2::new(100.5, 100.2), 2.0, 2)
        .expect("rock spawns");

    for id in [a, b] {
        world.rocks.get_mut(&id).unwrap().neutrality = Neutrality::Cleared;
    }
    let body_a = world.rocks[&a].body;
    let body_b = world.rocks[&b].body;
    world.physics.set_linvel(body_a, Vec2::new(5.0, 0.0));
    world.physics.set_linvel(body_b, Vec2::new(-5.0, 0.0));

    world.step_physics();

    for id in [a, b] {
        let rock = &world.rocks[&id];
        assert!(
            rock.health < rock.max_health,
            "fast contact between free rocks must deal damage"
        );
    }
}

#[test]
fn death_splits_once_and_respawn_resets_levels() {
    let mut world = quiet_world();
    let pid = world.spawn_player("mortal");
    let base_radius = world.players[&pid].radius;

    world
        .players
        .get_mut(&pid)
        .unwrap()
        .apply_damage(4000.0, 1.0);

    // Death tick: avatar splits into two fragments, body gone, timer armed.
    world.step();
    {
        let p = &world.players[&pid];
        assert!(p.respawn_timer.is_some());
        assert!(p.body.is_none());
    }
    assert_eq!(world.rocks.len(), 2, "death yields exactly two fragments");

    // No double-death while counting down; health stays clamped.
    for _ in 0..80 {
        world.step();
        let p = &world.players[&pid];
        assert!(p.health >= 0.0 && p.health <= p.max_health);
        assert_eq!(world.rocks.len(), 2, "no second split during one death cycle");
    }

    let p = &world.players[&pid];
    assert!(p.respawn_timer.is_none(), "respawn completed");
    assert!(p.body.is_some());
    assert_eq!(p.health, p.max_health);
    assert!((p.radius - base_radius).abs() < 1e-3, "levels reset");
}

#[test]
fn small_owned_rock_homes_in_and_is_consumed() {
    let mut world = quiet_world();
    let pid = world.spawn_player("eater");
    let rid = world
        .spawn_rock_at(Vec2::new(152.0, 150.0), 0.5, 2)
        .expect("rock spawns");
    world.rocks.get_mut(&rid).unwrap().neutrality = Neutrality::Cleared;
    world.try_grab(rid, pid, GRAB_MAX_SCALE);
    assert_eq!(world.rocks[&rid].owner, Some(pid));

    let area_before = world.players[&pid].area;
    for _ in 0..60 {
        world.step();
        assert_ownership_consistent(&world);
        if !world.rocks.contains_key(&rid) {
            break;
        }
    }

    assert!(
        !world.rocks.contains_key(&rid),
        "owned small rock is consumed on arrival"
    );
    let p = &world.players[&pid];
    assert!(p.rocks.is_empty());
    assert!(p.area > area_before, "consumption grows the player");
}

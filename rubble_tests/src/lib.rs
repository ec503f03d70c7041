//! Shared helpers for the integration tests.

use rubble_server::world::World;
use rubble_shared::config::GameConfig;

/// A world with no random rock top-up, so scenarios control every entity.
pub fn quiet_world() -> World {
    let cfg = GameConfig {
        target_rocks: 0,
        ..Default::default()
    };
    World::new(cfg).expect("default config is valid")
}

/// Asserts the owner/owned-rocks invariant in both directions.
pub fn assert_ownership_consistent(world: &World) {
    for (id, rock) in &world.rocks {
        if let Some(owner) = rock.owner {
            let player = world
                .players
                .get(&owner)
                .unwrap_or_else(|| panic!("rock {id:?} owned by missing player {owner:?}"));
            assert!(
                player.rocks.contains(id),
                "rock {id:?} not in owner {owner:?}'s collection"
            );
        }
    }
    for (pid, player) in &world.players {
        for rock_id in &player.rocks {
            let rock = world
                .rocks
                .get(rock_id)
                .unwrap_or_else(|| panic!("player {pid:?} holds missing rock {rock_id:?}"));
            assert_eq!(
                rock.owner,
                Some(*pid),
                "rock {rock_id:?} does not point back at {pid:?}"
            );
        }
    }
}

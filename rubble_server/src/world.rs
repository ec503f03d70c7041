//! The authoritative entity arena and per-tick entity logic.
//!
//! One store owns every live entity by id; chunk membership, rock ownership
//! and session bindings are id-based lookups into it, never aliased
//! references. All mutation happens from the tick loop. Invariant failures
//! (a body that vanished, a hull that cannot be built) delete the offending
//! entity and the tick continues for everyone else.

use std::collections::HashMap;

use rand::Rng;
use tracing::{debug, info, warn};

use rubble_shared::config::GameConfig;
use rubble_shared::math::Vec2;
use rubble_shared::msg::TileInfo;
use rubble_shared::protocol::{DeltaBatch, PlayerId, RockId};

use crate::collision::{CollisionResolver, ContactAction};
use crate::grid::SpatialGrid;
use crate::physics::PhysicsWorld;
use crate::player::{
    Player, BODY_RADIUS_DIVISOR, BOOST_DELAY_TICKS, CHUNK_REFRESH_TICKS, HEALTH_REGEN,
    MAX_OWNED_ROCKS, RESPAWN_TICKS, SENSOR_RADIUS_DIVISOR, SHOOT_CHARGE_RATE,
    SHOOT_COOLDOWN_TICKS, SHOOT_METER_MAX, SHOOT_METER_REGEN, STALL_DELAY_TICKS, VULNERABLE_TICKS,
};
use crate::replication::Replication;
use crate::rock::{
    self, Neutrality, Rock, CONSUME_MAX_SCALE, GRAB_MAX_SCALE, HOMING_DEADZONE, HOMING_GAIN,
    MIN_SPLIT_SCALE, NEUTRAL_WINDOW_TICKS, PLAYER_ROCK_TEXTURE, REGRAB_MAX_SCALE,
    SPLIT_DELAY_TICKS, SPLIT_SCALE_RATIO,
};

/// Scale of the rock spawned by a released shot.
const SHOT_ROCK_SCALE: f32 = 0.6;
/// Scale of the two fragments a dying player breaks into.
const DEATH_FRAGMENT_SCALE: f32 = 0.25;
/// Shot speed per unit of accumulated charge.
const SHOT_SPEED_FACTOR: f32 = 0.5;

/// One static backdrop tile; replicated once during onboarding.
#[derive(Debug, Clone)]
pub struct Tile {
    pub id: u32,
    pub pos: Vec2,
    pub length: f32,
    pub color: u8,
    pub alert: bool,
    pub chunk: usize,
}

impl Tile {
    pub fn info(&self) -> TileInfo {
        TileInfo {
            id: self.id,
            x: (self.pos.x * 100.0) as i32,
            y: (self.pos.y * 100.0) as i32,
            length: (self.length * 100.0) as i32,
            color: self.color,
            alert: self.alert,
        }
    }
}

/// The world: physics, grid, registries, replication, and the tick counter.
pub struct World {
    pub cfg: GameConfig,
    pub tick: u32,
    pub physics: PhysicsWorld,
    pub grid: SpatialGrid,
    pub players: HashMap<PlayerId, Player>,
    pub rocks: HashMap<RockId, Rock>,
    pub tiles: Vec<Tile>,
    pub replication: Replication,
    pub resolver: CollisionResolver,
    next_id: u32,
}

impl World {
    pub fn new(cfg: GameConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let grid = SpatialGrid::new(&cfg);
        let tiles = init_tiles(&cfg, &grid);
        let mut world = Self {
            physics: PhysicsWorld::new(1.0 / cfg.tick_hz as f32),
            grid,
            tiles,
            cfg,
            tick: 0,
            players: HashMap::new(),
            rocks: HashMap::new(),
            replication: Replication::new(),
            resolver: CollisionResolver::new(),
            next_id: 1,
        };
        for _ in 0..world.cfg.target_rocks {
            world.spawn_random_rock();
        }
        Ok(world)
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// One full simulation tick. The session layer interleaves onboarding and
    /// flushing between these phases; tests drive the world with this alone.
    pub fn step(&mut self) {
        self.step_physics();
        self.tick_entities();
        self.end_tick();
    }

    /// Advances physics one fixed timestep and applies the contact rules.
    pub fn step_physics(&mut self) {
        self.resolver.begin_step(&self.rocks);
        self.physics.step(&self.resolver, &self.resolver);
        self.apply_contact_actions();
    }

    /// Ticks players, then tops up and ticks rocks.
    pub fn tick_entities(&mut self) {
        self.tick_players();
        self.top_up_rocks();
        self.tick_rocks();
    }

    /// Clears the tick's replication accumulators and advances the counter.
    pub fn end_tick(&mut self) {
        self.replication.reset();
        self.tick += 1;
    }

    // ─── Players ───

    pub fn spawn_player(&mut self, name: &str) -> PlayerId {
        let id = PlayerId(self.alloc_id());
        let name = if name.is_empty() {
            "unnamed friend".to_string()
        } else {
            name.to_string()
        };
        let center = Vec2::new(self.cfg.world_width / 2.0, self.cfg.world_width / 2.0);
        let mut player = Player::new(id, name, center);
        player.body = Some(self.physics.spawn_player_body(
            id,
            center,
            player.radius / BODY_RADIUS_DIVISOR,
            player.grab_radius / SENSOR_RADIUS_DIVISOR,
            player.power,
        ));
        player.chunk = self.grid.locate(center);
        player.chunk_timer = CHUNK_REFRESH_TICKS;
        player.interest = self.grid.neighbors(player.chunk);
        self.grid.insert_player(player.chunk, id);
        self.replication.add_player(player.chunk, &player.add_record());
        info!(player = ?id, name = %player.name, "Player joined");
        self.players.insert(id, player);
        id
    }

    /// Disconnect handling: owned rocks are released, never deleted.
    pub fn despawn_player(&mut self, id: PlayerId) {
        let Some(mut player) = self.players.remove(&id) else {
            return;
        };
        for rock_id in player.rocks.drain(..) {
            if let Some(rock) = self.rocks.get_mut(&rock_id) {
                rock.owner = None;
            }
        }
        if let Some(body) = player.body.take() {
            self.physics.remove_body(body);
        }
        self.grid.remove_player(player.chunk, id);
        self.replication.delete_player(player.chunk, id);
        info!(player = ?id, name = %player.name, "Player left");
    }

    /// Input mutation: a movement or boost key changed state. Unknown ids
    /// are dropped silently.
    pub fn apply_key(&mut self, id: PlayerId, key: rubble_shared::msg::Key, state: bool) {
        use rubble_shared::msg::Key;
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        match key {
            Key::Up => player.keys.up = state,
            Key::Down => player.keys.down = state,
            Key::Left => player.keys.left = state,
            Key::Right => player.keys.right = state,
            Key::Boost => {
                if state {
                    player.boost_queued = true;
                }
            }
        }
    }

    /// Input mutation: shoot trigger with an aim offset from the player.
    pub fn apply_shoot(&mut self, id: PlayerId, x: f32, y: f32, state: bool) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        if state {
            player.aim = Vec2::new(x, y);
        }
        player.trigger = state;
    }

    fn tick_players(&mut self) {
        let ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for id in ids {
            self.tick_player(id);
        }
    }

    fn tick_player(&mut self, id: PlayerId) {
        // Respawn countdown runs instead of a normal tick.
        {
            let Some(player) = self.players.get_mut(&id) else {
                return;
            };
            if let Some(timer) = player.respawn_timer {
                if timer > 0 {
                    player.respawn_timer = Some(timer - 1);
                } else {
                    self.respawn_player(id);
                }
                return;
            }
        }

        // Pose refresh and death check.
        let died = {
            let Some(player) = self.players.get_mut(&id) else {
                return;
            };
            match player.body.and_then(|b| self.physics.position(b)) {
                Some(pos) => {
                    player.pos = pos;
                    player.dead
                        || self.cfg.over_boundary(pos.x)
                        || self.cfg.over_boundary(pos.y)
                }
                // A live player without a body is an invariant break.
                None => {
                    warn!(player = ?id, "Live player without a physics body");
                    true
                }
            }
        };
        if died {
            self.kill_player(id);
            return;
        }

        if self.players.get(&id).is_some_and(|p| p.resetting_body) {
            self.rebuild_player_body(id);
        }

        // Timers, meters and the shoot state machine.
        let mut fire: Option<(Vec2, f32)> = None;
        let mut boost_impulse = false;
        let mut stall_impulse = false;
        {
            let Some(player) = self.players.get_mut(&id) else {
                return;
            };

            if player.slowed {
                player.slow_timer = player.slow_timer.saturating_sub(1);
                if player.slow_timer == 0 {
                    player.slowed = false;
                }
            }

            if player.boost_queued {
                player.boost_queued = false;
                if !player.boosting && !player.vulnerable {
                    player.boosting = true;
                    player.boost_timer = BOOST_DELAY_TICKS;
                }
            }
            if player.boosting {
                player.boost_timer -= 1;
                if player.boost_timer == 0 {
                    player.boosting = false;
                    boost_impulse = true;
                    player.vulnerable = true;
                    player.vulnerable_timer = VULNERABLE_TICKS;
                    player.stalling = true;
                    player.stall_timer = STALL_DELAY_TICKS;
                }
            }
            if player.stalling {
                player.stall_timer -= 1;
                if player.stall_timer == 0 {
                    player.stalling = false;
                    stall_impulse = true;
                }
            }

            if player.trigger && !player.shooting && player.shoot_timer == 0 {
                player.shooting = true;
                player.shoot_mag = 1.0;
            }
            let mut release = player.shooting && (!player.trigger || player.force_release);
            player.force_release = false;
            if player.shooting && player.shoot_timer == 0 {
                player.shoot_mag += SHOOT_CHARGE_RATE;
                if player.shoot_meter - 1.0 <= 0.0 {
                    player.shoot_meter = 0.0;
                    release = true;
                } else {
                    player.shoot_meter -= 1.0;
                }
            } else {
                if player.shoot_timer > 0 {
                    player.shoot_timer -= 1;
                }
                if player.shoot_meter < SHOOT_METER_MAX && !player.shooting {
                    player.shoot_meter += SHOOT_METER_REGEN;
                }
            }
            if release {
                player.shooting = false;
                player.shoot_timer = SHOOT_COOLDOWN_TICKS;
                fire = Some((player.aim, player.shoot_mag * 10.0));
            }

            if player.vulnerable {
                player.vulnerable_timer -= 1;
                if player.vulnerable_timer == 0 {
                    player.vulnerable = false;
                }
            }

            player.heal(HEALTH_REGEN);
            player.health = player.health.clamp(0.0, player.max_health);

            // Requested direction blends toward the held keys, then the
            // velocity blends toward the request.
            player.real_mover = player.keys.direction().scale(10.0);
            player.mover = player.mover.lerp(player.real_mover, 0.3);
            if player.mover.len_sq() > 1e-6 {
                player.theta = player.mover.y.atan2(player.mover.x);
            }
        }

        // Impulses and movement applied to the body.
        {
            let Some(player) = self.players.get(&id) else {
                return;
            };
            let Some(body) = player.body else {
                return;
            };
            let mut vel = self.physics.linvel(body).unwrap_or(Vec2::ZERO);
            if boost_impulse {
                vel = vel.scale(20.0);
            }
            if stall_impulse {
                vel = vel.scale(0.2);
            }
            let mover = player.mover;
            let normal = mover.len().max(1.0);
            let mag = if player.shooting || player.vulnerable {
                0.1
            } else {
                0.4
            };
            let slow = if player.slowed { 10.0 } else { 1.0 };
            let denom = slow * (player.vel_buffer / 5.0 + 1.5);
            let target = Vec2::new(10.0 * mover.x / normal / denom, 10.0 * mover.y / normal / denom);
            self.physics.set_linvel(body, vel.lerp(target, mag));
        }

        if let Some((aim, mag)) = fire {
            self.release_shot(id, aim, mag);
        }

        // Chunk membership and interest refresh, on its own cadence.
        {
            let Some(player) = self.players.get_mut(&id) else {
                return;
            };
            if player.chunk_timer > 0 {
                player.chunk_timer -= 1;
            } else {
                player.chunk_timer = CHUNK_REFRESH_TICKS;
                let old_interest = player.interest.clone();
                let old_chunk = player.chunk;
                let new_chunk = self.grid.locate(player.pos);
                if new_chunk != old_chunk {
                    self.grid.remove_player(old_chunk, id);
                    self.grid.insert_player(new_chunk, id);
                    self.replication.delete_player(old_chunk, id);
                    let add = player.add_record();
                    self.replication.add_player(new_chunk, &add);
                    player.chunk = new_chunk;
                }
                let new_interest = self.grid.neighbors(player.chunk);
                let mut added = Player::interest_difference(&new_interest, &old_interest);
                let mut removed = Player::interest_difference(&old_interest, &new_interest);
                player.chunk_add.append(&mut added);
                player.chunk_delete.append(&mut removed);
                player.interest = new_interest;
            }
        }

        if let Some(player) = self.players.get(&id) {
            let rec = player.update_record();
            self.replication.update_player(player.chunk, &rec);
        }
    }

    /// Death: the avatar splits into two fragments, owned rocks drop, the
    /// body is destroyed, and a respawn countdown starts. Runs at most once
    /// per death cycle because the respawn timer short-circuits the tick.
    fn kill_player(&mut self, id: PlayerId) {
        let (body, pos, facing, vertices, owned) = {
            let Some(player) = self.players.get_mut(&id) else {
                return;
            };
            player.dead = false;
            player.respawn_timer = Some(RESPAWN_TICKS);
            player.radius = 0.0;
            player.shooting = false;
            player.trigger = false;
            (
                player.body.take(),
                player.pos,
                player.theta,
                player.vertices.clone(),
                std::mem::take(&mut player.rocks),
            )
        };
        for rock_id in owned {
            if let Some(rock) = self.rocks.get_mut(&rock_id) {
                rock.owner = None;
            }
        }
        info!(player = ?id, "Player died");
        let Some(body) = body else {
            return;
        };
        let vel = self.physics.linvel(body).unwrap_or(Vec2::ZERO);
        let angvel = self.physics.angvel(body).unwrap_or(0.0);
        self.physics.remove_body(body);

        let mut rng = rand::thread_rng();
        let jitter = Vec2::new(rng.gen_range(-0.2..0.2), rng.gen_range(-0.2..0.2));
        let (first, second) = rock::split_polygon(&vertices, 0.5, jitter);
        let spawn_pos = Vec2::new(pos.x.floor(), pos.y.floor());
        let speed = vel.len();
        for (fragment, dt) in [(first, 0.1), (second, -0.1)] {
            let Some(rock_id) = self.insert_rock(
                spawn_pos,
                0.0,
                fragment,
                PLAYER_ROCK_TEXTURE,
                Neutrality::Window(NEUTRAL_WINDOW_TICKS),
                Some(DEATH_FRAGMENT_SCALE),
            ) else {
                continue;
            };
            let Some(rock_body) = self.rocks.get(&rock_id).map(|r| r.body) else {
                continue;
            };
            let v = Vec2::new(speed * (facing + dt).cos(), speed * (facing + dt).sin());
            self.physics.set_linvel(rock_body, v);
            self.physics.set_angvel(rock_body, angvel);
        }
    }

    fn respawn_player(&mut self, id: PlayerId) {
        let center = Vec2::new(self.cfg.world_width / 2.0, self.cfg.world_width / 2.0);
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        player.respawn_timer = None;
        player.pos = center;
        player.mover = Vec2::ZERO;
        player.reset_levels();
        let body = self.physics.spawn_player_body(
            id,
            center,
            player.radius / BODY_RADIUS_DIVISOR,
            player.grab_radius / SENSOR_RADIUS_DIVISOR,
            player.power,
        );
        player.body = Some(body);
        let new_chunk = self.grid.locate(center);
        if new_chunk != player.chunk {
            self.grid.remove_player(player.chunk, id);
            self.grid.insert_player(new_chunk, id);
            self.replication.delete_player(player.chunk, id);
            let add = player.add_record();
            self.replication.add_player(new_chunk, &add);
            player.chunk = new_chunk;
        }
        player.interest = self.grid.neighbors(player.chunk);
        player.chunk_timer = CHUNK_REFRESH_TICKS;
        info!(player = ?id, "Player respawned");
    }

    fn rebuild_player_body(&mut self, id: PlayerId) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        player.resetting_body = false;
        let Some(old) = player.body.take() else {
            return;
        };
        let vel = self.physics.linvel(old).unwrap_or(Vec2::ZERO);
        self.physics.remove_body(old);
        let body = self.physics.spawn_player_body(
            id,
            player.pos,
            player.radius / BODY_RADIUS_DIVISOR,
            player.grab_radius / SENSOR_RADIUS_DIVISOR,
            player.power,
        );
        self.physics.set_linvel(body, vel);
        player.body = Some(body);
        debug!(player = ?id, radius = player.radius, "Player body rebuilt");
    }

    /// Spawns the shot rock: tier 4, neutral toward the shooter only.
    fn release_shot(&mut self, id: PlayerId, aim: Vec2, mag: f32) {
        let Some(player) = self.players.get(&id) else {
            return;
        };
        let pos = player.pos;
        let offset = if aim.len_sq() > 1e-6 { aim } else { player.mover };
        let theta = Vec2::angle_to(pos, pos + offset);
        let mut rng = rand::thread_rng();
        let vertices = rock::random_vertices(SHOT_ROCK_SCALE, &mut rng);
        let Some(rock_id) = self.insert_rock(
            pos,
            0.0,
            vertices,
            PLAYER_ROCK_TEXTURE,
            Neutrality::Toward(id),
            None,
        ) else {
            return;
        };
        let Some(body) = self.rocks.get(&rock_id).map(|r| r.body) else {
            return;
        };
        let speed = SHOT_SPEED_FACTOR * mag;
        self.physics
            .set_linvel(body, Vec2::new(speed * theta.cos(), speed * theta.sin()));
        self.physics.set_angvel(body, 1.0);
        debug!(player = ?id, rock = ?rock_id, mag, "Shot released");
    }

    // ─── Rocks ───

    fn top_up_rocks(&mut self) {
        if self.rocks.len() < self.cfg.target_rocks {
            self.spawn_random_rock();
        }
    }

    /// Spawns a rock with explicit parameters. Used by tools and tests; the
    /// loop's top-up goes through [`Self::spawn_random_rock`] semantics.
    pub fn spawn_rock_at(&mut self, pos: Vec2, scale: f32, texture: u8) -> Option<RockId> {
        let mut rng = rand::thread_rng();
        let vertices = rock::random_vertices(scale, &mut rng);
        self.insert_rock(
            pos,
            0.0,
            vertices,
            texture,
            Neutrality::Window(NEUTRAL_WINDOW_TICKS),
            None,
        )
    }

    fn spawn_random_rock(&mut self) {
        let mut rng = rand::thread_rng();
        let b = self.cfg.border_width;
        let w = self.cfg.world_width;
        let pos = Vec2::new(rng.gen_range(b..w - b), rng.gen_range(b..w - b));
        let scale = rng.gen_range(0.5..3.0);
        let vertices = rock::random_vertices(scale, &mut rng);
        let texture = rock::random_texture(&mut rng);
        let theta = rng.gen_range(0.0..3.0);
        let drift = Vec2::new(rng.gen_range(-0.4..0.4), rng.gen_range(-0.4..0.4));
        if let Some(id) = self.insert_rock(
            pos,
            theta,
            vertices,
            texture,
            Neutrality::Window(NEUTRAL_WINDOW_TICKS),
            None,
        ) {
            if let Some(body) = self.rocks.get(&id).map(|r| r.body) {
                self.physics.set_linvel(body, drift);
                self.physics.set_angvel(body, 1.0);
            }
        }
    }

    /// Creates a rock entity plus its body. `scale_override` pins the scale
    /// fragments inherit instead of the vertex-derived one.
    fn insert_rock(
        &mut self,
        pos: Vec2,
        theta: f32,
        vertices: Vec<Vec2>,
        texture: u8,
        neutrality: Neutrality,
        scale_override: Option<f32>,
    ) -> Option<RockId> {
        let id = RockId(self.alloc_id());
        let Some(body) = self.physics.spawn_rock_body(id, pos, theta, &vertices) else {
            debug!(rock = ?id, "Dropping rock with a degenerate hull");
            return None;
        };
        let mut rock = Rock::new(id, body, pos, theta, vertices, texture, neutrality);
        if let Some(scale) = scale_override {
            rock.scale = scale;
        }
        rock.chunk = self.grid.locate(pos);
        self.grid.insert_rock(rock.chunk, id);
        self.replication.add_rock(rock.chunk, &rock.add_record());
        self.rocks.insert(id, rock);
        Some(id)
    }

    /// Removes a rock from the registry, its chunk, physics and its owner's
    /// collection, all in the same tick.
    pub fn despawn_rock(&mut self, id: RockId) {
        let Some(rock) = self.rocks.remove(&id) else {
            return;
        };
        if let Some(owner) = rock.owner {
            if let Some(player) = self.players.get_mut(&owner) {
                player.rocks.retain(|&r| r != id);
            }
        }
        self.physics.remove_body(rock.body);
        self.grid.remove_rock(rock.chunk, id);
        self.replication.delete_rock(rock.chunk, id);
    }

    fn tick_rocks(&mut self) {
        let ids: Vec<RockId> = self.rocks.keys().copied().collect();
        for id in ids {
            self.tick_rock(id);
        }
    }

    fn tick_rock(&mut self, id: RockId) {
        // The rock may have been deleted earlier this same tick.
        let Some((body, owner)) = self.rocks.get(&id).map(|r| (r.body, r.owner)) else {
            return;
        };
        let Some(pos) = self.physics.position(body) else {
            warn!(rock = ?id, "Rock without a physics body");
            self.despawn_rock(id);
            return;
        };
        let theta = self.physics.rotation(body).unwrap_or(0.0);

        let origin = {
            let Some(rock) = self.rocks.get_mut(&id) else {
                return;
            };
            rock.pos = pos;
            rock.theta = theta;
            if let Neutrality::Window(ticks) = rock.neutrality {
                rock.neutrality = if ticks > 1 {
                    Neutrality::Window(ticks - 1)
                } else {
                    Neutrality::Cleared
                };
            }
            rock.origin(pos, theta)
        };

        if self.cfg.over_boundary(origin.x) || self.cfg.over_boundary(origin.y) {
            self.despawn_rock(id);
            return;
        }

        // Tractor-beam homing toward the owner, and consumption on arrival.
        if let Some(owner_id) = owner {
            let target = match self.players.get(&owner_id) {
                Some(p) if !p.is_respawning() => Some(p.pos),
                // Owner gone or dead mid-tick: release instead of chasing a
                // stale reference.
                _ => None,
            };
            match target {
                Some(target) => {
                    let close = (origin.x - target.x).abs() < HOMING_DEADZONE
                        && (origin.y - target.y).abs() < HOMING_DEADZONE;
                    let scale = self.rocks.get(&id).map_or(f32::MAX, |r| r.scale);
                    if close && scale < CONSUME_MAX_SCALE {
                        self.consume_rock(owner_id, id);
                        return;
                    }
                    if !close {
                        let v = (target - origin).scale(HOMING_GAIN);
                        self.physics.set_linvel(body, v);
                    }
                }
                None => {
                    if let Some(rock) = self.rocks.get_mut(&id) {
                        rock.owner = None;
                    }
                    if let Some(player) = self.players.get_mut(&owner_id) {
                        player.rocks.retain(|&r| r != id);
                    }
                }
            }
        }

        // Split countdown: armed on depletion, executed one tick later so a
        // final update record still goes out.
        let split_now = {
            let Some(rock) = self.rocks.get_mut(&id) else {
                return;
            };
            if rock.health <= 0.0 && rock.splitting.is_none() {
                rock.splitting = Some(SPLIT_DELAY_TICKS);
            }
            match rock.splitting {
                Some(0) => true,
                Some(ticks) => {
                    rock.splitting = Some(ticks - 1);
                    false
                }
                None => false,
            }
        };
        if split_now {
            self.split_rock(id);
            return;
        }

        // Rocks re-derive chunk membership every tick.
        let new_chunk = self.grid.locate(pos);
        {
            let Some(rock) = self.rocks.get_mut(&id) else {
                return;
            };
            if new_chunk != rock.chunk {
                self.grid.remove_rock(rock.chunk, id);
                self.grid.insert_rock(new_chunk, id);
                self.replication.delete_rock(rock.chunk, id);
                let add = rock.add_record();
                self.replication.add_rock(new_chunk, &add);
                rock.chunk = new_chunk;
            }
        }

        if let Some(rock) = self.rocks.get(&id) {
            let rec = rock.update_record();
            self.replication.update_rock(rock.chunk, &rec);
        }
    }

    /// Fragments a depleted rock into two children at 3/5 scale. Below the
    /// minimum scale the rock is deleted outright.
    fn split_rock(&mut self, id: RockId) {
        let Some(rock) = self.rocks.get(&id) else {
            return;
        };
        if rock.scale < MIN_SPLIT_SCALE {
            self.despawn_rock(id);
            return;
        }
        let mut rng = rand::thread_rng();
        let (first, second) = rock.split_vertices(&mut rng);
        let texture = rock.texture;
        let power = rock.power;
        let child_scale = rock.scale * SPLIT_SCALE_RATIO;
        let residual = (-rock.health).max(0.0);
        let spawn_pos = Vec2::new(rock.pos.x.floor(), rock.pos.y.floor());
        let vel = self.physics.linvel(rock.body).unwrap_or(Vec2::ZERO);
        let speed = vel.len();
        let heading = vel.y.atan2(vel.x);
        self.despawn_rock(id);

        let angvel = rng.gen_range(-0.2..0.2);
        for (fragment, dt) in [(first, 0.1), (second, -0.1)] {
            let Some(child) = self.insert_rock(
                spawn_pos,
                0.0,
                fragment,
                texture,
                Neutrality::Window(NEUTRAL_WINDOW_TICKS),
                Some(child_scale),
            ) else {
                continue;
            };
            let Some(child_body) = self.rocks.get(&child).map(|r| r.body) else {
                continue;
            };
            let v = Vec2::new(
                speed * (heading + dt).cos() / 2.0,
                speed * (heading + dt).sin() / 2.0,
            );
            self.physics.set_linvel(child_body, v);
            self.physics.set_angvel(child_body, angvel);
            // Residual damage is shared with a randomized skew; conservation
            // is approximate by design.
            let skew = rng.gen_range(2.0..6.0);
            if let Some(child_rock) = self.rocks.get_mut(&child) {
                child_rock.apply_damage(residual / skew * power);
            }
        }
        debug!(rock = ?id, "Rock split");
    }

    fn consume_rock(&mut self, owner: PlayerId, rock_id: RockId) {
        let Some((scale, power, feed)) = self
            .rocks
            .get(&rock_id)
            .map(|r| (r.scale, r.power, r.feed))
        else {
            return;
        };
        self.despawn_rock(rock_id);
        let Some(player) = self.players.get_mut(&owner) else {
            return;
        };
        if player.consume(scale, power, feed) {
            player.resetting_body = true;
        }
        debug!(player = ?owner, rock = ?rock_id, "Rock consumed");
    }

    // ─── Contact actions ───

    fn apply_contact_actions(&mut self) {
        for action in self.resolver.drain_actions() {
            match action {
                ContactAction::Grab { rock, player } => {
                    self.try_grab(rock, player, GRAB_MAX_SCALE);
                }
                ContactAction::NeutralCleared { rock } => {
                    let Some(body) = self.rocks.get_mut(&rock).map(|r| {
                        r.neutrality = Neutrality::Cleared;
                        r.body
                    }) else {
                        continue;
                    };
                    // rapier emits no begin-contact for pairs that already
                    // overlap, so re-check the sensors around this rock.
                    for player in self.physics.sensor_overlaps(body) {
                        self.try_grab(rock, player, REGRAB_MAX_SCALE);
                    }
                }
                ContactAction::KnockLoose { rock } => {
                    if self.rocks.get(&rock).is_some_and(|r| r.owner.is_some()) {
                        self.despawn_rock(rock);
                    }
                }
                ContactAction::RockDamage { rock, amount } => {
                    if let Some(r) = self.rocks.get_mut(&rock) {
                        r.apply_damage(amount);
                    }
                }
                ContactAction::PlayerHit {
                    player,
                    rock,
                    impact,
                } => {
                    let Some(power) = self.rocks.get(&rock).map(|r| r.power) else {
                        continue;
                    };
                    if let Some(p) = self.players.get_mut(&player) {
                        if p.is_respawning() {
                            continue;
                        }
                        if p.apply_damage(impact / 4.0, power) {
                            p.force_release = true;
                        }
                    }
                }
            }
        }
    }

    /// Grab attempt with every eligibility rule applied against live state.
    pub fn try_grab(&mut self, rock_id: RockId, player_id: PlayerId, max_scale: f32) {
        let (previous, eligible) = {
            let Some(rock) = self.rocks.get(&rock_id) else {
                return;
            };
            let eligible = rock.scale < max_scale
                && !rock.neutrality.blocks_grab_by(player_id)
                && rock.owner != Some(player_id)
                && rock.splitting.is_none();
            (rock.owner, eligible)
        };
        if !eligible {
            return;
        }
        {
            let Some(player) = self.players.get(&player_id) else {
                return;
            };
            if player.is_respawning()
                || player.rocks.len() >= MAX_OWNED_ROCKS
                || player.rocks.contains(&rock_id)
            {
                return;
            }
        }
        if let Some(prev) = previous {
            if let Some(p) = self.players.get_mut(&prev) {
                p.rocks.retain(|&r| r != rock_id);
            }
        }
        if let Some(rock) = self.rocks.get_mut(&rock_id) {
            rock.owner = Some(player_id);
        }
        if let Some(player) = self.players.get_mut(&player_id) {
            player.rocks.push(rock_id);
        }
        debug!(rock = ?rock_id, player = ?player_id, "Rock grabbed");
    }

    // ─── Snapshots for onboarding and interest changes ───

    /// Full-state add records for everything currently in a chunk.
    pub fn chunk_add_batch(&self, chunk: usize) -> DeltaBatch {
        let mut batch = DeltaBatch::default();
        for &pid in &self.grid.chunk(chunk).players {
            if let Some(player) = self.players.get(&pid) {
                batch.push_add_player(&player.add_record());
            }
        }
        for &rid in &self.grid.chunk(chunk).rocks {
            if let Some(rock) = self.rocks.get(&rid) {
                batch.push_add_rock(&rock.add_record());
            }
        }
        batch
    }

    /// Delete records for everything currently in a chunk (the chunk left
    /// the viewer's interest set).
    pub fn chunk_delete_batch(&self, chunk: usize) -> DeltaBatch {
        let mut batch = DeltaBatch::default();
        for &pid in &self.grid.chunk(chunk).players {
            batch.push_delete_player(pid);
        }
        for &rid in &self.grid.chunk(chunk).rocks {
            batch.push_delete_rock(rid);
        }
        batch
    }

    pub fn tiles_in_chunk(&self, chunk: usize) -> Vec<TileInfo> {
        self.tiles
            .iter()
            .filter(|t| t.chunk == chunk)
            .map(|t| t.info())
            .collect()
    }
}

fn init_tiles(cfg: &GameConfig, grid: &SpatialGrid) -> Vec<Tile> {
    let side = (cfg.tile_count as f64).sqrt().round() as usize;
    let length = cfg.playable_width() / side as f32;
    let mut tiles = Vec::with_capacity(cfg.tile_count);
    for i in 0..side {
        for j in 0..side {
            let pos = Vec2::new(
                cfg.border_width + length * i as f32,
                cfg.border_width + length * j as f32,
            );
            tiles.push(Tile {
                id: (i * side + j) as u32,
                pos,
                length,
                color: ((i + j) % 2) as u8,
                alert: false,
                chunk: grid.locate(pos),
            });
        }
    }
    tiles
}

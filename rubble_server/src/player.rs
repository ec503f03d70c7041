//! Player entities.
//!
//! A player is a growing triangular avatar. Most per-tick behavior lives in
//! the world driver (`world.rs`), which needs the grid, the physics engine
//! and the rock arena at once; this module keeps the state, the meters and
//! the pure helpers.

use std::collections::BTreeSet;

use rapier2d::prelude::RigidBodyHandle;

use rubble_shared::math::Vec2;
use rubble_shared::protocol::{
    quant_coarse, quant_fine, quant_health, quant_theta, quant_vertex, EntityFlags, PlayerAdd,
    PlayerId, PlayerUpdate,
};

/// Ticks from death to respawn.
pub const RESPAWN_TICKS: u32 = 70;
/// Cadence of chunk membership / interest-set refresh.
pub const CHUNK_REFRESH_TICKS: u32 = 5;
/// Shoot meter capacity.
pub const SHOOT_METER_MAX: f32 = 30.0;
/// Charge gained per tick while holding the trigger.
pub const SHOOT_CHARGE_RATE: f32 = 0.5;
/// Meter refill per tick while idle.
pub const SHOOT_METER_REGEN: f32 = 0.4;
/// Cooldown ticks after a release.
pub const SHOOT_COOLDOWN_TICKS: u32 = 5;
/// Vulnerability window after a boost lands.
pub const VULNERABLE_TICKS: u32 = 20;
/// Windup ticks between the boost input and the impulse.
pub const BOOST_DELAY_TICKS: u32 = 10;
/// Ticks after the impulse before drag bleeds the burst off.
pub const STALL_DELAY_TICKS: u32 = 15;
/// Passive regeneration per tick.
pub const HEALTH_REGEN: f32 = 0.3;
/// Starting area; radius is its square root.
pub const BASE_AREA: f32 = 3000.0;
/// Replicated radius to physics-world radius.
pub const BODY_RADIUS_DIVISOR: f32 = 50.0;
/// Replicated grab radius to sensor radius.
pub const SENSOR_RADIUS_DIVISOR: f32 = 100.0;
/// Radius growth that forces a physics-body rebuild.
pub const BODY_REBUILD_DELTA: f32 = 10.0;
/// Owned-rock collection bound.
pub const MAX_OWNED_ROCKS: usize = 30;

/// Held movement keys, overwritten by session events between ticks.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl KeyState {
    /// Requested direction; screen convention, +y is down.
    pub fn direction(self) -> Vec2 {
        Vec2::new(
            self.right as i8 as f32 - self.left as i8 as f32,
            self.down as i8 as f32 - self.up as i8 as f32,
        )
    }
}

#[derive(Debug)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// None while dead and waiting for respawn.
    pub body: Option<RigidBodyHandle>,
    pub pos: Vec2,
    pub theta: f32,

    pub health: f32,
    pub max_health: f32,
    pub power: f32,
    pub area: f32,
    pub radius: f32,
    pub last_radius: f32,
    pub grab_radius: f32,
    pub vel_buffer: f32,

    // Input fields, written by the session layer, read by the tick.
    pub keys: KeyState,
    pub boost_queued: bool,
    pub trigger: bool,
    pub aim: Vec2,

    pub mover: Vec2,
    pub real_mover: Vec2,

    pub shooting: bool,
    pub shoot_mag: f32,
    pub shoot_meter: f32,
    pub shoot_timer: u32,
    pub force_release: bool,

    pub boosting: bool,
    pub boost_timer: u32,
    pub stalling: bool,
    pub stall_timer: u32,
    pub vulnerable: bool,
    pub vulnerable_timer: u32,
    pub slowed: bool,
    pub slow_timer: u32,

    pub dead: bool,
    pub respawn_timer: Option<u32>,
    pub resetting_body: bool,

    pub rocks: Vec<rubble_shared::protocol::RockId>,

    pub chunk: usize,
    pub chunk_timer: u32,
    pub interest: BTreeSet<usize>,
    pub chunk_add: Vec<usize>,
    pub chunk_delete: Vec<usize>,

    /// Unit triangle; scaled by radius on the client and in physics.
    pub vertices: Vec<Vec2>,
}

impl Player {
    pub fn new(id: PlayerId, name: String, pos: Vec2) -> Self {
        let mut player = Self {
            id,
            name,
            body: None,
            pos,
            theta: 0.0,
            health: 0.0,
            max_health: 0.0,
            power: 0.0,
            area: 0.0,
            radius: 0.0,
            last_radius: 0.0,
            grab_radius: 0.0,
            vel_buffer: 0.0,
            keys: KeyState::default(),
            boost_queued: false,
            trigger: false,
            aim: Vec2::ZERO,
            mover: Vec2::ZERO,
            real_mover: Vec2::ZERO,
            shooting: false,
            shoot_mag: 0.0,
            shoot_meter: SHOOT_METER_MAX,
            shoot_timer: 0,
            force_release: false,
            boosting: false,
            boost_timer: 0,
            stalling: false,
            stall_timer: 0,
            vulnerable: false,
            vulnerable_timer: 0,
            slowed: false,
            slow_timer: 0,
            dead: false,
            respawn_timer: None,
            resetting_body: false,
            rocks: Vec::new(),
            chunk: 0,
            chunk_timer: 0,
            interest: BTreeSet::new(),
            chunk_add: Vec::new(),
            chunk_delete: Vec::new(),
            vertices: triangle_vertices(),
        };
        player.reset_levels();
        player
    }

    /// Resets health, power and size to a fresh spawn.
    pub fn reset_levels(&mut self) {
        self.max_health = 100.0;
        self.health = self.max_health;
        self.power = 1.0;
        self.area = BASE_AREA;
        self.radius = self.area.sqrt();
        self.last_radius = self.radius;
        self.grab_radius = 2.0 * self.radius;
        self.vel_buffer = self.radius / 1000.0;
    }

    pub fn is_respawning(&self) -> bool {
        self.respawn_timer.is_some()
    }

    /// Applies damage from a rock of the given power. Returns true if this
    /// hit was heavy enough to force a charged shot out.
    pub fn apply_damage(&mut self, base: f32, rock_power: f32) -> bool {
        let mut amount = base;
        if self.vulnerable {
            amount *= 10.0;
        }
        amount *= rock_power;
        self.health -= amount / 4.0;
        if self.health <= 0.0 {
            self.dead = true;
        }
        amount > self.max_health / 3.0
    }

    pub fn heal(&mut self, amount: f32) {
        self.health = (self.health + amount).min(self.max_health);
    }

    /// Growth from consuming one rock. Returns true when the physics body
    /// must be rebuilt at the new radius.
    pub fn consume(&mut self, rock_scale: f32, rock_power: f32, rock_feed: f32) -> bool {
        self.area += rock_scale * rock_scale * rock_power * 100.0;
        self.radius = self.area.sqrt();
        self.grab_radius = 2.0 * self.radius;
        self.power += rock_scale / 10.0;
        self.max_health += rock_scale * rock_power;
        self.heal(rock_feed);
        self.vel_buffer = self.radius / 1000.0;
        if self.radius - self.last_radius > BODY_REBUILD_DELTA {
            self.last_radius = self.radius;
            true
        } else {
            false
        }
    }

    /// Growth stage replicated in the level byte.
    pub fn level(&self) -> u8 {
        (self.power.floor() as u32).min(u8::MAX as u32) as u8
    }

    pub fn flags(&self) -> EntityFlags {
        let mut flags = EntityFlags::empty();
        if self.vulnerable {
            flags |= EntityFlags::VULNERABLE;
        }
        if self.shooting {
            flags |= EntityFlags::SHOOTING;
        }
        flags
    }

    pub fn add_record(&self) -> PlayerAdd {
        PlayerAdd {
            id: self.id,
            x: quant_coarse(self.pos.x),
            y: quant_coarse(self.pos.y),
            radius: self.radius as u16,
            name: self.name.clone(),
            vertices: self.vertices.iter().map(|&v| quant_vertex(v)).collect(),
            health: quant_health(self.health),
            max_health: quant_health(self.max_health),
            theta: quant_theta(self.theta),
            level: self.level(),
            flags: self.flags(),
        }
    }

    pub fn update_record(&self) -> PlayerUpdate {
        PlayerUpdate {
            id: self.id,
            x: quant_fine(self.pos.x),
            y: quant_fine(self.pos.y),
            radius: self.radius as u16,
            health: quant_health(self.health),
            max_health: quant_health(self.max_health),
            shoot_meter: self.shoot_meter.abs() as u8,
            theta: quant_theta(self.theta),
            level: self.level(),
            flags: self.flags(),
        }
    }

    /// Set difference used for interest add/remove deltas.
    pub fn interest_difference(a: &BTreeSet<usize>, b: &BTreeSet<usize>) -> Vec<usize> {
        a.difference(b).copied().collect()
    }
}

/// Unit triangle the avatar polygon is built from.
pub fn triangle_vertices() -> Vec<Vec2> {
    let delta = 2.0 * std::f32::consts::PI / 3.0;
    (0..3)
        .map(|i| {
            let theta = i as f32 * delta;
            Vec2::new(theta.cos(), theta.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_player_levels() {
        let p = Player::new(PlayerId(1), "a".into(), Vec2::ZERO);
        assert_eq!(p.health, 100.0);
        assert_eq!(p.power, 1.0);
        assert!((p.radius - BASE_AREA.sqrt()).abs() < 1e-4);
        assert_eq!(p.level(), 1);
    }

    #[test]
    fn vulnerability_multiplies_damage() {
        let mut p = Player::new(PlayerId(1), "a".into(), Vec2::ZERO);
        let before = p.health;
        p.apply_damage(2.0, 1.0);
        let normal_loss = before - p.health;

        let mut q = Player::new(PlayerId(2), "b".into(), Vec2::ZERO);
        q.vulnerable = true;
        q.apply_damage(2.0, 1.0);
        let vulnerable_loss = before - q.health;
        assert!((vulnerable_loss - 10.0 * normal_loss).abs() < 1e-4);
    }

    #[test]
    fn heavy_hits_report_shot_interrupt() {
        let mut p = Player::new(PlayerId(1), "a".into(), Vec2::ZERO);
        assert!(!p.apply_damage(1.0, 1.0));
        assert!(p.apply_damage(40.0, 1.0));
    }

    #[test]
    fn consume_grows_and_requests_rebuild_past_threshold() {
        let mut p = Player::new(PlayerId(1), "a".into(), Vec2::ZERO);
        let r0 = p.radius;
        // Small rock: grows, no rebuild yet.
        assert!(!p.consume(0.5, 1.0, 1.0));
        assert!(p.radius > r0);
        // Large rich rock: pushes the radius past the rebuild delta.
        assert!(p.consume(3.0, 4.0, 20.0));
    }

    #[test]
    fn interest_difference_is_directional() {
        let a: BTreeSet<usize> = [1, 2, 3].into_iter().collect();
        let b: BTreeSet<usize> = [2, 3, 4].into_iter().collect();
        assert_eq!(Player::interest_difference(&a, &b), vec![1]);
        assert_eq!(Player::interest_difference(&b, &a), vec![4]);
    }
}

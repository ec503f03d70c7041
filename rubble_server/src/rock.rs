//! Rock entities.
//!
//! A rock is a convex polygon fragment. Its lifecycle: Free, possibly
//! Neutral (fresh spawn/split/shot), Owned while tractor-beamed, Splitting
//! for one tick once health runs out, then gone. Scale is derived from the
//! vertex second moment, so procedurally split fragments keep honest sizes.

use rand::Rng;
use rapier2d::prelude::RigidBodyHandle;

use rubble_shared::math::Vec2;
use rubble_shared::protocol::{
    quant_coarse, quant_fine, quant_health, quant_theta, quant_vertex, EntityFlags, PlayerId,
    RockAdd, RockId, RockUpdate,
};

/// Ticks a fresh spawn/split stays neutral toward everyone.
pub const NEUTRAL_WINDOW_TICKS: u32 = 100;
/// Ticks between health depletion and the actual split.
pub const SPLIT_DELAY_TICKS: u32 = 1;
/// Below this scale a depleted rock is deleted instead of split.
pub const MIN_SPLIT_SCALE: f32 = 0.1;
/// Largest scale a sensor grab will pick up.
pub const GRAB_MAX_SCALE: f32 = 3.0;
/// Largest scale the deferred re-grab (after a neutral tag clears) accepts.
pub const REGRAB_MAX_SCALE: f32 = 1.0;
/// Owned rocks below this scale are consumed on arrival at the beam target.
pub const CONSUME_MAX_SCALE: f32 = 1.0;
/// Tractor-beam velocity gain toward the position error.
pub const HOMING_GAIN: f32 = 2.0;
/// Inside this distance of the beam target the rock coasts.
pub const HOMING_DEADZONE: f32 = 0.3;
/// Relative impact speed below which contacts deal no damage.
pub const IMPACT_THRESHOLD: f32 = 1.0;
/// Scale ratio of each split fragment to its parent.
pub const SPLIT_SCALE_RATIO: f32 = 3.0 / 5.0;

/// Grab eligibility of a rock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neutrality {
    /// Grabbable by anyone.
    Cleared,
    /// Fresh spawn/split grace period: neutral toward everyone while > 0.
    Window(u32),
    /// Shot rock: neutral only toward its shooter.
    Toward(PlayerId),
}

impl Neutrality {
    pub fn blocks_grab_by(self, player: PlayerId) -> bool {
        match self {
            Neutrality::Cleared => false,
            Neutrality::Window(ticks) => ticks > 0,
            Neutrality::Toward(excluded) => excluded == player,
        }
    }
}

#[derive(Debug)]
pub struct Rock {
    pub id: RockId,
    pub body: RigidBodyHandle,
    pub chunk: usize,
    /// Derived from the vertex second moment; drives grab/split thresholds.
    pub scale: f32,
    /// Texture tier 1-4; drives feed, power and health.
    pub texture: u8,
    pub power: f32,
    pub feed: f32,
    pub health: f32,
    pub max_health: f32,
    /// Local-space polygon, exclusively owned by this rock.
    pub vertices: Vec<Vec2>,
    /// Cached polygon centroid; the beam origin offset derives from it.
    pub centroid: Vec2,
    pub centroid_len: f32,
    pub owner: Option<PlayerId>,
    pub neutrality: Neutrality,
    /// Split countdown, armed once health drops to zero.
    pub splitting: Option<u32>,
    /// Pose caches refreshed from physics each tick.
    pub pos: Vec2,
    pub theta: f32,
}

impl Rock {
    pub fn new(
        id: RockId,
        body: RigidBodyHandle,
        pos: Vec2,
        theta: f32,
        vertices: Vec<Vec2>,
        texture: u8,
        neutrality: Neutrality,
    ) -> Self {
        let centroid = centroid_of(&vertices);
        Self {
            id,
            body,
            chunk: 0,
            scale: true_scale(&vertices),
            texture,
            power: power_for(texture),
            feed: feed_for(texture),
            health: max_health_for(texture),
            max_health: max_health_for(texture),
            vertices,
            centroid,
            centroid_len: centroid.len(),
            owner: None,
            neutrality,
            splitting: None,
            pos,
            theta,
        }
    }

    /// World-space beam origin: body position displaced by the centroid
    /// offset rotated into the current orientation.
    pub fn origin(&self, body_pos: Vec2, body_angle: f32) -> Vec2 {
        if self.centroid_len == 0.0 {
            return body_pos;
        }
        let angle = self.centroid.y.atan2(self.centroid.x) + body_angle;
        body_pos + Vec2::new(angle.cos(), angle.sin()).scale(self.centroid_len)
    }

    pub fn apply_damage(&mut self, amount: f32) {
        self.health -= amount;
    }

    /// Splits the polygon along its long axis with a randomized cut point.
    pub fn split_vertices(&self, rng: &mut impl Rng) -> (Vec<Vec2>, Vec<Vec2>) {
        split_polygon(&self.vertices, rng.gen_range(0.3..0.7), Vec2::ZERO)
    }

    pub fn add_record(&self) -> RockAdd {
        RockAdd {
            id: self.id,
            x: quant_coarse(self.pos.x),
            y: quant_coarse(self.pos.y),
            scale: (self.scale * 100.0) as u16,
            vertices: self.vertices.iter().map(|&v| quant_vertex(v)).collect(),
            health: quant_health(self.health),
            max_health: quant_health(self.max_health),
            theta: quant_theta(self.theta),
            texture: self.texture,
            flags: EntityFlags::empty(),
        }
    }

    pub fn update_record(&self) -> RockUpdate {
        RockUpdate {
            id: self.id,
            x: quant_fine(self.pos.x),
            y: quant_fine(self.pos.y),
            health: quant_health(self.health),
            theta: quant_theta(self.theta),
        }
    }
}

/// Bisects a polygon at its vertex-list midpoint. `factor` positions the cut
/// vertex along the middle edge and `jitter` displaces it; the opposite cut
/// sits on the closing edge's midpoint. Both fragments share the cut edge.
pub fn split_polygon(vertices: &[Vec2], factor: f32, jitter: Vec2) -> (Vec<Vec2>, Vec<Vec2>) {
    let count = vertices.len();
    let middle = count / 2;

    let middle_vertex = Vec2::new(
        vertices[middle - 1].x * factor + vertices[middle].x * (1.0 - factor) + jitter.x,
        vertices[middle - 1].y * factor + vertices[middle].y * (1.0 - factor) + jitter.y,
    );
    let last_vertex = Vec2::new(
        (vertices[count - 1].x + vertices[0].x) / 2.0,
        (vertices[count - 1].y + vertices[0].y) / 2.0,
    );

    let mut first = Vec::with_capacity(middle + 2);
    first.push(last_vertex);
    first.extend_from_slice(&vertices[..middle]);
    first.push(middle_vertex);

    let mut second = Vec::with_capacity(count - middle + 2);
    second.push(middle_vertex);
    second.extend_from_slice(&vertices[middle..]);
    second.push(last_vertex);

    (first, second)
}

/// Texture tier of rocks created from a player (shots, death fragments).
pub const PLAYER_ROCK_TEXTURE: u8 = 4;

/// Jittered regular polygon with 4-8 sides at the given scale.
pub fn random_vertices(scale: f32, rng: &mut impl Rng) -> Vec<Vec2> {
    let sides: usize = rng.gen_range(4..8);
    let delta = 2.0 * std::f32::consts::PI / sides as f32;
    (0..sides)
        .map(|i| {
            let theta = i as f32 * delta + rng.gen_range(-0.2..0.2);
            Vec2::new(theta.cos() * scale, theta.sin() * scale)
        })
        .collect()
}

/// Texture tier distribution for world spawns: 70% / 20% / 10%.
pub fn random_texture(rng: &mut impl Rng) -> u8 {
    match rng.gen_range(0..10) {
        0..=6 => 1,
        7..=8 => 2,
        _ => 3,
    }
}

pub fn power_for(texture: u8) -> f32 {
    texture as f32
}

pub fn feed_for(texture: u8) -> f32 {
    match texture {
        1 => 1.0,
        2 => 4.0,
        3 => 10.0,
        _ => 20.0,
    }
}

pub fn max_health_for(texture: u8) -> f32 {
    let magnitude = match texture {
        1 => 2.0,
        2 => 5.0,
        3 => 40.0,
        _ => 50.0,
    };
    6.0 * (1.0 + magnitude)
}

/// Root-mean-square vertex distance: the polygon's second-moment scale.
pub fn true_scale(vertices: &[Vec2]) -> f32 {
    if vertices.is_empty() {
        return 0.0;
    }
    let total: f32 = vertices.iter().map(|v| v.len_sq()).sum();
    (total / vertices.len() as f32).sqrt()
}

pub fn centroid_of(vertices: &[Vec2]) -> Vec2 {
    if vertices.is_empty() {
        return Vec2::ZERO;
    }
    let sum = vertices
        .iter()
        .fold(Vec2::ZERO, |acc, &v| Vec2::new(acc.x + v.x, acc.y + v.y));
    sum.scale(1.0 / vertices.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    #[test]
    fn tier_tables_match_texture() {
        assert_eq!(max_health_for(3), 246.0);
        assert_eq!(feed_for(4), 20.0);
        assert_eq!(power_for(2), 2.0);
    }

    #[test]
    fn true_scale_of_regular_polygon_is_its_radius() {
        let verts: Vec<Vec2> = (0..6)
            .map(|i| {
                let theta = i as f32 * std::f32::consts::PI / 3.0;
                Vec2::new(theta.cos() * 2.0, theta.sin() * 2.0)
            })
            .collect();
        assert!((true_scale(&verts) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn split_vertices_share_the_cut_edge() {
        let mut rng = rng();
        let rock = Rock::new(
            RockId(1),
            RigidBodyHandle::invalid(),
            Vec2::ZERO,
            0.0,
            random_vertices(2.0, &mut rng),
            1,
            Neutrality::Cleared,
        );
        let count = rock.vertices.len();
        let (a, b) = rock.split_vertices(&mut rng);
        assert_eq!(a.len(), count / 2 + 2);
        assert_eq!(b.len(), count - count / 2 + 2);
        // The interpolated cut vertices appear on both fragments.
        assert_eq!(a[a.len() - 1], b[0]);
        assert_eq!(a[0], b[b.len() - 1]);
    }

    #[test]
    fn neutrality_rules() {
        let shooter = PlayerId(1);
        let other = PlayerId(2);
        assert!(Neutrality::Window(10).blocks_grab_by(other));
        assert!(!Neutrality::Window(0).blocks_grab_by(other));
        assert!(Neutrality::Toward(shooter).blocks_grab_by(shooter));
        assert!(!Neutrality::Toward(shooter).blocks_grab_by(other));
        assert!(!Neutrality::Cleared.blocks_grab_by(shooter));
    }
}

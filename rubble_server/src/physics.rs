//! rapier2d integration.
//!
//! The server never integrates bodies itself; rapier owns body and collider
//! storage and this wrapper keeps the bundle of solver state in one place.
//! Entity identity rides in the rapier `user_data` slot as a packed
//! [`BodyTag`], so collision callbacks dispatch on an explicit tag instead of
//! inspecting shapes.
//!
//! Determinism notes:
//! - The simulation runs one fixed-dt step per logical tick.
//! - Gravity is zero; all motion comes from gameplay-set velocities.

use rapier2d::prelude::*;

use rubble_shared::math::Vec2;
use rubble_shared::protocol::{PlayerId, RockId};

const TAG_PLAYER: u128 = 1;
const TAG_ROCK: u128 = 2;

/// Entity identity carried in a body's/collider's user-data slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTag {
    Player(PlayerId),
    Rock(RockId),
}

impl BodyTag {
    pub fn pack(self) -> u128 {
        match self {
            BodyTag::Player(PlayerId(id)) => (TAG_PLAYER << 32) | id as u128,
            BodyTag::Rock(RockId(id)) => (TAG_ROCK << 32) | id as u128,
        }
    }

    pub fn unpack(raw: u128) -> Option<BodyTag> {
        let id = (raw & u32::MAX as u128) as u32;
        match raw >> 32 {
            TAG_PLAYER => Some(BodyTag::Player(PlayerId(id))),
            TAG_ROCK => Some(BodyTag::Rock(RockId(id))),
            _ => None,
        }
    }
}

/// Owns the rapier sets and pipeline for one world.
pub struct PhysicsWorld {
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    integration: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    query_pipeline: QueryPipeline,
    gravity: Vector<Real>,
}

impl PhysicsWorld {
    pub fn new(dt: f32) -> Self {
        let mut integration = IntegrationParameters::default();
        integration.dt = dt;
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            integration,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            gravity: vector![0.0, 0.0],
        }
    }

    /// Advances the simulation by one fixed timestep.
    pub fn step(&mut self, hooks: &dyn PhysicsHooks, events: &dyn EventHandler) {
        self.pipeline.step(
            &self.gravity,
            &self.integration,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            hooks,
            events,
        );
    }

    /// Spawns a rock body with a convex-hull collider.
    ///
    /// Returns `None` if the vertex set is too degenerate for a hull; callers
    /// treat that as an invariant failure and skip the entity.
    pub fn spawn_rock_body(
        &mut self,
        id: RockId,
        pos: Vec2,
        theta: f32,
        vertices: &[Vec2],
    ) -> Option<RigidBodyHandle> {
        let tag = BodyTag::Rock(id).pack();
        let points: Vec<Point<Real>> = vertices.iter().map(|v| point![v.x, v.y]).collect();
        let collider = ColliderBuilder::convex_hull(&points)?
            .density(1.0)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
            .user_data(tag)
            .build();
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![pos.x, pos.y])
            .rotation(theta)
            .user_data(tag)
            .build();
        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        Some(handle)
    }

    /// Spawns a player disk body plus its grab sensor.
    pub fn spawn_player_body(
        &mut self,
        id: PlayerId,
        pos: Vec2,
        radius: f32,
        sensor_radius: f32,
        density: f32,
    ) -> RigidBodyHandle {
        let tag = BodyTag::Player(id).pack();
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![pos.x, pos.y])
            .user_data(tag)
            .build();
        let handle = self.bodies.insert(body);
        let hull = ColliderBuilder::ball(radius)
            .density(density)
            .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
            .user_data(tag)
            .build();
        self.colliders
            .insert_with_parent(hull, handle, &mut self.bodies);
        let sensor = ColliderBuilder::ball(sensor_radius)
            .sensor(true)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(tag)
            .build();
        self.colliders
            .insert_with_parent(sensor, handle, &mut self.bodies);
        handle
    }

    /// Destroys a body and everything attached to it, in the same tick the
    /// owning entity is deleted.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn position(&self, handle: RigidBodyHandle) -> Option<Vec2> {
        let body = self.bodies.get(handle)?;
        let t = body.translation();
        Some(Vec2::new(t.x, t.y))
    }

    pub fn rotation(&self, handle: RigidBodyHandle) -> Option<f32> {
        Some(self.bodies.get(handle)?.rotation().angle())
    }

    pub fn linvel(&self, handle: RigidBodyHandle) -> Option<Vec2> {
        let v = self.bodies.get(handle)?.linvel();
        Some(Vec2::new(v.x, v.y))
    }

    pub fn angvel(&self, handle: RigidBodyHandle) -> Option<f32> {
        Some(self.bodies.get(handle)?.angvel())
    }

    pub fn set_linvel(&mut self, handle: RigidBodyHandle, v: Vec2) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_linvel(vector![v.x, v.y], true);
        }
    }

    pub fn set_angvel(&mut self, handle: RigidBodyHandle, w: f32) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_angvel(w, true);
        }
    }

    /// Players whose grab sensor currently overlaps any collider of `handle`.
    pub fn sensor_overlaps(&self, handle: RigidBodyHandle) -> Vec<PlayerId> {
        let mut out = Vec::new();
        let Some(body) = self.bodies.get(handle) else {
            return out;
        };
        for &collider in body.colliders() {
            for (c1, c2, intersecting) in self.narrow_phase.intersection_pairs_with(collider) {
                if !intersecting {
                    continue;
                }
                let other = if c1 == collider { c2 } else { c1 };
                let Some(col) = self.colliders.get(other) else {
                    continue;
                };
                if !col.is_sensor() {
                    continue;
                }
                if let Some(BodyTag::Player(pid)) = BodyTag::unpack(col.user_data) {
                    out.push(pid);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_tag_roundtrip() {
        let tags = [BodyTag::Player(PlayerId(7)), BodyTag::Rock(RockId(u32::MAX))];
        for tag in tags {
            assert_eq!(BodyTag::unpack(tag.pack()), Some(tag));
        }
        assert_eq!(BodyTag::unpack(0), None);
    }

    #[test]
    fn degenerate_hull_is_rejected() {
        let mut physics = PhysicsWorld::new(1.0 / 25.0);
        let collinear = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        ];
        assert!(physics
            .spawn_rock_body(RockId(1), Vec2::ZERO, 0.0, &collinear)
            .is_none());
    }
}

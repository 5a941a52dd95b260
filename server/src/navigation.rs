use shared::math::{yaw_towards, Vec3};
use shared::movement::Mover;
use shared::GRAVITY;

/// Horizontal distance at which a destination counts as reached.
const ARRIVAL_DISTANCE: f32 = 0.05;
/// Ticks of almost no progress before the agent gives up on its path.
const STUCK_TICKS: u32 = 25;

/// Straight line steering towards a destination.
///
/// A fresh path needs one tick to resolve before the agent starts moving,
/// during which [`SteeringAgent::path_pending`] is true. Retargeting an
/// agent that already follows a path takes effect immediately.
#[derive(Debug, Clone, Default)]
pub struct SteeringAgent {
    destination: Option<Vec3>,
    path_pending: bool,
    speed: f32,
    stopping_distance: f32,
    velocity: Vec3,
    stuck_ticks: u32,
}

impl SteeringAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_destination(&mut self, destination: Vec3, speed: f32, stopping_distance: f32) {
        if !self.has_path() {
            self.path_pending = true;
        }
        self.destination = Some(destination);
        self.speed = speed;
        self.stopping_distance = stopping_distance;
        self.stuck_ticks = 0;
    }

    /// Drops the current path and stops.
    pub fn reset_movement(&mut self) {
        self.destination = None;
        self.path_pending = false;
        self.velocity = Vec3::ZERO;
        self.stuck_ticks = 0;
    }

    /// Teleports the body and forgets any path.
    pub fn warp<M: Mover>(&mut self, body: &mut M, position: Vec3) {
        self.reset_movement();
        body.set_position(position);
    }

    pub fn path_pending(&self) -> bool {
        self.path_pending
    }

    pub fn has_path(&self) -> bool {
        self.destination.is_some() && !self.path_pending
    }

    pub fn destination(&self) -> Option<Vec3> {
        self.destination
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn remaining_distance(&self, position: Vec3) -> f32 {
        match self.destination {
            Some(destination) => (destination - position).horizontal_magnitude(),
            None => 0.0,
        }
    }

    pub fn is_moving(&self, position: Vec3) -> bool {
        self.path_pending
            || (self.destination.is_some() && self.remaining_distance(position) > self.stopping_distance)
            || self.velocity != Vec3::ZERO
    }

    /// Advances one tick. Returns the yaw the body should face when it moved.
    pub fn step<M: Mover>(&mut self, body: &mut M, dt: f32) -> Option<f32> {
        let fall = if body.is_grounded() { 0.0 } else { GRAVITY * dt };

        if self.path_pending {
            self.path_pending = false;
            self.velocity = Vec3::ZERO;
            body.move_by(Vec3::new(0.0, fall, 0.0));
            return None;
        }

        let destination = match self.destination {
            Some(destination) => destination,
            None => {
                self.velocity = Vec3::ZERO;
                if fall != 0.0 {
                    body.move_by(Vec3::new(0.0, fall, 0.0));
                }
                return None;
            }
        };

        let position = body.position();
        let offset = (destination - position).with_y(0.0);
        let distance = offset.magnitude();
        if distance <= self.stopping_distance.max(ARRIVAL_DISTANCE) {
            self.reset_movement();
            return None;
        }

        let wanted = offset.scale((self.speed * dt).min(distance) / distance);
        let applied = body.move_by(wanted.with_y(fall));
        self.velocity = applied.with_y(0.0).scale(1.0 / dt);

        if applied.horizontal_magnitude() < wanted.magnitude() * 0.1 {
            self.stuck_ticks += 1;
            if self.stuck_ticks >= STUCK_TICKS {
                log::debug!("Giving up path to {:?} after {} stuck ticks", destination, STUCK_TICKS);
                self.reset_movement();
                return None;
            }
        } else {
            self.stuck_ticks = 0;
        }

        yaw_towards(position, destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::collider::Bounds;
    use shared::physics::{KinematicBody, StaticWorld};
    use std::sync::Arc;

    fn body_at(world: StaticWorld, position: Vec3) -> KinematicBody {
        KinematicBody::new(Arc::new(world), position, 0.5, 1.8, 0.02)
    }

    #[test]
    fn test_new_path_is_pending_for_one_tick() {
        let mut body = body_at(StaticWorld::flat(), Vec3::ZERO);
        let mut agent = SteeringAgent::new();
        agent.set_destination(Vec3::new(0.0, 0.0, 5.0), 5.0, 0.0);
        assert!(agent.path_pending());
        assert!(!agent.has_path());
        assert!(agent.is_moving(body.position()));

        assert!(agent.step(&mut body, 0.02).is_none());
        assert!(agent.has_path());
        assert_approx_eq!(body.position().z, 0.0);

        let yaw = agent.step(&mut body, 0.02);
        assert_approx_eq!(yaw.unwrap_or(-1.0), 0.0);
        assert_approx_eq!(body.position().z, 0.1, 1e-4);
        assert_approx_eq!(agent.velocity().z, 5.0, 1e-3);
    }

    #[test]
    fn test_retarget_keeps_moving() {
        let mut agent = SteeringAgent::new();
        agent.set_destination(Vec3::new(0.0, 0.0, 5.0), 5.0, 0.0);
        let mut body = body_at(StaticWorld::flat(), Vec3::ZERO);
        agent.step(&mut body, 0.02);
        agent.set_destination(Vec3::new(0.0, 0.0, 6.0), 5.0, 0.0);
        assert!(!agent.path_pending());
        assert!(agent.has_path());
    }

    #[test]
    fn test_arrival_clears_path() {
        let mut body = body_at(StaticWorld::flat(), Vec3::ZERO);
        let mut agent = SteeringAgent::new();
        agent.set_destination(Vec3::new(0.3, 0.0, 0.0), 5.0, 0.0);
        for _ in 0..10 {
            agent.step(&mut body, 0.02);
        }
        assert!(!agent.has_path());
        assert!(!agent.is_moving(body.position()));
        assert_approx_eq!(body.position().x, 0.3, 1e-4);
    }

    #[test]
    fn test_stopping_distance() {
        let mut body = body_at(StaticWorld::flat(), Vec3::ZERO);
        let mut agent = SteeringAgent::new();
        agent.set_destination(Vec3::new(3.0, 0.0, 0.0), 5.0, 1.0);
        for _ in 0..60 {
            agent.step(&mut body, 0.02);
        }
        assert!(!agent.has_path());
        assert!(body.position().x <= 2.15);
        assert!(body.position().x >= 1.9);
    }

    #[test]
    fn test_gives_up_when_stuck() {
        let world = StaticWorld {
            obstacles: vec![Bounds::new(Vec3::new(2.0, 1.0, 0.0), Vec3::new(0.5, 1.0, 5.0))],
            ..StaticWorld::flat()
        };
        let mut body = body_at(world, Vec3::ZERO);
        let mut agent = SteeringAgent::new();
        agent.set_destination(Vec3::new(5.0, 0.0, 0.0), 5.0, 0.0);
        for _ in 0..100 {
            agent.step(&mut body, 0.02);
        }
        assert!(!agent.has_path());
        assert!(body.position().x <= 1.0 + 1e-4);
    }

    #[test]
    fn test_warp_forgets_path() {
        let mut body = body_at(StaticWorld::flat(), Vec3::ZERO);
        let mut agent = SteeringAgent::new();
        agent.set_destination(Vec3::new(5.0, 0.0, 0.0), 5.0, 0.0);
        agent.warp(&mut body, Vec3::new(-3.0, 0.0, 2.0));
        assert!(agent.destination().is_none());
        assert_approx_eq!(body.position().x, -3.0);
    }
}

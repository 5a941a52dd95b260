use crate::collider::{Bounds, RayHit};
use crate::controller::{Ladder, Sensors};
use crate::math::Vec3;
use crate::movement::{Mover, SlidingState};
use std::sync::Arc;

/// Height tolerance for the ground check.
const GROUND_TOLERANCE: f32 = 0.05;

///Static level geometry. Obstacles block movement, water and ladders are
///trigger volumes only.
#[derive(Debug, Clone, Default)]
pub struct StaticWorld {
    pub floor_y: f32,
    pub obstacles: Vec<Bounds>,
    pub water: Vec<Bounds>,
    pub ladders: Vec<Ladder>,
}

impl StaticWorld {
    pub fn flat() -> Self {
        Self::default()
    }

    /// Small level with a walled yard, a roof platform reachable by ladder
    /// and a water tank.
    pub fn arena() -> Self {
        let wall = |x: f32, z: f32, hx: f32, hz: f32| {
            Bounds::new(Vec3::new(x, 2.0, z), Vec3::new(hx, 2.0, hz))
        };
        Self {
            floor_y: 0.0,
            obstacles: vec![
                wall(0.0, 40.0, 40.0, 0.5),
                wall(0.0, -40.0, 40.0, 0.5),
                wall(40.0, 0.0, 0.5, 40.0),
                wall(-40.0, 0.0, 0.5, 40.0),
                // roof platform
                Bounds::new(Vec3::new(15.0, 5.75, 15.0), Vec3::new(4.0, 0.25, 4.0)),
                // crate
                Bounds::new(Vec3::new(-6.0, 0.5, 4.0), Vec3::new(0.5, 0.5, 0.5)),
            ],
            water: vec![Bounds::new(
                Vec3::new(-20.0, 1.5, -20.0),
                Vec3::new(6.0, 1.5, 6.0),
            )],
            ladders: vec![Ladder {
                bounds: Bounds::new(Vec3::new(15.0, 3.0, 10.6), Vec3::new(0.6, 3.0, 0.4)),
                yaw: 0.0,
            }],
        }
    }

    /// Closest hit against obstacles and the floor plane. `direction` must be normalized.
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let mut closest = self
            .obstacles
            .iter()
            .filter_map(|obstacle| obstacle.ray_cast(origin, direction, max_distance))
            .min_by(|a, b| a.distance.total_cmp(&b.distance));

        if direction.y < 0.0 && origin.y >= self.floor_y {
            let distance = (self.floor_y - origin.y) / direction.y;
            if distance <= max_distance && closest.map_or(true, |hit| distance < hit.distance) {
                closest = Some(RayHit {
                    distance,
                    point: origin + direction * distance,
                    normal: Vec3::UP,
                });
            }
        }
        closest
    }

    /// True if any obstacle lies between `a` and `b`.
    pub fn is_blocked(&self, a: Vec3, b: Vec3) -> bool {
        self.obstacles
            .iter()
            .any(|obstacle| obstacle.intersects_segment(a, b))
    }

    pub fn overlaps_obstacle(&self, bounds: &Bounds) -> bool {
        bounds.min().y < self.floor_y - 0.001
            || self.obstacles.iter().any(|obstacle| obstacle.intersects(bounds))
    }
}

impl Sensors for StaticWorld {
    fn water_at(&self, bounds: &Bounds) -> Option<Bounds> {
        self.water
            .iter()
            .find(|water| water.intersects(bounds))
            .copied()
    }

    fn ladder_at(&self, bounds: &Bounds) -> Option<Ladder> {
        self.ladders
            .iter()
            .find(|ladder| ladder.bounds.intersects(bounds))
            .copied()
    }

    fn raycast_down(&self, origin: Vec3, distance: f32) -> Option<f32> {
        self.raycast(origin, Vec3::new(0.0, -1.0, 0.0), distance)
            .map(|hit| hit.distance)
    }
}

///Box shaped character body moved with per axis collision resolution.
///Position is the center of the feet.
#[derive(Debug, Clone)]
pub struct KinematicBody {
    world: Arc<StaticWorld>,
    position: Vec3,
    radius: f32,
    height: f32,
    default_height: f32,
    velocity: Vec3,
    grounded: bool,
    fixed_delta: f32,
}

impl KinematicBody {
    pub fn new(world: Arc<StaticWorld>, position: Vec3, radius: f32, height: f32, fixed_delta: f32) -> Self {
        let mut body = Self {
            world,
            position,
            radius,
            height,
            default_height: height,
            velocity: Vec3::ZERO,
            grounded: false,
            fixed_delta,
        };
        body.grounded = body.touches_ground();
        body
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn world(&self) -> &Arc<StaticWorld> {
        &self.world
    }

    fn bounds_at(&self, position: Vec3, height: f32) -> Bounds {
        Bounds::from_feet(position, self.radius, height)
    }

    fn touches_ground(&self) -> bool {
        if self.position.y <= self.world.floor_y + GROUND_TOLERANCE {
            return true;
        }
        let below = self.bounds_at(self.position - Vec3::new(0.0, GROUND_TOLERANCE, 0.0), self.height);
        self.world.obstacles.iter().any(|obstacle| obstacle.intersects(&below))
    }

    /// Moves along a single axis and pushes back out of anything hit.
    fn move_axis(&mut self, axis: usize, amount: f32) {
        if amount == 0.0 {
            return;
        }
        match axis {
            0 => self.position.x += amount,
            1 => self.position.y += amount,
            _ => self.position.z += amount,
        }

        let bounds = self.bounds_at(self.position, self.height);
        for obstacle in &self.world.obstacles {
            if !obstacle.intersects(&bounds) {
                continue;
            }
            let (min, max) = (obstacle.min(), obstacle.max());
            match (axis, amount > 0.0) {
                (0, true) => self.position.x = min.x - self.radius,
                (0, false) => self.position.x = max.x + self.radius,
                (1, true) => self.position.y = min.y - self.height,
                (1, false) => self.position.y = max.y,
                (_, true) => self.position.z = min.z - self.radius,
                (_, false) => self.position.z = max.z + self.radius,
            }
        }

        if axis == 1 && self.position.y < self.world.floor_y {
            self.position.y = self.world.floor_y;
        }
    }
}

impl Mover for KinematicBody {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.grounded = self.touches_ground();
    }

    fn default_height(&self) -> f32 {
        self.default_height
    }

    fn try_resize(&mut self, height: f32) -> bool {
        if height > self.height && self.world.overlaps_obstacle(&self.bounds_at(self.position, height)) {
            return false;
        }
        self.height = height;
        true
    }

    fn move_by(&mut self, delta: Vec3) -> Vec3 {
        let start = self.position;
        // substeps keep fast moves from tunnelling through thin walls
        let steps = ((delta.magnitude() / (self.radius * 0.5)).ceil() as usize).clamp(1, 64);
        let step = delta.scale(1.0 / steps as f32);
        for _ in 0..steps {
            self.move_axis(0, step.x);
            self.move_axis(2, step.z);
            self.move_axis(1, step.y);
        }

        self.grounded = self.touches_ground();
        let applied = self.position - start;
        self.velocity = applied.scale(1.0 / self.fixed_delta);
        applied
    }

    fn is_grounded(&self) -> bool {
        self.grounded
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn sliding(&self) -> SlidingState {
        SlidingState::None
    }

    fn bounds(&self) -> Bounds {
        self.bounds_at(self.position, self.height)
    }
}

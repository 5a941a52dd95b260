use crate::collider::Bounds;
use crate::math::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Movement state of a character. Encoded as a single byte on the wire.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MoveState {
    #[default]
    Idle,
    Walking,
    Running,
    Crouching,
    Crawling,
    Airborne,
    Climbing,
    Swimming,
    Dead,
}

impl MoveState {
    /// Collider height relative to the default standing height.
    pub fn height_ratio(&self) -> f32 {
        match self {
            MoveState::Crouching => 0.5,
            MoveState::Crawling | MoveState::Swimming | MoveState::Dead => 0.25,
            _ => 1.0,
        }
    }
}

impl fmt::Display for MoveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoveState::Idle => "IDLE",
            MoveState::Walking => "WALKING",
            MoveState::Running => "RUNNING",
            MoveState::Crouching => "CROUCHING",
            MoveState::Crawling => "CRAWLING",
            MoveState::Airborne => "AIRBORNE",
            MoveState::Climbing => "CLIMBING",
            MoveState::Swimming => "SWIMMING",
            MoveState::Dead => "DEAD",
        };
        f.write_str(name)
    }
}

/// Per character movement tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementSettings {
    pub rotation_speed: f32,
    pub walk_speed: f32,
    pub run_speed: f32,
    pub crouch_speed: f32,
    pub crawl_speed: f32,
    pub swim_speed: f32,
    pub swim_surface_offset: f32,
    /// Fraction of the body that must be below the surface to swim.
    pub underwater_threshold: f32,
    pub jump_speed: f32,
    /// Downward speed below which stepping down a ledge still counts as grounded.
    pub fall_minimum_magnitude: f32,
    pub fall_damage_minimum_magnitude: f32,
    pub fall_damage_multiplier: f32,
    pub climb_speed: f32,
    pub gravity_multiplier: f32,
}

impl Default for MovementSettings {
    fn default() -> Self {
        Self {
            rotation_speed: 150.0,
            walk_speed: 5.0,
            run_speed: 8.0,
            crouch_speed: 1.5,
            crawl_speed: 1.0,
            swim_speed: 4.0,
            swim_surface_offset: 0.25,
            underwater_threshold: 0.9,
            jump_speed: 7.0,
            fall_minimum_magnitude: 6.0,
            fall_damage_minimum_magnitude: 13.0,
            fall_damage_multiplier: 2.0,
            climb_speed: 3.0,
            gravity_multiplier: 2.0,
        }
    }
}

impl MovementSettings {
    /// Highest horizontal speed a character may legitimately reach in `state`.
    /// Idle and walking use the run speed so that state changes in flight
    /// never trip the check.
    pub fn max_speed_for(&self, state: MoveState) -> f32 {
        match state {
            MoveState::Idle | MoveState::Walking | MoveState::Running => self.run_speed,
            MoveState::Crawling => self.crawl_speed,
            MoveState::Crouching => self.crouch_speed,
            MoveState::Climbing => self.climb_speed,
            MoveState::Swimming => self.swim_speed,
            MoveState::Airborne => f32::MAX,
            MoveState::Dead => 0.0,
        }
    }
}

/// Counter stamped on every move record. It is bumped on every forced reset
/// so that records sent before the reset can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RouteStamp(pub u32);

impl RouteStamp {
    /// Wraps around on overflow; only equality is ever compared.
    pub fn next(&self) -> RouteStamp {
        RouteStamp(self.0.wrapping_add(1))
    }
}

impl fmt::Display for RouteStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one fixed tick on the controlling side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub route: RouteStamp,
    pub state: MoveState,
    pub position: Vec3,
    pub yaw: f32,
}

impl MoveRecord {
    pub fn new(route: RouteStamp, state: MoveState, position: Vec3, yaw: f32) -> Self {
        Self {
            route,
            state,
            position,
            yaw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlidingState {
    #[default]
    None,
    Starting,
    Sliding,
}

/// Physical character mover driven by the movement state machines.
pub trait Mover {
    fn position(&self) -> Vec3;

    /// Teleports without collision checks.
    fn set_position(&mut self, position: Vec3);

    fn default_height(&self) -> f32;

    /// Resizes the collider keeping the feet in place. Fails when the new
    /// size would overlap geometry.
    fn try_resize(&mut self, height: f32) -> bool;

    /// Moves by `delta` with collision. Returns the displacement actually applied.
    fn move_by(&mut self, delta: Vec3) -> Vec3;

    fn is_grounded(&self) -> bool;

    /// Velocity of the last applied move.
    fn velocity(&self) -> Vec3;

    fn sliding(&self) -> SlidingState;

    fn bounds(&self) -> Bounds;
}

/// Fall damage for a landing, measured from vertical speed only so that
/// running into a wall never hurts.
pub fn fall_damage(last_fall: Vec3, settings: &MovementSettings) -> Option<i32> {
    let magnitude = last_fall.y.abs();
    if magnitude >= settings.fall_damage_minimum_magnitude {
        Some((magnitude * settings.fall_damage_multiplier).round() as i32)
    } else {
        None
    }
}

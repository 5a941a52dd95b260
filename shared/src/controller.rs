//! Movement state machine of the locally controlled character.
//!
//! Once per fixed tick the controller samples the environment, runs the
//! transition function of the current [`MoveState`], moves the body by the
//! resulting velocity and produces the [`MoveRecord`] that is sent to the
//! server. Remote observers never run this code; they replay the records
//! through [`crate::sync::MoveReplica`].

use crate::collider::Bounds;
use crate::math::{forward, right, Vec2, Vec3};
use crate::movement::{MoveRecord, MoveState, MovementSettings, Mover, RouteStamp, SlidingState};
use crate::GRAVITY;
use log::error;
use serde::{Deserialize, Serialize};

/// Per tick intent of the player. All zero while a modal UI has focus.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputIntent {
    pub move_axis: Vec2,
    /// Key rotation axis, -1 to 1.
    pub rotate: f32,
    pub jump: bool,
    pub crouch: bool,
    pub crawl: bool,
    pub run: bool,
}

/// Climbable trigger volume. Climbing input is interpreted in the ladder's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ladder {
    pub bounds: Bounds,
    pub yaw: f32,
}

/// Trigger and ray queries the state machine needs from the level.
pub trait Sensors {
    /// Water volume touching `bounds`.
    fn water_at(&self, bounds: &Bounds) -> Option<Bounds>;

    fn ladder_at(&self, bounds: &Bounds) -> Option<Ladder>;

    /// Distance to the first solid surface straight below `origin`.
    fn raycast_down(&self, origin: Vec3, distance: f32) -> Option<f32>;
}

/// Conditions sampled once before the transition function runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub grounded: bool,
    /// Grounded, or not yet falling faster than the fall minimum.
    pub grounded_within_tolerance: bool,
    pub sliding: SlidingState,
    pub water: Option<Bounds>,
    pub underwater: bool,
    pub ladder: Option<Ladder>,
    pub bounds: Bounds,
    pub health: i32,
    pub endurance: i32,
}

impl Environment {
    pub fn sample<M: Mover, S: Sensors>(
        body: &M,
        sensors: &S,
        settings: &MovementSettings,
        ladder: Option<Ladder>,
        health: i32,
        endurance: i32,
    ) -> Self {
        let bounds = body.bounds();
        let position = body.position();
        let water = sensors.water_at(&bounds);

        // submerged unless the bottom is within reach below the surface
        let underwater = water.map_or(false, |water| {
            let origin = Vec3::new(position.x, water.max().y, position.z);
            let depth = bounds.height() * settings.underwater_threshold;
            sensors.raycast_down(origin, depth).is_none()
        });

        Self {
            grounded: body.is_grounded(),
            grounded_within_tolerance: body.is_grounded()
                || body.velocity().y > -settings.fall_minimum_magnitude,
            sliding: body.sliding(),
            water,
            underwater,
            ladder,
            bounds,
            health,
            endurance,
        }
    }

    fn died(&self) -> bool {
        self.health == 0
    }
}

/// Presentation side effects of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Jumped,
    Landed,
    EnteredLadder,
    LeftLadder,
    Died,
    Revived,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: MoveState,
    pub velocity: Vec3,
    pub cues: Vec<Cue>,
}

/// Output of one fixed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedStep {
    pub record: MoveRecord,
    pub cues: Vec<Cue>,
    /// True while running, used for endurance drain.
    pub running: bool,
}

fn resize<M: Mover>(body: &mut M, ratio: f32) -> bool {
    body.try_resize(body.default_height() * ratio)
}

#[derive(Debug, Clone)]
pub struct LocalController {
    state: MoveState,
    route: RouteStamp,
    yaw: f32,
    move_dir: Vec3,
    velocity: Vec3,
    last_fall: Vec3,
    sprinting_before_airborne: bool,
    ladder: Option<Ladder>,
    settings: MovementSettings,
    fixed_delta: f32,
}

impl LocalController {
    pub fn new(settings: MovementSettings, fixed_delta: f32) -> Self {
        Self {
            state: MoveState::Idle,
            route: RouteStamp::default(),
            yaw: 0.0,
            move_dir: Vec3::ZERO,
            velocity: Vec3::ZERO,
            last_fall: Vec3::ZERO,
            sprinting_before_airborne: false,
            ladder: None,
            settings,
            fixed_delta,
        }
    }

    pub fn state(&self) -> MoveState {
        self.state
    }

    pub fn route(&self) -> RouteStamp {
        self.route
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn set_yaw(&mut self, yaw: f32) {
        self.yaw = yaw;
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn last_fall(&self) -> Vec3 {
        self.last_fall
    }

    pub fn settings(&self) -> &MovementSettings {
        &self.settings
    }

    /// Applies a reset from the server: new position and route, pending
    /// momentum dropped.
    pub fn force_reset<M: Mover>(&mut self, body: &mut M, position: Vec3, route: RouteStamp) {
        body.set_position(position);
        self.route = route;
        self.move_dir = Vec3::ZERO;
    }

    /// Runs one fixed tick and returns the record to send.
    pub fn step_fixed<M: Mover, S: Sensors>(
        &mut self,
        intent: &InputIntent,
        body: &mut M,
        sensors: &S,
        health: i32,
        endurance: i32,
    ) -> FixedStep {
        // the ladder stays latched while climbing until it is fully left
        if self.state != MoveState::Climbing {
            self.ladder = sensors.ladder_at(&body.bounds());
        }
        let env = Environment::sample(body, sensors, &self.settings, self.ladder, health, endurance);

        let transition = self.transition(intent, &env, body);
        self.state = transition.next;

        if !body.is_grounded() {
            self.last_fall = body.velocity();
        }
        body.move_by(transition.velocity.scale(self.fixed_delta));
        self.velocity = body.velocity();

        FixedStep {
            record: MoveRecord::new(self.route, self.state, body.position(), self.yaw),
            cues: transition.cues,
            running: self.state == MoveState::Running,
        }
    }

    /// Computes the next state and desired velocity. Resize requests go to
    /// `body`; a refused resize keeps the current state.
    pub fn transition<M: Mover>(&mut self, intent: &InputIntent, env: &Environment, body: &mut M) -> Transition {
        let input = intent.move_axis.clamp_length();
        let desired = forward(self.yaw) * input.y + right(self.yaw) * input.x;
        let mut cues = Vec::new();

        let next = match self.state {
            MoveState::Idle => self.update_idle(intent, input, desired, env, body, &mut cues),
            MoveState::Walking | MoveState::Running => {
                self.update_walking(intent, desired, env, body, &mut cues)
            }
            MoveState::Crouching => self.update_crouching(intent, desired, env, body, &mut cues),
            MoveState::Crawling => self.update_crawling(intent, desired, env, body, &mut cues),
            MoveState::Airborne => self.update_airborne(intent, desired, env, body, &mut cues),
            MoveState::Climbing => self.update_climbing(input, env, body, &mut cues),
            MoveState::Swimming => self.update_swimming(intent, desired, env, body, &mut cues),
            MoveState::Dead => self.update_dead(env, body, &mut cues),
        };

        Transition {
            next,
            velocity: self.move_dir,
            cues,
        }
    }

    fn rotate(&mut self, intent: &InputIntent) {
        self.yaw += intent.rotate * self.settings.rotation_speed * self.fixed_delta;
    }

    fn apply_gravity(&self, env: &Environment) -> f32 {
        if env.grounded {
            0.0
        } else {
            self.move_dir.y + GRAVITY * self.settings.gravity_multiplier * self.fixed_delta
        }
    }

    fn set_horizontal(&mut self, desired: Vec3, speed: f32, env: &Environment) {
        self.move_dir = Vec3::new(desired.x * speed, self.apply_gravity(env), desired.z * speed);
    }

    fn jump_requested(intent: &InputIntent, env: &Environment) -> bool {
        env.grounded_within_tolerance && env.sliding == SlidingState::None && intent.jump
    }

    fn die<M: Mover>(&mut self, body: &mut M, cues: &mut Vec<Cue>) -> MoveState {
        // dead even if the collider cannot shrink
        resize(body, MoveState::Dead.height_ratio());
        cues.push(Cue::Died);
        MoveState::Dead
    }

    fn enter_ladder(&mut self, ladder: Ladder, cues: &mut Vec<Cue>) -> MoveState {
        self.ladder = Some(ladder);
        self.yaw = ladder.yaw;
        cues.push(Cue::EnteredLadder);
        MoveState::Climbing
    }

    fn update_idle<M: Mover>(
        &mut self,
        intent: &InputIntent,
        input: Vec2,
        desired: Vec3,
        env: &Environment,
        body: &mut M,
        cues: &mut Vec<Cue>,
    ) -> MoveState {
        self.rotate(intent);
        self.set_horizontal(desired, self.settings.walk_speed, env);

        if env.died() {
            return self.die(body, cues);
        }
        if !env.grounded_within_tolerance {
            self.sprinting_before_airborne = false;
            return MoveState::Airborne;
        }
        if Self::jump_requested(intent, env) {
            self.move_dir.y = self.settings.jump_speed;
            self.sprinting_before_airborne = false;
            cues.push(Cue::Jumped);
            return MoveState::Airborne;
        }
        if intent.crouch {
            if resize(body, 0.5) {
                return MoveState::Crouching;
            }
        } else if intent.crawl {
            if resize(body, 0.25) {
                return MoveState::Crawling;
            }
        } else if let Some(ladder) = env.ladder {
            return self.enter_ladder(ladder, cues);
        } else if env.underwater {
            if resize(body, 0.25) {
                return MoveState::Swimming;
            }
        } else if !input.is_zero() {
            return MoveState::Walking;
        }
        MoveState::Idle
    }

    fn update_walking<M: Mover>(
        &mut self,
        intent: &InputIntent,
        desired: Vec3,
        env: &Environment,
        body: &mut M,
        cues: &mut Vec<Cue>,
    ) -> MoveState {
        self.rotate(intent);
        let running = intent.run && env.endurance > 0;
        let speed = if running {
            self.settings.run_speed
        } else {
            self.settings.walk_speed
        };
        let moving = if running {
            MoveState::Running
        } else {
            MoveState::Walking
        };
        self.set_horizontal(desired, speed, env);

        if env.died() {
            return self.die(body, cues);
        }
        if !env.grounded_within_tolerance {
            self.sprinting_before_airborne = running;
            return MoveState::Airborne;
        }
        if Self::jump_requested(intent, env) {
            self.move_dir.y = self.settings.jump_speed;
            self.sprinting_before_airborne = running;
            cues.push(Cue::Jumped);
            return MoveState::Airborne;
        }
        if intent.crouch {
            if resize(body, 0.5) {
                return MoveState::Crouching;
            }
        } else if intent.crawl {
            if resize(body, 0.25) {
                return MoveState::Crawling;
            }
        } else if let Some(ladder) = env.ladder {
            return self.enter_ladder(ladder, cues);
        } else if env.underwater {
            if resize(body, 0.25) {
                return MoveState::Swimming;
            }
        } else if self.move_dir.x == 0.0 && self.move_dir.z == 0.0 {
            return MoveState::Idle;
        }
        moving
    }

    fn update_crouching<M: Mover>(
        &mut self,
        intent: &InputIntent,
        desired: Vec3,
        env: &Environment,
        body: &mut M,
        cues: &mut Vec<Cue>,
    ) -> MoveState {
        self.rotate(intent);
        self.set_horizontal(desired, self.settings.crouch_speed, env);

        if env.died() {
            return self.die(body, cues);
        }
        if !env.grounded_within_tolerance {
            if resize(body, 1.0) {
                self.sprinting_before_airborne = false;
                return MoveState::Airborne;
            }
        } else if Self::jump_requested(intent, env) || intent.crouch {
            // jumping while crouched only stands up
            if resize(body, 1.0) {
                return MoveState::Idle;
            }
        } else if intent.crawl {
            if resize(body, 0.25) {
                return MoveState::Crawling;
            }
        } else if let Some(ladder) = env.ladder {
            if resize(body, 1.0) {
                return self.enter_ladder(ladder, cues);
            }
        } else if env.underwater && resize(body, 0.25) {
            return MoveState::Swimming;
        }
        MoveState::Crouching
    }

    fn update_crawling<M: Mover>(
        &mut self,
        intent: &InputIntent,
        desired: Vec3,
        env: &Environment,
        body: &mut M,
        cues: &mut Vec<Cue>,
    ) -> MoveState {
        self.rotate(intent);
        self.set_horizontal(desired, self.settings.crawl_speed, env);

        if env.died() {
            return self.die(body, cues);
        }
        if !env.grounded_within_tolerance {
            if resize(body, 1.0) {
                self.sprinting_before_airborne = false;
                return MoveState::Airborne;
            }
        } else if Self::jump_requested(intent, env) || intent.crawl {
            if resize(body, 1.0) {
                return MoveState::Idle;
            }
        } else if intent.crouch {
            if resize(body, 0.5) {
                return MoveState::Crouching;
            }
        } else if let Some(ladder) = env.ladder {
            if resize(body, 1.0) {
                return self.enter_ladder(ladder, cues);
            }
        } else if env.underwater && resize(body, 0.25) {
            return MoveState::Swimming;
        }
        MoveState::Crawling
    }

    fn update_airborne<M: Mover>(
        &mut self,
        intent: &InputIntent,
        desired: Vec3,
        env: &Environment,
        body: &mut M,
        cues: &mut Vec<Cue>,
    ) -> MoveState {
        self.rotate(intent);
        // no accelerating mid air, the sprint decision was made before leaving the ground
        let speed = if self.sprinting_before_airborne {
            self.settings.run_speed
        } else {
            self.settings.walk_speed
        };
        self.set_horizontal(desired, speed, env);

        if env.died() {
            return self.die(body, cues);
        }
        if env.grounded {
            cues.push(Cue::Landed);
            return MoveState::Idle;
        }
        if let Some(ladder) = env.ladder {
            return self.enter_ladder(ladder, cues);
        }
        if env.underwater && resize(body, 0.25) {
            return MoveState::Swimming;
        }
        MoveState::Airborne
    }

    fn update_climbing<M: Mover>(
        &mut self,
        input: Vec2,
        env: &Environment,
        body: &mut M,
        cues: &mut Vec<Cue>,
    ) -> MoveState {
        if env.died() {
            self.ladder = None;
            return self.die(body, cues);
        }

        let Some(ladder) = self.ladder else {
            error!("Climbing without a ladder, falling back to {}", MoveState::Idle);
            return MoveState::Idle;
        };
        if !ladder.bounds.intersects(&env.bounds) {
            self.ladder = None;
            cues.push(Cue::LeftLadder);
            return MoveState::Idle;
        }

        // forward means up. no acceleration so sprinting onto a ladder stays slow
        let climb = self.settings.climb_speed;
        self.move_dir = Vec3::new(input.x * climb, input.y * climb, 0.0).rotate_y(ladder.yaw);
        MoveState::Climbing
    }

    fn update_swimming<M: Mover>(
        &mut self,
        intent: &InputIntent,
        desired: Vec3,
        env: &Environment,
        body: &mut M,
        cues: &mut Vec<Cue>,
    ) -> MoveState {
        if env.died() {
            return self.die(body, cues);
        }
        if let Some(ladder) = env.ladder {
            if resize(body, 1.0) {
                return self.enter_ladder(ladder, cues);
            }
        } else if !env.underwater && resize(body, 1.0) {
            return MoveState::Idle;
        }

        self.rotate(intent);
        let swim = self.settings.swim_speed;
        // float towards the surface
        let vertical = match env.water {
            Some(water) => (water.max().y - env.bounds.min().y - self.settings.swim_surface_offset) * swim,
            None => 0.0,
        };
        self.move_dir = Vec3::new(desired.x * swim, vertical, desired.z * swim);
        MoveState::Swimming
    }

    fn update_dead<M: Mover>(&mut self, env: &Environment, body: &mut M, cues: &mut Vec<Cue>) -> MoveState {
        // keep falling if killed mid air
        self.move_dir = Vec3::new(0.0, self.apply_gravity(env), 0.0);

        if env.health > 0 {
            // revive even when something blocks the full size collider
            resize(body, 1.0);
            cues.push(Cue::Revived);
            return MoveState::Idle;
        }
        MoveState::Dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{KinematicBody, StaticWorld};
    use assert_approx_eq::assert_approx_eq;
    use std::sync::Arc;

    const DT: f32 = 0.02;

    fn setup(world: StaticWorld, position: Vec3) -> (LocalController, KinematicBody, Arc<StaticWorld>) {
        let world = Arc::new(world);
        let body = KinematicBody::new(world.clone(), position, 0.4, 2.0, DT);
        (LocalController::new(MovementSettings::default(), DT), body, world)
    }

    fn walk_forward() -> InputIntent {
        InputIntent {
            move_axis: Vec2::new(0.0, 1.0),
            ..InputIntent::default()
        }
    }

    #[test]
    fn test_idle_to_walking_to_idle() {
        let (mut controller, mut body, world) = setup(StaticWorld::flat(), Vec3::ZERO);
        let step = controller.step_fixed(&walk_forward(), &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Walking);

        let step = controller.step_fixed(&walk_forward(), &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Walking);
        assert_approx_eq!(body.position().z, 0.2, 1e-4);

        let step = controller.step_fixed(&InputIntent::default(), &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Idle);
    }

    #[test]
    fn test_running_needs_endurance() {
        let (mut controller, mut body, world) = setup(StaticWorld::flat(), Vec3::ZERO);
        let run = InputIntent {
            run: true,
            ..walk_forward()
        };
        controller.step_fixed(&run, &mut body, world.as_ref(), 100, 100);
        let step = controller.step_fixed(&run, &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Running);
        assert!(step.running);

        let step = controller.step_fixed(&run, &mut body, world.as_ref(), 100, 0);
        assert_eq!(step.record.state, MoveState::Walking);
    }

    #[test]
    fn test_jump_and_land() {
        let (mut controller, mut body, world) = setup(StaticWorld::flat(), Vec3::ZERO);
        let jump = InputIntent {
            jump: true,
            ..InputIntent::default()
        };
        let step = controller.step_fixed(&jump, &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Airborne);
        assert_eq!(step.cues, vec![Cue::Jumped]);
        assert!(body.position().y > 0.0);

        let mut landed = false;
        for _ in 0..200 {
            let step = controller.step_fixed(&InputIntent::default(), &mut body, world.as_ref(), 100, 100);
            if step.cues.contains(&Cue::Landed) {
                landed = true;
                assert_eq!(step.record.state, MoveState::Idle);
                break;
            }
        }
        assert!(landed);
        assert!(controller.last_fall().y < 0.0);
    }

    #[test]
    fn test_crouch_blocked_from_standing_up() {
        let world = StaticWorld {
            obstacles: vec![Bounds::new(Vec3::new(0.0, 1.5, 0.0), Vec3::new(3.0, 0.2, 3.0))],
            ..StaticWorld::flat()
        };
        let (mut controller, mut body, world) = setup(world, Vec3::ZERO);
        // crawled in under the low ceiling
        assert!(body.try_resize(1.0));
        controller.state = MoveState::Crouching;

        let crouch = InputIntent {
            crouch: true,
            ..InputIntent::default()
        };
        let step = controller.step_fixed(&crouch, &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Crouching);
        assert_approx_eq!(body.height(), 1.0);

        let crawl = InputIntent {
            crawl: true,
            ..InputIntent::default()
        };
        let step = controller.step_fixed(&crawl, &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Crawling);
        assert_approx_eq!(body.height(), 0.5);
    }

    #[test]
    fn test_death_and_revival() {
        let (mut controller, mut body, world) = setup(StaticWorld::flat(), Vec3::ZERO);
        let step = controller.step_fixed(&walk_forward(), &mut body, world.as_ref(), 0, 100);
        assert_eq!(step.record.state, MoveState::Dead);
        assert_approx_eq!(body.height(), 0.5);

        let z = body.position().z;
        let step = controller.step_fixed(&walk_forward(), &mut body, world.as_ref(), 0, 100);
        assert_eq!(step.record.state, MoveState::Dead);
        assert_approx_eq!(body.position().z, z);

        let step = controller.step_fixed(&InputIntent::default(), &mut body, world.as_ref(), 50, 100);
        assert_eq!(step.record.state, MoveState::Idle);
        assert_eq!(step.cues, vec![Cue::Revived]);
        assert_approx_eq!(body.height(), 2.0);
    }

    #[test]
    fn test_climb_ladder_in_ladder_frame() {
        let ladder = Ladder {
            bounds: Bounds::new(Vec3::new(0.0, 3.0, 0.5), Vec3::new(0.6, 3.0, 0.4)),
            yaw: 90.0,
        };
        let world = StaticWorld {
            ladders: vec![ladder],
            ..StaticWorld::flat()
        };
        let (mut controller, mut body, world) = setup(world, Vec3::ZERO);
        let step = controller.step_fixed(&walk_forward(), &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Climbing);
        assert_eq!(step.cues, vec![Cue::EnteredLadder]);
        assert_approx_eq!(controller.yaw(), 90.0);

        let before = body.position();
        controller.step_fixed(&walk_forward(), &mut body, world.as_ref(), 100, 100);
        let after = body.position();
        assert_approx_eq!(after.y - before.y, 3.0 * DT, 1e-4);
        assert_approx_eq!(after.x, before.x, 1e-4);

        let mut left = false;
        for _ in 0..300 {
            let step = controller.step_fixed(&walk_forward(), &mut body, world.as_ref(), 100, 100);
            if step.cues.contains(&Cue::LeftLadder) {
                left = true;
                break;
            }
        }
        assert!(left);
        assert!(body.position().y >= 6.0);
    }

    #[test]
    fn test_swimming_in_deep_water() {
        let world = StaticWorld {
            water: vec![Bounds::new(Vec3::new(0.0, 1.5, 0.0), Vec3::new(5.0, 1.5, 5.0))],
            ..StaticWorld::flat()
        };
        let (mut controller, mut body, world) = setup(world, Vec3::ZERO);
        let step = controller.step_fixed(&InputIntent::default(), &mut body, world.as_ref(), 100, 100);
        assert_eq!(step.record.state, MoveState::Swimming);

        for _ in 0..200 {
            controller.step_fixed(&InputIntent::default(), &mut body, world.as_ref(), 100, 100);
        }
        assert_eq!(controller.state(), MoveState::Swimming);
        assert_approx_eq!(body.position().y, 3.0 - 0.25, 0.05);
    }

    #[test]
    fn test_key_rotation() {
        let (mut controller, mut body, world) = setup(StaticWorld::flat(), Vec3::ZERO);
        let turn = InputIntent {
            rotate: 1.0,
            ..InputIntent::default()
        };
        controller.step_fixed(&turn, &mut body, world.as_ref(), 100, 100);
        assert_approx_eq!(controller.yaw(), 150.0 * DT);
    }

    #[test]
    fn test_walking_off_a_ledge_becomes_airborne() {
        let world = StaticWorld {
            obstacles: vec![Bounds::new(Vec3::new(0.0, 5.0, 0.0), Vec3::new(1.0, 5.0, 1.0))],
            ..StaticWorld::flat()
        };
        let (mut controller, mut body, world) = setup(world, Vec3::new(0.0, 10.0, 0.0));
        let mut airborne = false;
        for _ in 0..100 {
            let step = controller.step_fixed(&walk_forward(), &mut body, world.as_ref(), 100, 100);
            if step.record.state == MoveState::Airborne {
                airborne = true;
                break;
            }
        }
        assert!(airborne);
    }
}

//! Server side monster AI.
//!
//! Each monster runs a small state machine over [`MonsterState`], evaluated
//! once per fixed tick. Every state checks its events in priority order and
//! the first one that matches decides the next state. Clients only ever see
//! the resulting state and target.
//!
//! Range checks use the gap between colliders. Comparing two aggro
//! candidates is the exception: it uses feet positions so that colliders
//! moving with animations do not make the monster flip between targets.

use crate::navigation::SteeringAgent;
use log::{debug, info};
use rand::Rng;
use shared::collider::{closest_distance, is_reachable_vertically, Bounds};
use shared::entity::{EntityId, EntityKind, MonsterState};
use shared::math::{yaw_towards, Vec3};
use shared::movement::Mover;
use shared::physics::KinematicBody;

/// A new candidate must be this much closer than the current target.
const SWITCH_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonsterSettings {
    pub walk_speed: f32,
    pub run_speed: f32,
    /// Chance per second to wander while idle.
    pub move_probability: f32,
    /// Wander radius around the anchor.
    pub move_distance: f32,
    /// Leash range around the anchor.
    pub follow_distance: f32,
    /// How close to move in, as a fraction of the attack range.
    pub attack_to_move_ratio: f32,
    pub attack_range: f32,
    /// Seconds one attack takes.
    pub attack_interval: f64,
    /// Whether running out of range cancels an attack in progress.
    pub allow_kiting: bool,
    pub aggro_radius: f32,
    pub respawn_delay: f64,
}

impl Default for MonsterSettings {
    fn default() -> Self {
        Self {
            walk_speed: 1.0,
            run_speed: 5.0,
            move_probability: 0.1,
            move_distance: 10.0,
            follow_distance: 20.0,
            attack_to_move_ratio: 0.5,
            attack_range: 2.0,
            attack_interval: 0.5,
            allow_kiting: false,
            aggro_radius: 8.0,
            respawn_delay: 10.0,
        }
    }
}

/// What a monster knows about another entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetInfo {
    pub kind: EntityKind,
    pub health: i32,
    /// Feet position.
    pub position: Vec3,
    pub bounds: Bounds,
}

/// Read only view of the world, as committed by the previous tick.
pub trait AiWorld {
    /// `None` when the entity is gone.
    fn target(&self, id: EntityId) -> Option<TargetInfo>;
    fn is_blocked(&self, from: Vec3, to: Vec3) -> bool;
}

/// Side effects the server carries out for a monster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonsterAction {
    AttackStarted,
    /// The attack finished; deal damage to `target`.
    Strike { target: EntityId },
}

#[derive(Debug, Clone)]
pub struct Monster {
    pub entity_id: EntityId,
    pub settings: MonsterSettings,
    state: MonsterState,
    target: Option<EntityId>,
    anchor: Vec3,
    attack_end_time: f64,
    yaw: f32,
    agent: SteeringAgent,
    body: KinematicBody,
    died_at: Option<f64>,
}

impl Monster {
    /// The body's position becomes the anchor for wandering, leashing and
    /// respawning. A monster spawned dead starts in [`MonsterState::Dead`].
    pub fn new(entity_id: EntityId, settings: MonsterSettings, body: KinematicBody, alive: bool) -> Self {
        Self {
            entity_id,
            settings,
            state: if alive { MonsterState::Idle } else { MonsterState::Dead },
            target: None,
            anchor: body.position(),
            attack_end_time: 0.0,
            yaw: 0.0,
            agent: SteeringAgent::new(),
            body,
            died_at: None,
        }
    }

    pub fn state(&self) -> MonsterState {
        self.state
    }

    pub fn target(&self) -> Option<EntityId> {
        self.target
    }

    pub fn anchor(&self) -> Vec3 {
        self.anchor
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn position(&self) -> Vec3 {
        self.body.position()
    }

    pub fn bounds(&self) -> Bounds {
        self.body.bounds()
    }

    pub fn agent(&self) -> &SteeringAgent {
        &self.agent
    }

    /// Simulation time of the last death, while dead.
    pub fn died_at(&self) -> Option<f64> {
        self.died_at
    }

    fn is_reachable<W: AiWorld>(&self, other: &Bounds, world: &W) -> bool {
        is_reachable_vertically(&self.body.bounds(), other, self.settings.attack_range, |a, b| {
            world.is_blocked(a, b)
        })
    }

    fn too_far_to_attack(&self, info: &TargetInfo) -> bool {
        closest_distance(&self.body.bounds(), &info.bounds) > self.settings.attack_range
    }

    fn too_far_to_follow(&self, info: &TargetInfo) -> bool {
        let closest = info.bounds.closest_point(self.body.position());
        self.anchor.distance(&closest) > self.settings.follow_distance
    }

    fn in_range_but_unreachable<W: AiWorld>(&self, info: &TargetInfo, world: &W) -> bool {
        closest_distance(&self.body.bounds(), &info.bounds) <= self.settings.attack_range
            && !self.is_reachable(&info.bounds, world)
    }

    fn chase(&mut self, info: &TargetInfo, stopping_distance: f32) {
        let destination = info.bounds.closest_point(self.body.position());
        self.agent
            .set_destination(destination, self.settings.run_speed, stopping_distance);
    }

    fn return_home(&mut self) {
        self.target = None;
        self.agent.set_destination(self.anchor, self.settings.walk_speed, 0.0);
    }

    fn start_attack(&mut self, now: f64, actions: &mut Vec<MonsterAction>) -> MonsterState {
        self.attack_end_time = now + self.settings.attack_interval;
        actions.push(MonsterAction::AttackStarted);
        MonsterState::Attacking
    }

    /// Offers `candidate` as a target, from the aggro area or because it
    /// damaged this monster.
    pub fn on_aggro<W: AiWorld>(&mut self, candidate: EntityId, world: &W) {
        if self.state == MonsterState::Dead {
            return;
        }
        let info = match world.target(candidate) {
            Some(info) if info.kind.is_attackable() && info.health > 0 => info,
            _ => return,
        };

        let current = match self.target {
            None => {
                self.target = Some(candidate);
                return;
            }
            Some(current) if current == candidate => return,
            Some(current) => current,
        };

        let current_info = match world.target(current) {
            Some(current_info) => current_info,
            None => {
                self.target = Some(candidate);
                return;
            }
        };

        let position = self.body.position();
        let old_distance = position.distance(&current_info.position) as f64;
        let new_distance = position.distance(&info.position) as f64;
        if new_distance < old_distance * SWITCH_RATIO
            || (!self.is_reachable(&current_info.bounds, world) && self.is_reachable(&info.bounds, world))
        {
            debug!("Monster {} switches target {} -> {}", self.entity_id, current, candidate);
            self.target = Some(candidate);
        }
    }

    /// Runs one tick of the state machine and moves the body.
    pub fn update<W: AiWorld, R: Rng>(
        &mut self,
        now: f64,
        dt: f32,
        world: &W,
        rng: &mut R,
    ) -> Vec<MonsterAction> {
        let mut actions = Vec::new();

        let target = self
            .target
            .and_then(|id| world.target(id).map(|info| (id, info)));
        if target.is_none() {
            self.target = None;
        }

        self.state = match self.state {
            MonsterState::Idle => self.update_idle(target, now, dt, world, rng, &mut actions),
            MonsterState::Moving => self.update_moving(target, now, world, &mut actions),
            MonsterState::Attacking => self.update_attacking(target, now, &mut actions),
            MonsterState::Dead => MonsterState::Dead,
        };

        if self.state != MonsterState::Dead {
            if let Some(yaw) = self.agent.step(&mut self.body, dt) {
                self.yaw = yaw;
            }
        }
        actions
    }

    fn update_idle<W: AiWorld, R: Rng>(
        &mut self,
        target: Option<(EntityId, TargetInfo)>,
        now: f64,
        dt: f32,
        world: &W,
        rng: &mut R,
        actions: &mut Vec<MonsterAction>,
    ) -> MonsterState {
        // wait for the path instead of flickering between idle and moving
        if self.agent.path_pending() {
            return MonsterState::Idle;
        }
        if self.agent.has_path() {
            return MonsterState::Moving;
        }

        if let Some((_, info)) = target {
            if info.health <= 0 {
                self.target = None;
                return MonsterState::Idle;
            }
            if self.too_far_to_follow(&info) {
                self.return_home();
                return MonsterState::Idle;
            }
            if self.too_far_to_attack(&info) || self.in_range_but_unreachable(&info, world) {
                self.chase(&info, 0.0);
                return MonsterState::Idle;
            }
            return self.start_attack(now, actions);
        }

        if rng.gen::<f32>() <= self.settings.move_probability * dt {
            let (x, z) = random_in_unit_circle(rng);
            let offset = Vec3::new(x, 0.0, z) * self.settings.move_distance;
            self.agent
                .set_destination(self.anchor + offset, self.settings.walk_speed, 0.0);
            return MonsterState::Moving;
        }

        MonsterState::Idle
    }

    fn update_moving<W: AiWorld>(
        &mut self,
        target: Option<(EntityId, TargetInfo)>,
        now: f64,
        world: &W,
        actions: &mut Vec<MonsterAction>,
    ) -> MonsterState {
        if !self.agent.is_moving(self.body.position()) {
            return MonsterState::Idle;
        }

        if let Some((_, info)) = target {
            if info.health <= 0 {
                self.target = None;
                self.agent.reset_movement();
                return MonsterState::Idle;
            }
            if self.too_far_to_follow(&info) {
                self.return_home();
                return MonsterState::Moving;
            }
            if self.too_far_to_attack(&info) || self.in_range_but_unreachable(&info, world) {
                self.chase(&info, 0.0);
                return MonsterState::Moving;
            }
            // close in a little further so one step back does not break the attack
            let position = self.body.position();
            let closest = info.bounds.closest_point(position);
            if position.distance(&closest) <= self.settings.attack_range * self.settings.attack_to_move_ratio
                && self.is_reachable(&info.bounds, world)
            {
                self.agent.reset_movement();
                return self.start_attack(now, actions);
            }
        }

        MonsterState::Moving
    }

    fn update_attacking(
        &mut self,
        target: Option<(EntityId, TargetInfo)>,
        now: f64,
        actions: &mut Vec<MonsterAction>,
    ) -> MonsterState {
        if self.agent.path_pending() {
            return MonsterState::Attacking;
        }
        if self.agent.has_path() {
            return MonsterState::Moving;
        }

        let (target_id, info) = match target {
            Some((id, info)) if info.health > 0 => (id, info),
            _ => {
                self.target = None;
                return MonsterState::Idle;
            }
        };

        if let Some(yaw) = yaw_towards(self.body.position(), info.position) {
            self.yaw = yaw;
        }

        if now >= self.attack_end_time {
            actions.push(MonsterAction::Strike { target: target_id });
            return MonsterState::Idle;
        }

        if self.settings.allow_kiting {
            if self.too_far_to_attack(&info) {
                let stopping = self.settings.attack_range * self.settings.attack_to_move_ratio;
                self.chase(&info, stopping);
                return MonsterState::Attacking;
            }
            if self.too_far_to_follow(&info) {
                self.return_home();
                return MonsterState::Attacking;
            }
        }

        MonsterState::Attacking
    }

    /// Called after a strike was resolved so a dead target is not chased
    /// again once it respawns.
    pub fn on_strike_resolved(&mut self, target_alive: bool) {
        if !target_alive {
            self.target = None;
        }
    }

    pub fn on_death(&mut self, now: f64) {
        info!("Monster {} died", self.entity_id);
        self.state = MonsterState::Dead;
        self.agent.reset_movement();
        self.target = None;
        self.died_at = Some(now);
    }

    /// Warps back to the anchor. The caller restores health first.
    pub fn on_respawn(&mut self) {
        info!("Monster {} respawned", self.entity_id);
        let anchor = self.anchor;
        self.agent.warp(&mut self.body, anchor);
        self.state = MonsterState::Idle;
        self.died_at = None;
    }
}

fn random_in_unit_circle<R: Rng>(rng: &mut R) -> (f32, f32) {
    loop {
        let x = rng.gen_range(-1.0f32..=1.0);
        let z = rng.gen_range(-1.0f32..=1.0);
        if x * x + z * z <= 1.0 {
            return (x, z);
        }
    }
}

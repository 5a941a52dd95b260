//! Observer side reconciliation of remotely controlled characters.
//!
//! Every observer of a character (the server included) buffers the move
//! records produced by the controlling client and replays them one fixed tick
//! at a time. The authoritative side additionally validates each applied move
//! and forces a reset ("warp") whenever the character moved too fast, moved
//! while dead, drifted too far from its claimed position or flooded the
//! buffer. A warp bumps the route stamp so records still in flight are
//! discarded on arrival.

use crate::math::Vec3;
use crate::movement::{MoveRecord, MoveState, MovementSettings, Mover, RouteStamp};
use log::{debug, warn};
use std::collections::VecDeque;

/// Displacements shorter than this are treated as standing still.
pub const MOVE_EPSILON: f32 = 0.1;

/// Buffering and validation tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    /// Moves to buffer before applying any.
    pub min_move_buffer: usize,
    /// Two moves are applied as one once this many are pending.
    pub combine_moves_after: usize,
    /// Buffered moves beyond this trigger a forced reset.
    pub max_move_buffer: usize,
    pub rubber_distance: f32,
    pub valid_speed_tolerance: f32,
    pub fixed_delta: f32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            min_move_buffer: 2,
            combine_moves_after: 5,
            max_move_buffer: 10,
            rubber_distance: 1.0,
            valid_speed_tolerance: 0.2,
            fixed_delta: 0.02,
        }
    }
}

fn clamp_count(value: usize, min: usize, max: usize) -> usize {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

impl SyncSettings {
    /// Brings the buffer thresholds into a consistent order.
    pub fn validated(mut self) -> Self {
        self.min_move_buffer = clamp_count(self.min_move_buffer, 1, self.max_move_buffer);
        self.combine_moves_after = clamp_count(
            self.combine_moves_after,
            self.min_move_buffer + 1,
            self.max_move_buffer,
        );
        self.max_move_buffer = clamp_count(self.max_move_buffer, self.combine_moves_after + 1, 50);
        self
    }
}

/// Bounded FIFO of pending move records.
#[derive(Debug, Clone)]
pub struct MoveBuffer {
    records: VecDeque<MoveRecord>,
    capacity: usize,
}

impl MoveBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false and drops the record when the buffer is full.
    pub fn push(&mut self, record: MoveRecord) -> bool {
        if self.records.len() >= self.capacity {
            return false;
        }
        self.records.push_back(record);
        true
    }

    pub fn pop(&mut self) -> Option<MoveRecord> {
        self.records.pop_front()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Outcome of offering a record to a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Accepted,
    /// Sent before the last forced reset.
    StaleRoute,
    BufferFull,
}

impl Receipt {
    /// Whether the record should still be relayed to other observers.
    pub fn should_relay(&self) -> bool {
        !matches!(self, Receipt::StaleRoute)
    }
}

/// Things observers must hear about after a fixed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncEvent {
    Warped { position: Vec3, route: RouteStamp },
    /// Left the airborne state. Carries the last downward velocity.
    Landed { last_fall: Vec3 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    pub combined_moves: u64,
    pub rubber_banded: u64,
    pub rejected_moves: u64,
    pub forced_resets: u64,
}

/// A move is acceptable when it is (nearly) zero or the actor is not dead.
pub fn is_valid_move(displacement: Vec3, state: MoveState) -> bool {
    if displacement.magnitude() <= MOVE_EPSILON {
        return true;
    }
    state != MoveState::Dead
}

/// Horizontal speed check against the faster of the two involved states.
pub fn was_valid_speed(
    velocity: Vec3,
    previous: MoveState,
    next: MoveState,
    combining: bool,
    sync: &SyncSettings,
    movement: &MovementSettings,
) -> bool {
    let speed = velocity.horizontal_magnitude();
    let max_speed = movement
        .max_speed_for(previous)
        .max(movement.max_speed_for(next));
    let mut allowed = max_speed * (1.0 + sync.valid_speed_tolerance);
    if combining {
        allowed *= 2.0;
    }
    if speed <= allowed {
        true
    } else {
        debug!(
            "Move rejected because too fast: combining={} xz speed={:.2} / {:.2} state={}=>{}",
            combining, speed, allowed, previous, next
        );
        false
    }
}

/// Replayed view of one character on an observing peer.
#[derive(Debug, Clone)]
pub struct MoveReplica {
    authoritative: bool,
    route: RouteStamp,
    state: MoveState,
    last_state: MoveState,
    yaw: f32,
    velocity: Vec3,
    last_fall: Vec3,
    buffer: MoveBuffer,
    sync: SyncSettings,
    movement: MovementSettings,
    stats: ReplicaStats,
}

impl MoveReplica {
    pub fn new(authoritative: bool, sync: SyncSettings, movement: MovementSettings) -> Self {
        let sync = sync.validated();
        Self {
            authoritative,
            route: RouteStamp::default(),
            state: MoveState::Idle,
            last_state: MoveState::Idle,
            yaw: 0.0,
            velocity: Vec3::ZERO,
            last_fall: Vec3::ZERO,
            buffer: MoveBuffer::new(sync.max_move_buffer),
            sync,
            movement,
            stats: ReplicaStats::default(),
        }
    }

    pub fn route(&self) -> RouteStamp {
        self.route
    }

    pub fn state(&self) -> MoveState {
        self.state
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReplicaStats {
        self.stats
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Queues a record from the network. Nothing moves until the next step.
    pub fn receive(&mut self, record: MoveRecord) -> Receipt {
        if record.route != self.route {
            return Receipt::StaleRoute;
        }
        if !self.buffer.push(record) {
            return Receipt::BufferFull;
        }
        Receipt::Accepted
    }

    /// Adopts a reset announced by the authoritative side.
    pub fn force_reset<M: Mover>(&mut self, body: &mut M, position: Vec3, route: RouteStamp) {
        body.set_position(position);
        self.route = route;
        self.buffer.clear();
    }

    /// Authoritative reset: teleports, bumps the route and drops everything
    /// buffered. The returned event must be broadcast to every observer.
    pub fn warp<M: Mover>(&mut self, body: &mut M, position: Vec3) -> SyncEvent {
        body.set_position(position);
        self.route = self.route.next();
        self.buffer.clear();
        self.stats.forced_resets += 1;
        SyncEvent::Warped {
            position,
            route: self.route,
        }
    }

    /// Overrides the state without a record, e.g. when the server kills or
    /// revives the character.
    pub fn set_state<M: Mover>(&mut self, body: &mut M, state: MoveState) {
        self.enter_state(body, state);
    }

    fn enter_state<M: Mover>(&mut self, body: &mut M, next: MoveState) {
        if next != self.state {
            self.state = next;
            body.try_resize(body.default_height() * next.height_ratio());
        }
    }

    /// Applies buffered records for one fixed tick.
    pub fn step_fixed<M: Mover>(&mut self, body: &mut M) -> Vec<SyncEvent> {
        let mut events = Vec::new();

        if !body.is_grounded() {
            self.last_fall = self.velocity;
        }

        let pending = self.buffer.len();
        if pending > 0 && pending >= self.sync.min_move_buffer {
            if self.authoritative && pending >= self.sync.max_move_buffer {
                warn!(
                    "{} pending moves exceed the buffer limit, forcing reset at route {}",
                    pending, self.route
                );
                let position = body.position();
                events.push(self.warp(body, position));
            } else if pending >= 2 && pending >= self.sync.combine_moves_after {
                self.apply_combined(body, &mut events);
            } else {
                self.apply_single(body, &mut events);
            }
        }

        if self.last_state == MoveState::Airborne && self.state != MoveState::Airborne {
            events.push(SyncEvent::Landed {
                last_fall: self.last_fall,
            });
        }

        self.last_state = self.state;
        events
    }

    fn apply_single<M: Mover>(&mut self, body: &mut M, events: &mut Vec<SyncEvent>) {
        let Some(next) = self.buffer.pop() else {
            return;
        };
        let previous_position = body.position();
        let previous_state = self.state;
        let delta = next.position - previous_position;

        if self.authoritative && !is_valid_move(delta, self.state) {
            self.reject(body, delta, "single", events);
            return;
        }

        let previous_yaw = self.yaw;
        self.enter_state(body, next.state);
        self.yaw = next.yaw;
        let applied = body.move_by(delta);
        self.velocity = applied.scale(1.0 / self.sync.fixed_delta);

        if self.authoritative
            && !self.check_applied(body, delta, previous_position, previous_state, next.position, false, events)
        {
            self.yaw = previous_yaw;
        }
    }

    /// Moves straight from the current position to the second record. Two
    /// legs that walk around a corner may cut through it when joined, in
    /// which case the rubber band check snaps the actor back.
    fn apply_combined<M: Mover>(&mut self, body: &mut M, events: &mut Vec<SyncEvent>) {
        let (Some(first), Some(second)) = (self.buffer.pop(), self.buffer.pop()) else {
            return;
        };
        let previous_position = body.position();
        let previous_state = self.state;
        let delta = second.position - previous_position;

        if self.authoritative && !is_valid_move(delta, self.state) {
            self.reject(body, delta, "combined", events);
            return;
        }

        let previous_yaw = self.yaw;
        self.enter_state(body, second.state);
        self.yaw = second.yaw;
        let applied = body.move_by(delta);
        self.stats.combined_moves += 1;

        if self.authoritative {
            self.velocity = applied.scale(1.0 / self.sync.fixed_delta);
            if !self.check_applied(body, delta, previous_position, previous_state, second.position, true, events) {
                self.yaw = previous_yaw;
            }
        }
        // animation speed stays that of a single tick
        self.velocity = (second.position - first.position).scale(1.0 / self.sync.fixed_delta);
    }

    fn check_applied<M: Mover>(
        &mut self,
        body: &mut M,
        delta: Vec3,
        previous_position: Vec3,
        previous_state: MoveState,
        expected: Vec3,
        combining: bool,
        events: &mut Vec<SyncEvent>,
    ) -> bool {
        // dead characters may still drift by network noise
        let dead_drift = delta.magnitude() <= MOVE_EPSILON
            && (previous_state == MoveState::Dead || self.state == MoveState::Dead);
        if !dead_drift && !was_valid_speed(
            self.velocity,
            previous_state,
            self.state,
            combining,
            &self.sync,
            &self.movement,
        ) {
            self.stats.rejected_moves += 1;
            warn!(
                "Speed violation ({:.2} m/s, {}=>{}), resetting to {:?}",
                self.velocity.horizontal_magnitude(),
                previous_state,
                self.state,
                previous_position
            );
            events.push(self.warp(body, previous_position));
            return false;
        }

        let position = body.position();
        if position.distance(&expected) >= self.sync.rubber_distance {
            self.stats.rubber_banded += 1;
            debug!(
                "Rubber band: at {:?} but client claims {:?}",
                position, expected
            );
            events.push(self.warp(body, position));
        }
        true
    }

    fn reject<M: Mover>(&mut self, body: &mut M, delta: Vec3, kind: &str, events: &mut Vec<SyncEvent>) {
        self.stats.rejected_moves += 1;
        let position = body.position();
        warn!(
            "{} move {:?} rejected in state {}, force reset to {:?}",
            kind, delta, self.state, position
        );
        events.push(self.warp(body, position));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::Bounds;
    use crate::movement::SlidingState;
    use assert_approx_eq::assert_approx_eq;

    /// Collision free mover. An optional wall on the x axis stops movement.
    struct TestMover {
        position: Vec3,
        height: f32,
        wall_x: Option<f32>,
        velocity: Vec3,
    }

    impl TestMover {
        fn at(position: Vec3) -> Self {
            Self {
                position,
                height: 2.0,
                wall_x: None,
                velocity: Vec3::ZERO,
            }
        }
    }

    impl Mover for TestMover {
        fn position(&self) -> Vec3 {
            self.position
        }
        fn set_position(&mut self, position: Vec3) {
            self.position = position;
        }
        fn default_height(&self) -> f32 {
            2.0
        }
        fn try_resize(&mut self, height: f32) -> bool {
            self.height = height;
            true
        }
        fn move_by(&mut self, delta: Vec3) -> Vec3 {
            let mut target = self.position + delta;
            if let Some(wall) = self.wall_x {
                target.x = target.x.min(wall);
            }
            let applied = target - self.position;
            self.position = target;
            self.velocity = applied.scale(1.0 / 0.02);
            applied
        }
        fn is_grounded(&self) -> bool {
            true
        }
        fn velocity(&self) -> Vec3 {
            self.velocity
        }
        fn sliding(&self) -> SlidingState {
            SlidingState::None
        }
        fn bounds(&self) -> Bounds {
            Bounds::from_feet(self.position, 0.5, self.height)
        }
    }

    fn record(route: u32, state: MoveState, x: f32) -> MoveRecord {
        MoveRecord::new(RouteStamp(route), state, Vec3::new(x, 0.0, 0.0), 0.0)
    }

    fn server_replica() -> MoveReplica {
        MoveReplica::new(true, SyncSettings::default(), MovementSettings::default())
    }

    #[test]
    fn test_validated_defaults_unchanged() {
        assert_eq!(SyncSettings::default().validated(), SyncSettings::default());
    }

    #[test]
    fn test_validated_clamps_thresholds() {
        let settings = SyncSettings {
            min_move_buffer: 0,
            combine_moves_after: 0,
            max_move_buffer: 3,
            ..SyncSettings::default()
        }
        .validated();
        assert_eq!(settings.min_move_buffer, 1);
        assert_eq!(settings.combine_moves_after, 2);
        assert_eq!(settings.max_move_buffer, 3);

        let settings = SyncSettings {
            combine_moves_after: 10,
            max_move_buffer: 10,
            ..SyncSettings::default()
        }
        .validated();
        assert_eq!(settings.max_move_buffer, 11);

        let settings = SyncSettings {
            max_move_buffer: 500,
            ..SyncSettings::default()
        }
        .validated();
        assert_eq!(settings.max_move_buffer, 50);
    }

    #[test]
    fn test_buffer_drops_beyond_capacity() {
        let mut buffer = MoveBuffer::new(2);
        assert!(buffer.push(record(0, MoveState::Idle, 0.0)));
        assert!(buffer.push(record(0, MoveState::Idle, 0.0)));
        assert!(!buffer.push(record(0, MoveState::Idle, 0.0)));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_is_valid_move() {
        assert!(is_valid_move(Vec3::new(0.05, 0.0, 0.0), MoveState::Dead));
        assert!(!is_valid_move(Vec3::new(0.5, 0.0, 0.0), MoveState::Dead));
        assert!(is_valid_move(Vec3::new(0.5, 0.0, 0.0), MoveState::Walking));
    }

    #[test]
    fn test_was_valid_speed_uses_faster_state_and_ignores_y() {
        let sync = SyncSettings::default();
        let movement = MovementSettings::default();
        let fast = Vec3::new(9.0, -50.0, 0.0);
        assert!(was_valid_speed(fast, MoveState::Crouching, MoveState::Running, false, &sync, &movement));
        assert!(!was_valid_speed(fast, MoveState::Crouching, MoveState::Crouching, false, &sync, &movement));
        let doubled = Vec3::new(19.0, 0.0, 0.0);
        assert!(!was_valid_speed(doubled, MoveState::Running, MoveState::Running, false, &sync, &movement));
        assert!(was_valid_speed(doubled, MoveState::Running, MoveState::Running, true, &sync, &movement));
    }

    #[test]
    fn test_waits_for_min_buffer() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        replica.receive(record(0, MoveState::Walking, 0.1));
        assert!(replica.step_fixed(&mut body).is_empty());
        assert_approx_eq!(body.position.x, 0.0);

        replica.receive(record(0, MoveState::Walking, 0.2));
        replica.step_fixed(&mut body);
        assert_approx_eq!(body.position.x, 0.1);
        assert_eq!(replica.state(), MoveState::Walking);
        assert_eq!(replica.pending(), 1);
    }

    #[test]
    fn test_stale_route_dropped() {
        let mut replica = server_replica();
        assert_eq!(replica.receive(record(1, MoveState::Idle, 0.0)), Receipt::StaleRoute);
        assert_eq!(replica.pending(), 0);
    }

    #[test]
    fn test_full_buffer_forces_reset() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        for i in 0..12 {
            let receipt = replica.receive(record(0, MoveState::Walking, 0.1 * i as f32));
            if i < 10 {
                assert_eq!(receipt, Receipt::Accepted);
            } else {
                assert_eq!(receipt, Receipt::BufferFull);
            }
        }

        let events = replica.step_fixed(&mut body);
        assert_eq!(
            events,
            vec![SyncEvent::Warped {
                position: Vec3::ZERO,
                route: RouteStamp(1)
            }]
        );
        assert_eq!(replica.pending(), 0);
        assert_eq!(replica.route(), RouteStamp(1));
    }

    #[test]
    fn test_combined_move_targets_second_record() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        for i in 1..=5 {
            replica.receive(record(0, MoveState::Running, 0.15 * i as f32));
        }

        let events = replica.step_fixed(&mut body);
        assert!(events.is_empty());
        assert_approx_eq!(body.position.x, 0.3);
        assert_eq!(replica.pending(), 3);
        assert_eq!(replica.stats().combined_moves, 1);
        assert_approx_eq!(replica.velocity().x, 7.5, 1e-3);
    }

    #[test]
    fn test_speed_hack_warps_back() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        replica.receive(record(0, MoveState::Walking, 1.0));
        replica.receive(record(0, MoveState::Walking, 2.0));

        let events = replica.step_fixed(&mut body);
        assert_eq!(
            events,
            vec![SyncEvent::Warped {
                position: Vec3::ZERO,
                route: RouteStamp(1)
            }]
        );
        assert_approx_eq!(body.position.x, 0.0);
        assert_eq!(replica.stats().rejected_moves, 1);
        assert_eq!(replica.pending(), 0);
    }

    #[test]
    fn test_rejected_move_keeps_previous_yaw() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        let mut turn = record(0, MoveState::Walking, 0.1);
        turn.yaw = 30.0;
        let mut teleport = record(0, MoveState::Walking, 9.0);
        teleport.yaw = f32::NAN;
        replica.receive(turn);
        replica.receive(teleport);
        replica.step_fixed(&mut body);
        assert_approx_eq!(replica.yaw(), 30.0);

        replica.receive(record(0, MoveState::Walking, 9.1));
        let events = replica.step_fixed(&mut body);
        assert!(matches!(events.as_slice(), [SyncEvent::Warped { .. }]));
        assert_approx_eq!(replica.yaw(), 30.0);
    }

    #[test]
    fn test_moving_while_dead_rejected() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        replica.set_state(&mut body, MoveState::Dead);
        replica.receive(record(0, MoveState::Dead, 0.12));
        replica.receive(record(0, MoveState::Dead, 0.12));

        let events = replica.step_fixed(&mut body);
        assert_eq!(events.len(), 1);
        assert_approx_eq!(body.position.x, 0.0);
        assert_approx_eq!(body.height, 0.5);
    }

    #[test]
    fn test_standing_still_while_dead_allowed() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        replica.set_state(&mut body, MoveState::Dead);
        replica.receive(record(0, MoveState::Dead, 0.05));
        replica.receive(record(0, MoveState::Dead, 0.05));

        assert!(replica.step_fixed(&mut body).is_empty());
        assert_eq!(replica.route(), RouteStamp(0));
    }

    #[test]
    fn test_rubber_band_when_blocked() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        body.wall_x = Some(-5.0);
        body.position = Vec3::new(-5.0, 0.0, 0.0);
        // claims to be on the far side of the wall
        replica.receive(record(0, MoveState::Walking, -3.9));
        replica.receive(record(0, MoveState::Walking, -3.8));

        replica.set_state(&mut body, MoveState::Airborne);
        let events = replica.step_fixed(&mut body);
        assert!(matches!(events[0], SyncEvent::Warped { .. }));
        assert_eq!(replica.stats().rubber_banded, 1);
        assert_approx_eq!(body.position.x, -5.0);
    }

    #[test]
    fn test_observer_never_validates() {
        let mut replica = MoveReplica::new(false, SyncSettings::default(), MovementSettings::default());
        let mut body = TestMover::at(Vec3::ZERO);
        for _ in 0..12 {
            replica.receive(record(0, MoveState::Walking, 50.0));
        }
        assert!(replica.step_fixed(&mut body).is_empty());
        assert_approx_eq!(body.position.x, 50.0);
    }

    #[test]
    fn test_force_reset_adopts_route() {
        let mut replica = MoveReplica::new(false, SyncSettings::default(), MovementSettings::default());
        let mut body = TestMover::at(Vec3::ZERO);
        replica.receive(record(0, MoveState::Walking, 1.0));
        replica.force_reset(&mut body, Vec3::new(4.0, 0.0, 0.0), RouteStamp(1));

        assert_eq!(replica.pending(), 0);
        assert_eq!(replica.receive(record(0, MoveState::Walking, 1.0)), Receipt::StaleRoute);
        assert_eq!(replica.receive(record(1, MoveState::Walking, 4.1)), Receipt::Accepted);
        assert_approx_eq!(body.position.x, 4.0);
    }

    #[test]
    fn test_landing_reports_last_fall() {
        let mut replica = server_replica();
        let mut body = TestMover::at(Vec3::ZERO);
        replica.set_state(&mut body, MoveState::Airborne);
        replica.velocity = Vec3::new(0.0, -15.0, 0.0);
        replica.last_state = MoveState::Airborne;
        replica.last_fall = Vec3::new(0.0, -15.0, 0.0);
        replica.receive(record(0, MoveState::Idle, 0.0));
        replica.receive(record(0, MoveState::Idle, 0.0));

        let events = replica.step_fixed(&mut body);
        assert_eq!(
            events,
            vec![SyncEvent::Landed {
                last_fall: Vec3::new(0.0, -15.0, 0.0)
            }]
        );
    }
}

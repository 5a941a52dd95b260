//! Client side view of the world: the predicted local character, replayed
//! remote players and monster labels pushed by the server.

use crate::input::{InputManager, KeyState};
use log::{debug, info, warn};
use shared::collider::closest_distance;
use shared::controller::{Cue, LocalController};
use shared::entity::{EntityId, EntityKind, EntitySnapshot, Endurance, MonsterState};
use shared::interact::{arena_doors, Door, Interactable};
use shared::math::Vec3;
use shared::movement::{MovementSettings, Mover};
use shared::physics::{KinematicBody, StaticWorld};
use shared::schedule::{FixedStepper, TickPhases};
use shared::sync::{MoveReplica, SyncSettings};
use shared::{Packet, FIXED_DELTA, INTERACT_DISTANCE, PLAYER_HEIGHT, PLAYER_RADIUS};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Presentation events for whatever draws or plays sounds.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Local(Cue),
    AttackStarted { entity_id: EntityId },
    Damage { entity_id: EntityId, amount: i32, point: Vec3, normal: Vec3 },
    Projectile { owner: EntityId, origin: Vec3, direction: Vec3 },
}

/// How a remote entity is moved on this client.
#[derive(Debug, Clone)]
pub enum RemoteBody {
    /// Replays the records relayed by the server.
    Player { replica: MoveReplica, body: KinematicBody },
    /// Only shows what the server decided.
    Monster {
        state: MonsterState,
        target: Option<EntityId>,
        position: Vec3,
        yaw: f32,
    },
}

#[derive(Debug, Clone)]
pub struct RemoteEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub health: i32,
    pub health_max: i32,
    pub body: RemoteBody,
}

impl RemoteEntity {
    pub fn position(&self) -> Vec3 {
        match &self.body {
            RemoteBody::Player { body, .. } => body.position(),
            RemoteBody::Monster { position, .. } => *position,
        }
    }
}

/// The character this client controls.
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    pub entity_id: EntityId,
    pub controller: LocalController,
    pub body: KinematicBody,
    pub health: i32,
    pub health_max: i32,
    pub endurance: Endurance,
    running: bool,
}

pub struct ClientGameState {
    pub client_id: Option<u32>,
    world: Arc<StaticWorld>,
    movement: MovementSettings,
    sync: SyncSettings,
    local: Option<LocalPlayer>,
    remotes: BTreeMap<EntityId, RemoteEntity>,
    doors: Vec<Door>,
    input: InputManager,
    stepper: FixedStepper,
    endurance_timer: f32,
    outgoing: Vec<Packet>,
    effects: Vec<Effect>,
    disconnect_reason: Option<String>,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::with_world(StaticWorld::arena(), arena_doors())
    }

    pub fn with_world(world: StaticWorld, doors: Vec<Door>) -> Self {
        let sync = SyncSettings::default();
        Self {
            client_id: None,
            world: Arc::new(world),
            movement: MovementSettings::default(),
            sync,
            local: None,
            remotes: BTreeMap::new(),
            doors,
            input: InputManager::new(),
            stepper: FixedStepper::new(sync.fixed_delta),
            endurance_timer: 0.0,
            outgoing: Vec::new(),
            effects: Vec::new(),
            disconnect_reason: None,
        }
    }

    pub fn local(&self) -> Option<&LocalPlayer> {
        self.local.as_ref()
    }

    pub fn local_entity(&self) -> Option<EntityId> {
        self.local.as_ref().map(|local| local.entity_id)
    }

    pub fn remote(&self, id: EntityId) -> Option<&RemoteEntity> {
        self.remotes.get(&id)
    }

    pub fn remotes(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.remotes.values()
    }

    pub fn doors(&self) -> &[Door] {
        &self.doors
    }

    pub fn input_mut(&mut self) -> &mut InputManager {
        &mut self.input
    }

    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Packets produced since the last call, in send order.
    pub fn drain_outgoing(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn sample_keys(&mut self, keys: KeyState) {
        self.input.sample(keys);
    }

    fn body_for(&self, position: Vec3, radius: f32, height: f32) -> KinematicBody {
        KinematicBody::new(Arc::clone(&self.world), position, radius, height, FIXED_DELTA)
    }

    fn spawn_remote(&mut self, snapshot: EntitySnapshot) {
        let body = match snapshot.kind {
            EntityKind::Player => {
                let mut body = self.body_for(snapshot.position, PLAYER_RADIUS, PLAYER_HEIGHT);
                let mut replica = MoveReplica::new(false, self.sync, self.movement);
                replica.force_reset(&mut body, snapshot.position, snapshot.route);
                replica.set_state(&mut body, snapshot.state);
                RemoteBody::Player { replica, body }
            }
            EntityKind::Monster | EntityKind::Structure => RemoteBody::Monster {
                state: snapshot.monster_state.unwrap_or(MonsterState::Idle),
                target: None,
                position: snapshot.position,
                yaw: snapshot.yaw,
            },
        };
        debug!("Spawned {:?} {} ({})", snapshot.kind, snapshot.id, snapshot.name);
        self.remotes.insert(
            snapshot.id,
            RemoteEntity {
                id: snapshot.id,
                kind: snapshot.kind,
                name: snapshot.name,
                health: snapshot.health,
                health_max: snapshot.health_max,
                body,
            },
        );
    }

    /// Applies one packet from the server.
    pub fn apply_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected {
                client_id,
                entity_id,
                position,
                health,
                health_max,
            } => {
                info!("Connected as client {} controlling entity {}", client_id, entity_id);
                self.client_id = Some(client_id);
                self.disconnect_reason = None;
                self.remotes.remove(&entity_id);
                let body = self.body_for(position, PLAYER_RADIUS, PLAYER_HEIGHT);
                self.local = Some(LocalPlayer {
                    entity_id,
                    controller: LocalController::new(self.movement, self.sync.fixed_delta),
                    body,
                    health,
                    health_max,
                    endurance: Endurance::default(),
                    running: false,
                });
            }
            Packet::Spawned { snapshot } => {
                if self.local_entity() == Some(snapshot.id) {
                    if let Some(local) = self.local.as_mut() {
                        local.health = snapshot.health;
                        local.health_max = snapshot.health_max;
                    }
                } else {
                    self.spawn_remote(snapshot);
                }
            }
            Packet::Despawned { entity_id } => {
                if self.remotes.remove(&entity_id).is_none() {
                    debug!("Despawn of unknown entity {}", entity_id);
                }
            }
            Packet::ActorMove { entity_id, record } => {
                if let Some(RemoteEntity {
                    body: RemoteBody::Player { replica, .. },
                    ..
                }) = self.remotes.get_mut(&entity_id)
                {
                    replica.receive(record);
                }
            }
            Packet::ForceReset {
                entity_id,
                position,
                route,
            } => {
                if let Some(local) = self.local.as_mut().filter(|local| local.entity_id == entity_id) {
                    // repeats of a reset we already adopted would snap us back
                    if local.controller.route() == route {
                        debug!("Ignoring repeated reset for route {}", route);
                    } else {
                        debug!("Server reset us to {:?} (route {})", position, route);
                        local.controller.force_reset(&mut local.body, position, route);
                    }
                } else if let Some(RemoteEntity {
                    body: RemoteBody::Player { replica, body },
                    ..
                }) = self.remotes.get_mut(&entity_id)
                {
                    replica.force_reset(body, position, route);
                }
            }
            Packet::MonsterUpdate {
                entity_id,
                state,
                target,
                position,
                yaw,
            } => {
                if let Some(remote) = self.remotes.get_mut(&entity_id) {
                    remote.body = RemoteBody::Monster {
                        state,
                        target,
                        position,
                        yaw,
                    };
                }
            }
            Packet::AttackStarted { entity_id } => {
                self.effects.push(Effect::AttackStarted { entity_id });
            }
            Packet::DamageEffect {
                entity_id,
                amount,
                hit_point,
                hit_normal,
            } => {
                self.effects.push(Effect::Damage {
                    entity_id,
                    amount,
                    point: hit_point,
                    normal: hit_normal,
                });
            }
            Packet::HealthChanged {
                entity_id,
                current,
                max,
            } => {
                if let Some(local) = self.local.as_mut().filter(|local| local.entity_id == entity_id) {
                    local.health = current;
                    local.health_max = max;
                } else if let Some(remote) = self.remotes.get_mut(&entity_id) {
                    remote.health = current;
                    remote.health_max = max;
                }
            }
            Packet::ProjectileSpawned {
                owner,
                origin,
                direction,
            } => {
                self.effects.push(Effect::Projectile {
                    owner,
                    origin,
                    direction,
                });
            }
            Packet::DoorChanged { door_id, open } => {
                match self.doors.iter_mut().find(|door| door.id == door_id) {
                    Some(door) => door.open = open,
                    None => warn!("Unknown door {}", door_id),
                }
            }
            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.disconnect_reason = Some(reason);
                self.client_id = None;
                self.local = None;
                self.remotes.clear();
            }
            other => {
                warn!("Unexpected packet from server: {:?}", other);
            }
        }
    }

    /// Closest door in reach with its prompt.
    pub fn interaction_prompt(&self) -> Option<(u32, String)> {
        let bounds = self.local.as_ref()?.body.bounds();
        self.doors
            .iter()
            .map(|door| (closest_distance(&bounds, &door.bounds), door))
            .filter(|(distance, _)| *distance <= INTERACT_DISTANCE)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, door)| (door.id, door.interaction_text()))
    }

    pub fn interact(&mut self, door_id: u32) {
        let Some(actor) = self.local_entity() else {
            return;
        };
        if let Some(door) = self.doors.iter_mut().find(|door| door.id == door_id) {
            door.on_interact_client(actor);
            self.outgoing.push(Packet::Interact { target: door_id });
        }
    }

    pub fn use_weapon(&mut self, slot: u8, look_at: Vec3) {
        if self.local.as_ref().map_or(false, |local| local.health > 0) {
            self.outgoing.push(Packet::UseWeapon { slot, look_at });
        }
    }

    pub fn request_respawn(&mut self) {
        if self.local.as_ref().map_or(false, |local| local.health <= 0) {
            self.outgoing.push(Packet::Respawn);
        }
    }

    /// Runs one rendered frame. Returns the fixed ticks run.
    pub fn step_frame(&mut self, frame_dt: f32) -> u32 {
        let mut stepper = self.stepper.clone();
        let steps = stepper.advance(self, frame_dt);
        self.stepper = stepper;
        steps
    }

    fn step_local(&mut self) {
        let intent = self.input.take_intent();
        let Some(local) = self.local.as_mut() else {
            return;
        };
        let step = local.controller.step_fixed(
            &intent,
            &mut local.body,
            self.world.as_ref(),
            local.health,
            local.endurance.current,
        );
        local.running = step.running;
        self.effects.extend(step.cues.into_iter().map(Effect::Local));
        self.outgoing.push(Packet::FixedMove { record: step.record });
    }

    fn step_remotes(&mut self) {
        for remote in self.remotes.values_mut() {
            if let RemoteBody::Player { replica, body } = &mut remote.body {
                // observers only replay; the server reports landings and damage
                replica.step_fixed(body);
            }
        }
    }
}

impl TickPhases for ClientGameState {
    fn step_variable_rate(&mut self, dt: f32) {
        self.endurance_timer += dt;
        while self.endurance_timer >= 1.0 {
            self.endurance_timer -= 1.0;
            if let Some(local) = self.local.as_mut() {
                local.endurance.tick(local.running);
            }
        }
    }

    fn step_fixed_rate(&mut self, _fixed_dt: f32) {
        self.step_local();
        self.step_remotes();
    }

    fn step_post_physics(&mut self, _dt: f32) {}
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::movement::{MoveRecord, MoveState, RouteStamp};

    fn connected() -> ClientGameState {
        let mut game = ClientGameState::with_world(StaticWorld::flat(), arena_doors());
        game.apply_packet(Packet::Connected {
            client_id: 1,
            entity_id: 10,
            position: Vec3::ZERO,
            health: 100,
            health_max: 100,
        });
        game.apply_packet(Packet::Spawned {
            snapshot: snapshot(10, EntityKind::Player, Vec3::ZERO),
        });
        game
    }

    fn snapshot(id: EntityId, kind: EntityKind, position: Vec3) -> EntitySnapshot {
        EntitySnapshot {
            id,
            kind,
            name: format!("entity{}", id),
            position,
            yaw: 0.0,
            state: MoveState::Idle,
            monster_state: None,
            route: RouteStamp::default(),
            health: 100,
            health_max: 100,
        }
    }

    #[test]
    fn test_local_player_streams_moves() {
        let mut game = connected();
        assert_eq!(game.local_entity(), Some(10));
        assert_eq!(game.local().map(|l| l.health), Some(100));

        game.sample_keys(KeyState {
            forward: true,
            ..KeyState::default()
        });
        let steps = game.step_frame(0.04);
        assert_eq!(steps, 2);

        let sent = game.drain_outgoing();
        assert_eq!(sent.len(), 2);
        match &sent[1] {
            Packet::FixedMove { record } => {
                assert_eq!(record.state, MoveState::Walking);
                assert!(record.position.z > 0.0);
            }
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_alive_before_own_snapshot_arrives() {
        let mut game = ClientGameState::with_world(StaticWorld::flat(), arena_doors());
        game.apply_packet(Packet::Connected {
            client_id: 1,
            entity_id: 10,
            position: Vec3::ZERO,
            health: 100,
            health_max: 100,
        });
        game.step_frame(0.02);

        let local = game.local().unwrap();
        assert_eq!(local.health, 100);
        assert_ne!(local.controller.state(), MoveState::Dead);
        assert!(!game
            .drain_effects()
            .iter()
            .any(|effect| matches!(effect, Effect::Local(Cue::Died))));
        match game.drain_outgoing().first() {
            Some(Packet::FixedMove { record }) => assert_ne!(record.state, MoveState::Dead),
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_force_reset_moves_local_player() {
        let mut game = connected();
        game.apply_packet(Packet::ForceReset {
            entity_id: 10,
            position: Vec3::new(4.0, 0.0, 4.0),
            route: RouteStamp(2),
        });
        let local = game.local().unwrap();
        assert_eq!(local.controller.route(), RouteStamp(2));
        assert_approx_eq!(local.body.position().x, 4.0);

        game.step_frame(0.02);
        match game.drain_outgoing().first() {
            Some(Packet::FixedMove { record }) => assert_eq!(record.route, RouteStamp(2)),
            other => panic!("Unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_repeated_reset_is_ignored() {
        let mut game = connected();
        game.apply_packet(Packet::ForceReset {
            entity_id: 10,
            position: Vec3::new(4.0, 0.0, 4.0),
            route: RouteStamp(1),
        });
        game.sample_keys(KeyState {
            forward: true,
            ..KeyState::default()
        });
        game.step_frame(0.02);
        let moved = game.local().map(|l| l.body.position()).unwrap();
        assert!(moved.z > 4.0);

        game.apply_packet(Packet::ForceReset {
            entity_id: 10,
            position: Vec3::new(4.0, 0.0, 4.0),
            route: RouteStamp(1),
        });
        assert_approx_eq!(game.local().map(|l| l.body.position().z).unwrap(), moved.z);
    }

    #[test]
    fn test_remote_player_replays_records() {
        let mut game = connected();
        game.apply_packet(Packet::Spawned {
            snapshot: snapshot(11, EntityKind::Player, Vec3::ZERO),
        });
        for step in 1..=3 {
            game.apply_packet(Packet::ActorMove {
                entity_id: 11,
                record: MoveRecord::new(
                    RouteStamp(0),
                    MoveState::Walking,
                    Vec3::new(0.0, 0.0, 0.1 * step as f32),
                    0.0,
                ),
            });
        }
        game.step_frame(0.02);
        game.step_frame(0.02);

        let position = game.remote(11).map(|r| r.position()).unwrap();
        assert_approx_eq!(position.z, 0.2, 1e-4);
    }

    #[test]
    fn test_stale_relayed_records_dropped_after_reset() {
        let mut game = connected();
        game.apply_packet(Packet::Spawned {
            snapshot: snapshot(11, EntityKind::Player, Vec3::ZERO),
        });
        game.apply_packet(Packet::ForceReset {
            entity_id: 11,
            position: Vec3::new(1.0, 0.0, 0.0),
            route: RouteStamp(1),
        });
        for _ in 0..3 {
            game.apply_packet(Packet::ActorMove {
                entity_id: 11,
                record: MoveRecord::new(RouteStamp(0), MoveState::Walking, Vec3::new(5.0, 0.0, 5.0), 0.0),
            });
        }
        game.step_frame(0.02);

        let position = game.remote(11).map(|r| r.position()).unwrap();
        assert_approx_eq!(position.x, 1.0);
        assert_approx_eq!(position.z, 0.0);
    }

    #[test]
    fn test_monster_updates_and_health() {
        let mut game = connected();
        game.apply_packet(Packet::Spawned {
            snapshot: snapshot(20, EntityKind::Monster, Vec3::new(5.0, 0.0, 5.0)),
        });
        game.apply_packet(Packet::MonsterUpdate {
            entity_id: 20,
            state: MonsterState::Attacking,
            target: Some(10),
            position: Vec3::new(4.0, 0.0, 4.0),
            yaw: 90.0,
        });
        game.apply_packet(Packet::HealthChanged {
            entity_id: 20,
            current: 30,
            max: 50,
        });
        game.apply_packet(Packet::HealthChanged {
            entity_id: 10,
            current: 70,
            max: 100,
        });

        let monster = game.remote(20).unwrap();
        assert_eq!(monster.health, 30);
        assert!(matches!(
            monster.body,
            RemoteBody::Monster { state: MonsterState::Attacking, target: Some(10), .. }
        ));
        assert_eq!(game.local().map(|l| l.health), Some(70));

        game.apply_packet(Packet::Despawned { entity_id: 20 });
        assert!(game.remote(20).is_none());
    }

    #[test]
    fn test_door_prompt_and_interaction() {
        let mut game = connected();
        assert!(game.interaction_prompt().is_none());

        game.apply_packet(Packet::ForceReset {
            entity_id: 10,
            position: Vec3::new(-6.0, 0.0, 8.5),
            route: RouteStamp(1),
        });
        assert_eq!(game.interaction_prompt(), Some((1, "Open door".to_string())));

        game.interact(1);
        assert_eq!(game.drain_outgoing(), vec![Packet::Interact { target: 1 }]);

        game.apply_packet(Packet::DoorChanged { door_id: 1, open: true });
        assert_eq!(game.interaction_prompt(), Some((1, "Close door".to_string())));
    }

    #[test]
    fn test_dead_player_requests_respawn_only_when_dead() {
        let mut game = connected();
        game.request_respawn();
        game.use_weapon(0, Vec3::new(0.0, 1.0, 5.0));
        assert_eq!(
            game.drain_outgoing(),
            vec![Packet::UseWeapon {
                slot: 0,
                look_at: Vec3::new(0.0, 1.0, 5.0)
            }]
        );

        game.apply_packet(Packet::HealthChanged {
            entity_id: 10,
            current: 0,
            max: 100,
        });
        game.use_weapon(0, Vec3::ZERO);
        game.request_respawn();
        assert_eq!(game.drain_outgoing(), vec![Packet::Respawn]);
    }

    #[test]
    fn test_disconnect_clears_world() {
        let mut game = connected();
        game.apply_packet(Packet::Disconnected {
            reason: "Server full".to_string(),
        });
        assert!(game.local().is_none());
        assert_eq!(game.disconnect_reason(), Some("Server full"));
    }
}

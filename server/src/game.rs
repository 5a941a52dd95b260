//! Authoritative simulation of the shared world.
//!
//! [`GameState`] owns every entity and steps them with a [`FixedStepper`]:
//! player replicas replay and validate the moves their clients sent,
//! projectiles fly, monsters think and act. Nothing in here touches the
//! network directly. Packets to send are queued as [`Outgoing`] messages and
//! drained by the server loop after every frame or handled packet.

use crate::aggro::AggroArea;
use crate::monster::{AiWorld, Monster, MonsterAction, MonsterSettings, TargetInfo};
use crate::session::OnlineRegistry;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::collider::closest_distance;
use shared::combat::{
    hit_multiplier, resolve_damage, use_weapon, CombatSettings, EntityHit, HitQuery, Projectile, UseOutcome,
    Weapon, WeaponSlot,
};
use shared::entity::{Entity, EntityId, EntityKind, EntitySnapshot, MonsterState};
use shared::interact::{arena_doors, Door, Interactable};
use shared::math::{forward, Vec3};
use shared::movement::{fall_damage, MoveRecord, MoveState, MovementSettings, Mover, RouteStamp};
use shared::physics::{KinematicBody, StaticWorld};
use shared::schedule::{FixedStepper, TickPhases};
use shared::sync::{MoveReplica, Receipt, ReplicaStats, SyncEvent, SyncSettings};
use shared::{Packet, INTERACT_DISTANCE, MONSTER_HEIGHT, MONSTER_RADIUS, PLAYER_HEIGHT, PLAYER_RADIUS};
use std::collections::BTreeMap;
use std::sync::Arc;

const PLAYER_BASE_HEALTH: i32 = 100;
const MONSTER_BASE_HEALTH: i32 = 50;
const MONSTER_BASE_DAMAGE: i32 = 10;

const PLAYER_SPAWNS: [(f32, f32, f32); 4] = [
    (0.0, 0.0, -5.0),
    (3.0, 0.0, -5.0),
    (-3.0, 0.0, -5.0),
    (0.0, 0.0, -8.0),
];

const MONSTER_SPAWNS: [(f32, f32, f32); 8] = [
    (20.0, 0.0, -10.0),
    (-10.0, 0.0, 20.0),
    (25.0, 0.0, 25.0),
    (-30.0, 0.0, 10.0),
    (10.0, 0.0, -30.0),
    (-25.0, 0.0, 25.0),
    (30.0, 0.0, 0.0),
    (0.0, 0.0, 30.0),
];

/// A packet queued by the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    To { client_id: u32, packet: Packet },
    Broadcast { packet: Packet, exclude: Option<u32> },
}

/// Tunables for a simulation instance.
#[derive(Debug, Clone, Copy)]
pub struct GameConfig {
    pub sync: SyncSettings,
    pub movement: MovementSettings,
    pub combat: CombatSettings,
    pub monster: MonsterSettings,
    pub monster_count: usize,
    pub seed: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            sync: SyncSettings::default(),
            movement: MovementSettings::default(),
            combat: CombatSettings::default(),
            monster: MonsterSettings::default(),
            monster_count: 4,
            seed: 0,
        }
    }
}

/// Server side state of a connected player's character.
#[derive(Debug, Clone)]
pub struct PlayerActor {
    pub client_id: u32,
    pub replica: MoveReplica,
    pub body: KinematicBody,
    pub weapons: Vec<WeaponSlot>,
    /// Tick of the last reset repeated to a client still on an old route.
    reset_reply_tick: Option<u64>,
}

/// Committed entity state as seen by AI and weapon queries.
struct WorldView<'a> {
    entities: &'a BTreeMap<EntityId, Entity>,
    world: &'a StaticWorld,
}

impl WorldView<'_> {
    /// Nearest entity hit, unless static geometry is closer.
    fn nearest_hit<F>(&self, origin: Vec3, direction: Vec3, ignore: EntityId, cast: F) -> Option<EntityHit>
    where
        F: Fn(&Entity) -> Option<EntityHit>,
    {
        let best = self
            .entities
            .values()
            .filter(|entity| entity.id != ignore)
            .filter_map(|entity| cast(entity))
            .min_by(|a, b| a.hit.distance.total_cmp(&b.hit.distance))?;

        match self.world.raycast(origin, direction, best.hit.distance) {
            Some(wall) if wall.distance < best.hit.distance => None,
            _ => Some(best),
        }
    }
}

impl AiWorld for WorldView<'_> {
    fn target(&self, id: EntityId) -> Option<TargetInfo> {
        self.entities.get(&id).map(|entity| TargetInfo {
            kind: entity.kind,
            health: entity.health(),
            position: entity.position(),
            bounds: entity.bounds,
        })
    }

    fn is_blocked(&self, from: Vec3, to: Vec3) -> bool {
        self.world.is_blocked(from, to)
    }
}

impl HitQuery for WorldView<'_> {
    fn sphere_cast(
        &self,
        origin: Vec3,
        radius: f32,
        direction: Vec3,
        max_distance: f32,
        ignore: EntityId,
    ) -> Option<EntityHit> {
        self.nearest_hit(origin, direction, ignore, |entity| {
            let mut hit = entity.bounds.expanded(radius).ray_cast(origin, direction, max_distance)?;
            hit.point = entity.bounds.closest_point(hit.point);
            Some(EntityHit {
                entity: entity.id,
                hit,
            })
        })
    }

    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32, ignore: EntityId) -> Option<EntityHit> {
        self.nearest_hit(origin, direction, ignore, |entity| {
            entity
                .bounds
                .ray_cast(origin, direction, max_distance)
                .map(|hit| EntityHit {
                    entity: entity.id,
                    hit,
                })
        })
    }
}

/// Last monster state sent to clients.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PublishedMonster {
    state: MonsterState,
    target: Option<EntityId>,
    position: Vec3,
    yaw: f32,
}

pub struct GameState {
    pub tick: u64,
    config: GameConfig,
    world: Arc<StaticWorld>,
    entities: BTreeMap<EntityId, Entity>,
    players: BTreeMap<EntityId, PlayerActor>,
    clients: BTreeMap<u32, EntityId>,
    monsters: BTreeMap<EntityId, Monster>,
    published: BTreeMap<EntityId, PublishedMonster>,
    aggro: AggroArea,
    projectiles: Vec<Projectile>,
    doors: Vec<Door>,
    registry: OnlineRegistry,
    outbox: Vec<Outgoing>,
    stepper: FixedStepper,
    time: f64,
    recovery_timer: f32,
    rng: StdRng,
    next_entity_id: EntityId,
}

impl GameState {
    /// The arena level with its doors and `config.monster_count` monsters.
    pub fn new(config: GameConfig) -> Self {
        let mut game = Self::with_world(StaticWorld::arena(), config);
        for door in arena_doors() {
            game.add_door(door);
        }
        game
    }

    pub fn with_world(world: StaticWorld, config: GameConfig) -> Self {
        let mut game = Self {
            tick: 0,
            config,
            world: Arc::new(world),
            entities: BTreeMap::new(),
            players: BTreeMap::new(),
            clients: BTreeMap::new(),
            monsters: BTreeMap::new(),
            published: BTreeMap::new(),
            aggro: AggroArea::new(config.monster.aggro_radius),
            projectiles: Vec::new(),
            doors: Vec::new(),
            registry: OnlineRegistry::new(),
            outbox: Vec::new(),
            stepper: FixedStepper::new(config.sync.fixed_delta),
            time: 0.0,
            recovery_timer: 0.0,
            rng: StdRng::seed_from_u64(config.seed),
            next_entity_id: 1,
        };
        for index in 0..config.monster_count {
            let (x, y, z) = MONSTER_SPAWNS[index % MONSTER_SPAWNS.len()];
            game.spawn_monster(Vec3::new(x, y, z), true);
        }
        game
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    fn fixed_delta(&self) -> f32 {
        self.stepper.fixed_delta()
    }

    /// Simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn player(&self, id: EntityId) -> Option<&PlayerActor> {
        self.players.get(&id)
    }

    pub fn monster(&self, id: EntityId) -> Option<&Monster> {
        self.monsters.get(&id)
    }

    pub fn entity_of_client(&self, client_id: u32) -> Option<EntityId> {
        self.clients.get(&client_id).copied()
    }

    pub fn doors(&self) -> &[Door] {
        &self.doors
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn registry(&self) -> &OnlineRegistry {
        &self.registry
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn monster_count(&self) -> usize {
        self.monsters.len()
    }

    /// Takes every packet queued since the last call.
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    fn send_to(&mut self, client_id: u32, packet: Packet) {
        self.outbox.push(Outgoing::To { client_id, packet });
    }

    fn broadcast(&mut self, packet: Packet, exclude: Option<u32>) {
        self.outbox.push(Outgoing::Broadcast { packet, exclude });
    }

    fn view(&self) -> WorldView<'_> {
        WorldView {
            entities: &self.entities,
            world: &self.world,
        }
    }

    pub fn add_door(&mut self, door: Door) {
        self.doors.push(door);
    }

    pub fn spawn_monster(&mut self, position: Vec3, alive: bool) -> EntityId {
        let id = self.allocate_id();
        let body = KinematicBody::new(
            Arc::clone(&self.world),
            position,
            MONSTER_RADIUS,
            MONSTER_HEIGHT,
            self.fixed_delta(),
        );
        let mut entity = Entity::new(id, EntityKind::Monster, "Zombie", MONSTER_BASE_HEALTH, body.bounds());
        entity.combat.base_damage = MONSTER_BASE_DAMAGE;
        if !alive {
            entity.set_health(0);
        }

        self.entities.insert(id, entity);
        self.monsters
            .insert(id, Monster::new(id, self.config.monster, body, alive));
        if let Some(snapshot) = self.snapshot(id) {
            self.broadcast(Packet::Spawned { snapshot }, None);
        }
        debug!("Spawned monster {} at {:?}", id, position);
        id
    }

    /// Everything a client needs to show entity `id`.
    pub fn snapshot(&self, id: EntityId) -> Option<EntitySnapshot> {
        let entity = self.entities.get(&id)?;
        let mut snapshot = EntitySnapshot {
            id,
            kind: entity.kind,
            name: entity.name.clone(),
            position: entity.position(),
            yaw: 0.0,
            state: MoveState::Idle,
            monster_state: None,
            route: RouteStamp::default(),
            health: entity.health(),
            health_max: entity.health_max(),
        };
        if let Some(player) = self.players.get(&id) {
            snapshot.yaw = player.replica.yaw();
            snapshot.state = player.replica.state();
            snapshot.route = player.replica.route();
        }
        if let Some(monster) = self.monsters.get(&id) {
            snapshot.yaw = monster.yaw();
            snapshot.monster_state = Some(monster.state());
        }
        Some(snapshot)
    }

    fn spawn_point(&self, id: EntityId) -> Vec3 {
        let (x, y, z) = PLAYER_SPAWNS[id as usize % PLAYER_SPAWNS.len()];
        Vec3::new(x, y, z)
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.registry.is_online(name)
    }

    /// Spawns a player for `client_id`. Returns `None` when the name is
    /// already online.
    pub fn add_player(&mut self, client_id: u32, name: &str) -> Option<EntityId> {
        if self.registry.is_online(name) {
            warn!("Rejecting client {}: {} is already online", client_id, name);
            return None;
        }

        let id = self.allocate_id();
        let position = self.spawn_point(id);
        let body = KinematicBody::new(
            Arc::clone(&self.world),
            position,
            PLAYER_RADIUS,
            PLAYER_HEIGHT,
            self.fixed_delta(),
        );
        let mut entity = Entity::new(id, EntityKind::Player, name, PLAYER_BASE_HEALTH, body.bounds());
        entity.base_health_recovery = 1;
        let (health, health_max) = (entity.health(), entity.health_max());

        self.entities.insert(id, entity);
        self.players.insert(
            id,
            PlayerActor {
                client_id,
                replica: MoveReplica::new(true, self.config.sync, self.config.movement),
                body,
                weapons: vec![
                    WeaponSlot::new(Weapon::axe()),
                    WeaponSlot::new(Weapon::rifle()),
                    WeaponSlot::new(Weapon::bow()),
                ],
                reset_reply_tick: None,
            },
        );
        self.clients.insert(client_id, id);
        self.registry.register(name, id);

        self.send_to(
            client_id,
            Packet::Connected {
                client_id,
                entity_id: id,
                position,
                health,
                health_max,
            },
        );
        let known: Vec<EntityId> = self.entities.keys().copied().collect();
        for other in known {
            if let Some(snapshot) = self.snapshot(other) {
                self.send_to(client_id, Packet::Spawned { snapshot });
            }
        }
        let doors: Vec<(u32, bool)> = self.doors.iter().map(|door| (door.id, door.open)).collect();
        for (door_id, open) in doors {
            self.send_to(client_id, Packet::DoorChanged { door_id, open });
        }
        if let Some(snapshot) = self.snapshot(id) {
            self.broadcast(Packet::Spawned { snapshot }, Some(client_id));
        }

        info!("Added player {} ({}) at {:?}", id, name, position);
        Some(id)
    }

    /// Despawns the player of `client_id`.
    pub fn remove_client(&mut self, client_id: u32) -> Option<EntityId> {
        let id = self.clients.remove(&client_id)?;
        self.players.remove(&id);
        if let Some(entity) = self.entities.remove(&id) {
            self.registry.unregister(&entity.name, id);
        }
        self.broadcast(Packet::Despawned { entity_id: id }, None);
        info!("Removed player {} (client {})", id, client_id);
        Some(id)
    }

    /// Buffers a move from the owning client and relays it to everyone else.
    ///
    /// A record on an old route means the client missed the last reset, so
    /// the reset is repeated to that client, at most once per tick.
    pub fn receive_move(&mut self, client_id: u32, record: MoveRecord) -> Option<Receipt> {
        let id = *self.clients.get(&client_id)?;
        let tick = self.tick;
        let player = self.players.get_mut(&id)?;
        let receipt = player.replica.receive(record);
        let mut repeat_reset = None;
        match receipt {
            Receipt::StaleRoute => {
                debug!(
                    "Dropped move of {} with route {} (current {})",
                    id,
                    record.route,
                    player.replica.route()
                );
                if player.reset_reply_tick != Some(tick) {
                    player.reset_reply_tick = Some(tick);
                    repeat_reset = Some(Packet::ForceReset {
                        entity_id: id,
                        position: player.body.position(),
                        route: player.replica.route(),
                    });
                }
            }
            Receipt::BufferFull => debug!("Move buffer of {} is full", id),
            Receipt::Accepted => {}
        }
        if let Some(packet) = repeat_reset {
            self.send_to(client_id, packet);
        }
        if receipt.should_relay() {
            self.broadcast(Packet::ActorMove { entity_id: id, record }, Some(client_id));
        }
        Some(receipt)
    }

    /// Uses the weapon in `slot` for the player of `client_id`.
    pub fn use_weapon(&mut self, client_id: u32, slot: u8, look_at: Vec3) -> Option<UseOutcome> {
        let id = *self.clients.get(&client_id)?;
        let now = self.time;
        let outcome = {
            let user = self.entities.get(&id)?;
            if !user.is_alive() {
                return None;
            }
            let view = WorldView {
                entities: &self.entities,
                world: &self.world,
            };
            let player = self.players.get_mut(&id)?;
            let facing = forward(player.replica.yaw());
            let weapon = player.weapons.get_mut(slot as usize)?;
            use_weapon(weapon, user, facing, look_at, now, &view)
        };

        match outcome {
            UseOutcome::Rejected(reason) => {
                debug!("Player {} cannot use slot {}: {:?}", id, slot, reason);
            }
            UseOutcome::Miss => {
                debug!("Player {} missed with slot {}", id, slot);
            }
            UseOutcome::Hit {
                victim,
                amount,
                point,
                normal,
            } => {
                self.deal_damage(id, victim, amount, point, normal);
            }
            UseOutcome::Projectile {
                origin,
                direction,
                speed,
                damage,
            } => {
                self.projectiles
                    .push(Projectile::new(id, origin, direction, speed, damage));
                self.broadcast(
                    Packet::ProjectileSpawned {
                        owner: id,
                        origin,
                        direction,
                    },
                    None,
                );
            }
        }
        Some(outcome)
    }

    /// Applies a hit from `attacker` to `victim` at `point` and notifies
    /// everyone. Returns the damage dealt.
    pub fn deal_damage(
        &mut self,
        attacker: EntityId,
        victim: EntityId,
        amount: i32,
        point: Vec3,
        normal: Vec3,
    ) -> Option<i32> {
        let now = self.time;
        let combat = self.config.combat;
        let (dealt, current, max) = {
            let target = self.entities.get_mut(&victim)?;
            let multiplier = hit_multiplier(&target.bounds, point, &combat);
            let dealt = resolve_damage(target, amount, multiplier, now)?;
            (dealt, target.health(), target.health_max())
        };
        if let Some(source) = self.entities.get_mut(&attacker) {
            source.combat.last_combat_time = now;
        }

        self.broadcast(
            Packet::DamageEffect {
                entity_id: victim,
                amount: dealt,
                hit_point: point,
                hit_normal: normal,
            },
            None,
        );
        self.broadcast(
            Packet::HealthChanged {
                entity_id: victim,
                current,
                max,
            },
            None,
        );
        debug!("{} hit {} for {} ({} left)", attacker, victim, dealt, current);

        let view = WorldView {
            entities: &self.entities,
            world: &self.world,
        };
        if let Some(monster) = self.monsters.get_mut(&victim) {
            monster.on_aggro(attacker, &view);
            if current == 0 {
                monster.on_death(now);
            }
        } else if current == 0 {
            info!("Player {} was killed by {}", victim, attacker);
        }
        Some(dealt)
    }

    /// Toggles a door within reach of the player of `client_id`.
    pub fn interact(&mut self, client_id: u32, door_id: u32) -> bool {
        let Some(id) = self.clients.get(&client_id).copied() else {
            return false;
        };
        let Some(bounds) = self.entities.get(&id).filter(|e| e.is_alive()).map(|e| e.bounds) else {
            return false;
        };
        let Some(door) = self.doors.iter_mut().find(|door| door.id == door_id) else {
            warn!("Player {} tried to use unknown door {}", id, door_id);
            return false;
        };
        if closest_distance(&bounds, &door.bounds) > INTERACT_DISTANCE {
            debug!("Door {} is out of reach for player {}", door_id, id);
            return false;
        }

        door.on_interact_server(id);
        let open = door.open;
        self.broadcast(Packet::DoorChanged { door_id, open }, None);
        true
    }

    /// Revives a dead player at its spawn point.
    pub fn respawn_player(&mut self, client_id: u32) -> bool {
        let Some(id) = self.clients.get(&client_id).copied() else {
            return false;
        };
        let spawn = self.spawn_point(id);
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if entity.is_alive() {
            return false;
        }
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };

        entity.set_health(entity.health_max());
        player.replica.set_state(&mut player.body, MoveState::Idle);
        let event = player.replica.warp(&mut player.body, spawn);
        entity.bounds = player.body.bounds();
        let (current, max) = (entity.health(), entity.health_max());

        if let SyncEvent::Warped { position, route } = event {
            self.broadcast(
                Packet::ForceReset {
                    entity_id: id,
                    position,
                    route,
                },
                None,
            );
        }
        self.broadcast(
            Packet::HealthChanged {
                entity_id: id,
                current,
                max,
            },
            None,
        );
        info!("Player {} respawned at {:?}", id, spawn);
        true
    }

    /// Runs one frame of `frame_dt` seconds. Returns the fixed ticks run.
    pub fn step_frame(&mut self, frame_dt: f32) -> u32 {
        let mut stepper = self.stepper.clone();
        let steps = stepper.advance(self, frame_dt);
        self.stepper = stepper;
        steps
    }

    fn apply_fall_damage(&mut self, id: EntityId, damage: i32) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        if !entity.is_alive() {
            return;
        }
        entity.set_health(entity.health() - damage);
        let (current, max) = (entity.health(), entity.health_max());
        info!("Player {} took {} fall damage", id, damage);
        self.broadcast(
            Packet::HealthChanged {
                entity_id: id,
                current,
                max,
            },
            None,
        );
    }

    fn step_players(&mut self) {
        let ids: Vec<EntityId> = self.players.keys().copied().collect();
        for id in ids {
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            let events = player.replica.step_fixed(&mut player.body);
            let bounds = player.body.bounds();
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.bounds = bounds;
            }

            for event in events {
                match event {
                    SyncEvent::Warped { position, route } => {
                        self.broadcast(
                            Packet::ForceReset {
                                entity_id: id,
                                position,
                                route,
                            },
                            None,
                        );
                    }
                    SyncEvent::Landed { last_fall } => {
                        if let Some(damage) = fall_damage(last_fall, &self.config.movement) {
                            self.apply_fall_damage(id, damage);
                        }
                    }
                }
            }
        }
    }

    fn step_projectiles(&mut self, dt: f32) {
        let mut hits = Vec::new();
        let view = WorldView {
            entities: &self.entities,
            world: &self.world,
        };
        self.projectiles.retain_mut(|projectile| {
            let (from, to) = projectile.next_segment(dt);
            let length = (to - from).magnitude();
            if let Some(hit) = view.raycast(from, projectile.direction, length, projectile.owner) {
                hits.push((projectile.owner, projectile.damage, hit));
                return false;
            }
            if view.world.raycast(from, projectile.direction, length).is_some() {
                return false;
            }
            projectile.advance(dt);
            !projectile.is_expired()
        });

        for (owner, damage, hit) in hits {
            self.deal_damage(owner, hit.entity, damage, hit.hit.point, hit.hit.normal);
        }
    }

    fn respawn_monster(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let Some(monster) = self.monsters.get_mut(&id) else {
            return;
        };
        entity.set_health(entity.health_max());
        monster.on_respawn();
        entity.bounds = monster.bounds();
        let (current, max) = (entity.health(), entity.health_max());
        self.broadcast(
            Packet::HealthChanged {
                entity_id: id,
                current,
                max,
            },
            None,
        );
    }

    fn monster_strike(&mut self, monster_id: EntityId, target: EntityId) {
        let amount = match self.entities.get(&monster_id) {
            Some(entity) => entity.damage(),
            None => return,
        };
        let yaw = match self.monsters.get(&monster_id) {
            Some(monster) => monster.yaw(),
            None => return,
        };
        let Some(point) = self.entities.get(&target).map(|entity| entity.position()) else {
            return;
        };

        self.deal_damage(monster_id, target, amount, point, -forward(yaw));
        let alive = self.entities.get(&target).map_or(false, |entity| entity.is_alive());
        if let Some(monster) = self.monsters.get_mut(&monster_id) {
            monster.on_strike_resolved(alive);
        }
    }

    fn step_monsters(&mut self, dt: f32) {
        let now = self.time;
        let delay = self.config.monster.respawn_delay;
        let ids: Vec<EntityId> = self.monsters.keys().copied().collect();

        for id in ids {
            let Some(monster) = self.monsters.get_mut(&id) else {
                continue;
            };
            if monster.state() == MonsterState::Dead {
                match monster.died_at() {
                    Some(died_at) if now - died_at >= delay => self.respawn_monster(id),
                    Some(_) => {}
                    None => monster.on_death(now),
                }
                continue;
            }

            let view = WorldView {
                entities: &self.entities,
                world: &self.world,
            };
            let center = monster.bounds().center;
            let candidates = self.aggro.candidates(
                id,
                center,
                self.entities.iter().map(|(other, entity)| (*other, &entity.bounds)),
            );
            for candidate in candidates {
                monster.on_aggro(candidate, &view);
            }
            let actions = monster.update(now, dt, &view, &mut self.rng);
            let bounds = monster.bounds();
            if let Some(entity) = self.entities.get_mut(&id) {
                entity.bounds = bounds;
            }

            for action in actions {
                match action {
                    MonsterAction::AttackStarted => {
                        self.broadcast(Packet::AttackStarted { entity_id: id }, None);
                    }
                    MonsterAction::Strike { target } => self.monster_strike(id, target),
                }
            }
        }
    }

    /// Sends monster state to clients when it changed since last time.
    fn publish_monsters(&mut self) {
        let mut changed = Vec::new();
        for (id, monster) in &self.monsters {
            let current = PublishedMonster {
                state: monster.state(),
                target: monster.target(),
                position: monster.position(),
                yaw: monster.yaw(),
            };
            let dirty = match self.published.get(id) {
                Some(last) => {
                    last.state != current.state
                        || last.target != current.target
                        || last.position.distance(&current.position) > 0.01
                        || (last.yaw - current.yaw).abs() > 0.5
                }
                None => true,
            };
            if dirty {
                changed.push((*id, current));
            }
        }

        for (id, current) in changed {
            self.published.insert(id, current);
            self.broadcast(
                Packet::MonsterUpdate {
                    entity_id: id,
                    state: current.state,
                    target: current.target,
                    position: current.position,
                    yaw: current.yaw,
                },
                None,
            );
        }
    }

    /// Once per second: health recovery and endurance.
    fn recover(&mut self) {
        let mut changed = Vec::new();
        for (id, entity) in self.entities.iter_mut() {
            let before = entity.health();
            entity.recover_health();
            if entity.health() != before {
                changed.push((*id, entity.health(), entity.health_max()));
            }
            if let Some(player) = self.players.get(id) {
                entity.endurance.tick(player.replica.state() == MoveState::Running);
            }
        }
        for (entity_id, current, max) in changed {
            self.broadcast(
                Packet::HealthChanged {
                    entity_id,
                    current,
                    max,
                },
                None,
            );
        }
    }

    /// Sums the reconciliation counters of every player.
    pub fn replica_stats(&self) -> ReplicaStats {
        self.players
            .values()
            .map(|player| player.replica.stats())
            .fold(ReplicaStats::default(), |mut total, stats| {
                total.combined_moves += stats.combined_moves;
                total.rubber_banded += stats.rubber_banded;
                total.rejected_moves += stats.rejected_moves;
                total.forced_resets += stats.forced_resets;
                total
            })
    }
}

impl TickPhases for GameState {
    fn step_variable_rate(&mut self, dt: f32) {
        self.recovery_timer += dt;
        while self.recovery_timer >= 1.0 {
            self.recovery_timer -= 1.0;
            self.recover();
        }
    }

    fn step_fixed_rate(&mut self, fixed_dt: f32) {
        self.time += fixed_dt as f64;
        self.step_players();
        self.step_projectiles(fixed_dt);
        self.step_monsters(fixed_dt);
    }

    fn step_post_physics(&mut self, _dt: f32) {
        self.publish_monsters();
        self.tick += 1;

        if self.tick % 60 == 0 && !self.players.is_empty() {
            let stats = self.replica_stats();
            debug!(
                "Tick {}: {} players, {} monsters, {} projectiles, {} combined, {} rubber-banded, {} rejected, {} resets",
                self.tick,
                self.players.len(),
                self.monsters.len(),
                self.projectiles.len(),
                stats.combined_moves,
                stats.rubber_banded,
                stats.rejected_moves,
                stats.forced_resets
            );
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(GameConfig::default())
    }
}

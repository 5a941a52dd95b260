//! Simulation core shared by the server and the client.
//!
//! The server is authoritative over health, combat and AI, while each client
//! controls its own character and streams one [`MoveRecord`] per fixed tick.
//! Everything both sides must agree on lives here: the movement state
//! machine, move buffering and validation, damage rules, kinematic physics
//! and the wire protocol.

pub mod collider;
pub mod combat;
pub mod controller;
pub mod entity;
pub mod interact;
pub mod math;
pub mod movement;
pub mod physics;
pub mod schedule;
pub mod sync;

use entity::{EntityId, EntitySnapshot, MonsterState};
use math::Vec3;
use movement::{MoveRecord, RouteStamp};
use serde::{Deserialize, Serialize};

pub const GRAVITY: f32 = -9.81;
pub const PROTOCOL_VERSION: u32 = 1;
/// Fixed simulation step in seconds (50 Hz).
pub const FIXED_DELTA: f32 = 0.02;
pub const PLAYER_HEIGHT: f32 = 2.0;
pub const PLAYER_RADIUS: f32 = 0.4;
pub const MONSTER_HEIGHT: f32 = 1.8;
pub const MONSTER_RADIUS: f32 = 0.5;
/// Largest datagram either side sends or accepts.
pub const SERVER_BUFFER_SIZE: usize = 2048;
/// Reach for interacting with doors and the like.
pub const INTERACT_DISTANCE: f32 = 3.0;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
        name: String,
    },
    FixedMove {
        record: MoveRecord,
    },
    UseWeapon {
        slot: u8,
        look_at: Vec3,
    },
    Interact {
        target: u32,
    },
    Respawn,
    Disconnect,

    /// Carries the health pool so the client never simulates an unknown one.
    Connected {
        client_id: u32,
        entity_id: EntityId,
        position: Vec3,
        health: i32,
        health_max: i32,
    },
    Spawned {
        snapshot: EntitySnapshot,
    },
    Despawned {
        entity_id: EntityId,
    },
    ActorMove {
        entity_id: EntityId,
        record: MoveRecord,
    },
    ForceReset {
        entity_id: EntityId,
        position: Vec3,
        route: RouteStamp,
    },
    MonsterUpdate {
        entity_id: EntityId,
        state: MonsterState,
        target: Option<EntityId>,
        position: Vec3,
        yaw: f32,
    },
    AttackStarted {
        entity_id: EntityId,
    },
    DamageEffect {
        entity_id: EntityId,
        amount: i32,
        hit_point: Vec3,
        hit_normal: Vec3,
    },
    HealthChanged {
        entity_id: EntityId,
        current: i32,
        max: i32,
    },
    ProjectileSpawned {
        owner: EntityId,
        origin: Vec3,
        direction: Vec3,
    },
    DoorChanged {
        door_id: u32,
        open: bool,
    },
    Disconnected {
        reason: String,
    },
}

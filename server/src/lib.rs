//! # Survival Game Server Library
//!
//! Authoritative server for the survival shooter. It owns the canonical world:
//! where every character stands, how much health it has, what each monster
//! is doing. Clients send what their character did and the server replays,
//! validates and relays it.
//!
//! ## Core Responsibilities
//!
//! ### Movement Validation
//! Every connected player is mirrored by a [`shared::sync::MoveReplica`]
//! running in authoritative mode. Records from the owning client are
//! buffered, replayed one per fixed tick and checked for impossible speeds.
//! A move that fails the check, or a client that floods the buffer, gets
//! warped back with a bumped route stamp so stale records are dropped on
//! every peer.
//!
//! ### Combat
//! Weapons are resolved on the server against the committed positions of
//! all entities. Melee sweeps and hitscan rays are instant; bow arrows are
//! simulated as projectiles until they hit something or expire.
//!
//! ### Monsters
//! Zombies run a four state machine (idle, moving, attacking, dead) driven
//! by an aggro sphere and a straight line steering agent. They pick the
//! closest reachable player, chase it within their leash, strike on a fixed
//! interval and respawn at their anchor after a delay.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connection tracking keyed by socket address, with timeouts.
//!
//! ### Session Module (`session`)
//! The online player registry that guarantees one character per name.
//!
//! ### Game Module (`game`)
//! The simulation itself. It never touches a socket; packets are queued and
//! drained by the network layer after every frame.
//!
//! ### Monster, Navigation and Aggro Modules
//! Monster behaviour, the steering agent it moves with and the trigger
//! sphere that offers targets.
//!
//! ### Network Module (`network`)
//! UDP socket tasks, packet dispatch and the main tick loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::GameConfig;
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 50Hz ticks to match the fixed physics step, up to 16 players
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(20),
//!         16,
//!         GameConfig::default(),
//!     ).await?;
//!
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The server uses an event-driven architecture with internal async tasks that handle:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes outgoing packet queue and broadcasts
//! - **Timeout Checker**: Monitors client health and removes inactive connections
//! - **Main Game Loop**: Steps the simulation and flushes its packets

pub mod aggro;
pub mod client_manager;
pub mod game;
pub mod monster;
pub mod navigation;
pub mod network;
pub mod session;

//! # Survival Game Client Library
//!
//! Headless client for the survival shooter. Rendering, sound and raw
//! keyboard polling live outside this crate; what remains is the part that
//! has to agree with the server.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! The local character is moved immediately by the shared
//! [`shared::controller::LocalController`] state machine, once per fixed
//! tick, and every resulting [`shared::movement::MoveRecord`] is streamed to
//! the server. The client never waits for confirmation.
//!
//! ### Server Corrections
//! When the server rejects a move it answers with a forced reset carrying a
//! new route stamp. The controller jumps to the given position and stamps all
//! further records with the new route, so the server can drop everything
//! that was still in flight.
//!
//! ### Remote Actors
//! Other players are replayed from the records the server relays, through a
//! small buffer that absorbs jitter. Monsters are never simulated here; the
//! client only shows the state, target and position the server publishes.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! Local prediction, remote replicas, monster views, health and doors.
//!
//! ### Input Module (`input`)
//! Frame rate key samples turned into per tick intents, with latched presses,
//! modal capture and a scripted bot.
//!
//! ### Network Module (`network`)
//! UDP socket handling, optional fake latency and the frame loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // bot driven client with 50ms of simulated latency
//!     let mut client = Client::new("127.0.0.1:8080", "bot1", 50, Some(1)).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;

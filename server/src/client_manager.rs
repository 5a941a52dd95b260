//! Client connection management for the authoritative server
//!
//! This module tracks the transport side of every connected player:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Mapping between network addresses, client IDs and the simulated entity
//! - Capacity limits so a full server can refuse new players
//!
//! The simulation itself never sees socket addresses. It addresses players by
//! client ID, and the network layer resolves those IDs through this manager
//! when it sends packets.

use log::info;
use shared::entity::EntityId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Seconds of silence after which a client is dropped.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport record of one player session. The simulation side of the
/// player lives in the game state under `entity_id`.
#[derive(Debug)]
pub struct Client {
    pub id: u32,
    pub addr: SocketAddr,
    pub name: String,
    pub last_seen: Instant,
    /// Set once the simulation accepted the player.
    pub entity_id: Option<EntityId>,
    pub packets_received: u64,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, name: impl Into<String>) -> Self {
        Self {
            id,
            addr,
            name: name.into(),
            last_seen: Instant::now(),
            entity_id: None,
            packets_received: 0,
        }
    }

    /// Counts a datagram and resets the silence timer.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.packets_received += 1;
    }

    /// True when nothing arrived for longer than `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Session table keyed by client ID. Enforces the player cap and resolves
/// IDs back to addresses for the sender task.
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    /// IDs start at 1 and are never reused within a run.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Opens a session for `name` at `addr`. `None` when the server is full.
    pub fn add_client(&mut self, addr: SocketAddr, name: &str) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} ({}) connected from {}", client_id, name, addr);
        self.clients.insert(client_id, Client::new(client_id, addr, name));

        Some(client_id)
    }

    /// Closes a session. The returned record still names the entity the
    /// caller has to despawn.
    pub fn remove_client(&mut self, client_id: &u32) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!("Client {} ({}) disconnected", client.id, client.name);
        Some(client)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    /// Marks the client at `addr` as active and returns its ID
    pub fn touch(&mut self, addr: SocketAddr) -> Option<u32> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.touch();
        Some(client.id)
    }

    /// Links a client to the entity the simulation spawned for it
    pub fn attach_entity(&mut self, client_id: u32, entity_id: EntityId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.entity_id = Some(entity_id);
                true
            }
            None => false,
        }
    }

    pub fn entity_of(&self, client_id: u32) -> Option<EntityId> {
        self.clients.get(&client_id).and_then(|client| client.entity_id)
    }

    pub fn addr_of(&self, client_id: u32) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Drops every session silent for longer than [`CLIENT_TIMEOUT`] and
    /// returns their IDs so the simulation can despawn them.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let silent: Vec<u32> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(CLIENT_TIMEOUT))
            .map(|client| client.id)
            .collect();

        for client_id in &silent {
            if let Some(client) = self.clients.remove(client_id) {
                info!("Client {} ({}) timed out", client.id, client.name);
            }
        }

        silent
    }

    /// Broadcast targets.
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .values()
            .map(|client| (client.id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

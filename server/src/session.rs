//! Process scoped registry of the players that are currently online.

use log::{debug, warn};
use shared::entity::EntityId;
use std::collections::HashMap;

/// Maps player names to the entity that currently plays them.
///
/// Owned by the server session instead of living in a global. Entries are
/// registered when a player spawns and removed when it is torn down.
#[derive(Debug, Default)]
pub struct OnlineRegistry {
    players: HashMap<String, EntityId>,
}

impl OnlineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` for `entity`. Returns the entity that was registered
    /// under that name before, if any.
    pub fn register(&mut self, name: &str, entity: EntityId) -> Option<EntityId> {
        let previous = self.players.insert(name.to_string(), entity);
        if let Some(previous) = previous {
            warn!("{} re-registered: entity {} replaces {}", name, entity, previous);
        }
        previous
    }

    /// Removes `name` only if it still points at `entity`.
    ///
    /// A slot that was reused by a newer entity with the same name must
    /// survive the late teardown of the old one.
    pub fn unregister(&mut self, name: &str, entity: EntityId) -> bool {
        match self.players.get(name) {
            Some(current) if *current == entity => {
                self.players.remove(name);
                true
            }
            Some(current) => {
                debug!(
                    "Keeping {} registered to entity {} (teardown of {})",
                    name, current, entity
                );
                false
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<EntityId> {
        self.players.get(name).copied()
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.players.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

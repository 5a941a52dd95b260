use crate::collider::Bounds;
use crate::entity::EntityId;
use crate::math::Vec3;
use serde::{Deserialize, Serialize};

/// Something a player can use from up close, like a door.
pub trait Interactable {
    /// Prompt shown to a player in reach.
    fn interaction_text(&self) -> String;

    /// Local feedback on the interacting client. The server decides the outcome.
    fn on_interact_client(&mut self, _actor: EntityId) {}

    fn on_interact_server(&mut self, actor: EntityId);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Door {
    pub id: u32,
    pub bounds: Bounds,
    pub open: bool,
}

impl Door {
    pub fn new(id: u32, bounds: Bounds) -> Self {
        Self {
            id,
            bounds,
            open: false,
        }
    }
}

/// Doors of [`crate::physics::StaticWorld::arena`]. Both sides build the
/// same list so only the open flag travels over the wire.
pub fn arena_doors() -> Vec<Door> {
    vec![Door::new(
        1,
        Bounds::new(Vec3::new(-6.0, 1.0, 10.0), Vec3::new(0.6, 1.0, 0.1)),
    )]
}

impl Interactable for Door {
    fn interaction_text(&self) -> String {
        if self.open {
            "Close door".to_string()
        } else {
            "Open door".to_string()
        }
    }

    fn on_interact_server(&mut self, _actor: EntityId) {
        self.open = !self.open;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_door_toggles() {
        let mut door = Door::new(1, Bounds::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.5, 1.0, 0.1)));
        assert_eq!(door.interaction_text(), "Open door");
        door.on_interact_client(3);
        assert!(!door.open);
        door.on_interact_server(3);
        assert!(door.open);
        assert_eq!(door.interaction_text(), "Close door");
    }
}

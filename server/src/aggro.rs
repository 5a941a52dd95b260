use shared::collider::Bounds;
use shared::entity::EntityId;
use shared::math::Vec3;

/// Spherical trigger around a monster. Everything overlapping it is offered
/// to the monster as an aggro candidate every tick, the same way a trigger
/// stay callback would.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggroArea {
    pub radius: f32,
}

impl AggroArea {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    /// Entities whose colliders overlap the sphere at `center`, excluding
    /// `owner`. Filtering by kind and health is left to the monster.
    pub fn candidates<'a, I>(&self, owner: EntityId, center: Vec3, colliders: I) -> Vec<EntityId>
    where
        I: IntoIterator<Item = (EntityId, &'a Bounds)>,
    {
        let mut found: Vec<EntityId> = colliders
            .into_iter()
            .filter(|(id, bounds)| *id != owner && bounds.overlaps_sphere(center, self.radius))
            .map(|(id, _)| id)
            .collect();
        // stable order so seeded runs replay identically
        found.sort_unstable();
        found
    }
}

//! Damage resolution and weapon use.

use crate::collider::{Bounds, RayHit};
use crate::entity::{Entity, EntityId};
use crate::math::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatSettings {
    /// Top fraction of a collider that counts as the head.
    pub head_fraction: f32,
    pub head_multiplier: f32,
}

impl Default for CombatSettings {
    fn default() -> Self {
        Self {
            head_fraction: 0.15,
            head_multiplier: 2.0,
        }
    }
}

/// Damage multiplier for a hit at `point` on a victim occupying `bounds`.
pub fn hit_multiplier(bounds: &Bounds, point: Vec3, settings: &CombatSettings) -> f32 {
    let head_from = bounds.max().y - bounds.height() * settings.head_fraction;
    if point.y >= head_from {
        settings.head_multiplier
    } else {
        1.0
    }
}

/// Damage after the hit location multiplier and the victim's defense.
/// Always at least 1.
pub fn damage_dealt(amount: i32, multiplier: f32, defense: i32) -> i32 {
    let multiplied = (amount as f32 * multiplier).round() as i32;
    (multiplied - defense).max(1)
}

/// Applies a hit to `victim`. Returns the damage dealt, or `None` when the
/// victim was already dead. The attacker's combat time is the caller's job
/// since both entities are usually borrowed from the same collection.
pub fn resolve_damage(victim: &mut Entity, amount: i32, multiplier: f32, now: f64) -> Option<i32> {
    if victim.health() <= 0 {
        return None;
    }
    let dealt = damage_dealt(amount, multiplier, victim.defense());
    victim.set_health(victim.health() - dealt);
    victim.combat.last_combat_time = now;
    Some(dealt)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeaponKind {
    /// Sphere sweep from just behind the attacker.
    Melee { sphere_radius: f32 },
    /// Ray from the head.
    Hitscan { requires_ammo: bool },
    /// Spawns a server owned projectile.
    Projectile { speed: f32, requires_ammo: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weapon {
    pub name: String,
    pub kind: WeaponKind,
    pub damage: i32,
    pub range: f32,
    /// Seconds between uses.
    pub cooldown: f64,
    pub max_durability: u32,
    pub magazine_size: u32,
}

impl Weapon {
    pub fn axe() -> Self {
        Self {
            name: "Axe".to_string(),
            kind: WeaponKind::Melee { sphere_radius: 0.5 },
            damage: 10,
            range: 2.0,
            cooldown: 0.6,
            max_durability: 100,
            magazine_size: 0,
        }
    }

    pub fn rifle() -> Self {
        Self {
            name: "Rifle".to_string(),
            kind: WeaponKind::Hitscan { requires_ammo: true },
            damage: 25,
            range: 100.0,
            cooldown: 0.3,
            max_durability: 500,
            magazine_size: 20,
        }
    }

    pub fn bow() -> Self {
        Self {
            name: "Bow".to_string(),
            kind: WeaponKind::Projectile {
                speed: 30.0,
                requires_ammo: true,
            },
            damage: 20,
            range: 60.0,
            cooldown: 1.0,
            max_durability: 200,
            magazine_size: 10,
        }
    }

    fn requires_ammo(&self) -> bool {
        match self.kind {
            WeaponKind::Melee { .. } => false,
            WeaponKind::Hitscan { requires_ammo } => requires_ammo,
            WeaponKind::Projectile { requires_ammo, .. } => requires_ammo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Usability {
    Usable,
    Cooldown,
    Empty,
    Broken,
}

/// A weapon carried by a player together with its wear state.
#[derive(Debug, Clone, PartialEq)]
pub struct WeaponSlot {
    pub weapon: Weapon,
    pub durability: u32,
    pub ammo: u32,
    pub cooldown_end: f64,
}

impl WeaponSlot {
    pub fn new(weapon: Weapon) -> Self {
        Self {
            durability: weapon.max_durability,
            ammo: weapon.magazine_size,
            cooldown_end: 0.0,
            weapon,
        }
    }

    pub fn usability(&self, now: f64) -> Usability {
        if self.durability == 0 {
            Usability::Broken
        } else if now < self.cooldown_end {
            Usability::Cooldown
        } else if self.weapon.requires_ammo() && self.ammo == 0 {
            Usability::Empty
        } else {
            Usability::Usable
        }
    }

    fn wear(&mut self) {
        self.durability = self.durability.saturating_sub(1);
    }

    fn spend_ammo(&mut self) {
        if self.weapon.requires_ammo() {
            self.ammo = self.ammo.saturating_sub(1);
        }
    }
}

/// An entity struck by a cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityHit {
    pub entity: EntityId,
    pub hit: RayHit,
}

/// World queries used to find what a weapon hits. Static geometry blocks
/// both queries.
pub trait HitQuery {
    fn sphere_cast(
        &self,
        origin: Vec3,
        radius: f32,
        direction: Vec3,
        max_distance: f32,
        ignore: EntityId,
    ) -> Option<EntityHit>;

    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32, ignore: EntityId) -> Option<EntityHit>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UseOutcome {
    Rejected(Usability),
    Miss,
    Hit {
        victim: EntityId,
        amount: i32,
        point: Vec3,
        normal: Vec3,
    },
    Projectile {
        origin: Vec3,
        direction: Vec3,
        speed: f32,
        damage: i32,
    },
}

/// Point a little below the top of the collider, used as the eye position.
pub fn head_position(bounds: &Bounds) -> Vec3 {
    bounds.center.with_y(bounds.max().y - 0.1)
}

/// Uses the weapon in `slot` aimed at `look_at`. Spends cooldown, ammo and
/// durability; the caller applies damage for [`UseOutcome::Hit`] and spawns
/// projectiles.
pub fn use_weapon<Q: HitQuery>(
    slot: &mut WeaponSlot,
    user: &Entity,
    facing: Vec3,
    look_at: Vec3,
    now: f64,
    query: &Q,
) -> UseOutcome {
    let usability = slot.usability(now);
    if usability != Usability::Usable {
        return UseOutcome::Rejected(usability);
    }
    slot.cooldown_end = now + slot.weapon.cooldown;

    match slot.weapon.kind {
        WeaponKind::Melee { sphere_radius } => {
            let origin = user.bounds.center;
            // start behind so a victim hugging the attacker is still swept
            let behind = origin - facing.normalize() * sphere_radius;
            let direction = (look_at - origin).normalize();
            let hit = query.sphere_cast(
                behind,
                sphere_radius,
                direction,
                slot.weapon.range + sphere_radius,
                user.id,
            );
            match hit {
                Some(hit) => {
                    slot.wear();
                    UseOutcome::Hit {
                        victim: hit.entity,
                        amount: user.damage() + slot.weapon.damage,
                        point: hit.hit.point,
                        normal: hit.hit.normal,
                    }
                }
                None => UseOutcome::Miss,
            }
        }
        WeaponKind::Hitscan { .. } => {
            let head = head_position(&user.bounds);
            let direction = (look_at - head).normalize();
            let hit = query.raycast(head, direction, slot.weapon.range, user.id);
            slot.spend_ammo();
            slot.wear();
            match hit {
                Some(hit) => UseOutcome::Hit {
                    victim: hit.entity,
                    amount: slot.weapon.damage,
                    point: hit.hit.point,
                    normal: hit.hit.normal,
                },
                None => UseOutcome::Miss,
            }
        }
        WeaponKind::Projectile { speed, .. } => {
            let origin = head_position(&user.bounds);
            slot.spend_ammo();
            slot.wear();
            UseOutcome::Projectile {
                origin,
                direction: (look_at - origin).normalize(),
                speed,
                damage: slot.weapon.damage,
            }
        }
    }
}

/// Server owned projectile, advanced once per fixed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub owner: EntityId,
    pub position: Vec3,
    pub direction: Vec3,
    pub speed: f32,
    pub damage: i32,
    pub remaining_life: f32,
}

impl Projectile {
    pub const LIFETIME: f32 = 5.0;

    pub fn new(owner: EntityId, origin: Vec3, direction: Vec3, speed: f32, damage: i32) -> Self {
        Self {
            owner,
            position: origin,
            direction: direction.normalize(),
            speed,
            damage,
            remaining_life: Self::LIFETIME,
        }
    }

    /// Segment covered during the next `dt` seconds.
    pub fn next_segment(&self, dt: f32) -> (Vec3, Vec3) {
        (self.position, self.position + self.direction * (self.speed * dt))
    }

    pub fn advance(&mut self, dt: f32) {
        self.position += self.direction * (self.speed * dt);
        self.remaining_life -= dt;
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_life <= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use assert_approx_eq::assert_approx_eq;

    /// One target box, hit by any cast that reaches it.
    struct OneTarget {
        id: EntityId,
        bounds: Option<Bounds>,
    }

    impl HitQuery for OneTarget {
        fn sphere_cast(
            &self,
            origin: Vec3,
            radius: f32,
            direction: Vec3,
            max_distance: f32,
            ignore: EntityId,
        ) -> Option<EntityHit> {
            let bounds = self.bounds?.expanded(radius);
            if self.id == ignore {
                return None;
            }
            bounds
                .ray_cast(origin, direction, max_distance)
                .map(|hit| EntityHit { entity: self.id, hit })
        }

        fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32, ignore: EntityId) -> Option<EntityHit> {
            self.sphere_cast(origin, 0.0, direction, max_distance, ignore)
        }
    }

    fn fighter() -> Entity {
        let mut entity = Entity::new(1, EntityKind::Player, "fighter", 100, Bounds::from_feet(Vec3::ZERO, 0.4, 2.0));
        entity.combat.base_damage = 5;
        entity
    }

    fn target_at(z: f32) -> OneTarget {
        OneTarget {
            id: 2,
            bounds: Some(Bounds::from_feet(Vec3::new(0.0, 0.0, z), 0.4, 2.0)),
        }
    }

    #[test]
    fn test_damage_floor() {
        assert_eq!(damage_dealt(10, 1.0, 3), 7);
        assert_eq!(damage_dealt(0, 1.0, 0), 1);
        assert_eq!(damage_dealt(5, 1.0, 50), 1);
        assert_eq!(damage_dealt(10, 2.0, 5), 15);
        assert_eq!(damage_dealt(3, 1.5, 0), 5);
    }

    #[test]
    fn test_resolve_damage_on_dead_victim_is_noop() {
        let mut victim = fighter();
        victim.set_health(0);
        victim.combat.last_combat_time = 1.0;
        assert_eq!(resolve_damage(&mut victim, 50, 1.0, 9.0), None);
        assert_eq!(victim.health(), 0);
        assert_eq!(victim.combat.last_combat_time, 1.0);
    }

    #[test]
    fn test_resolve_damage_updates_health_and_time() {
        let mut victim = fighter();
        victim.combat.base_defense = 4;
        assert_eq!(resolve_damage(&mut victim, 10, 1.0, 3.5), Some(6));
        assert_eq!(victim.health(), 94);
        assert_eq!(victim.combat.last_combat_time, 3.5);
    }

    #[test]
    fn test_head_multiplier() {
        let settings = CombatSettings::default();
        let bounds = Bounds::from_feet(Vec3::ZERO, 0.4, 2.0);
        assert_approx_eq!(hit_multiplier(&bounds, Vec3::new(0.0, 1.9, 0.0), &settings), 2.0);
        assert_approx_eq!(hit_multiplier(&bounds, Vec3::new(0.0, 1.0, 0.0), &settings), 1.0);
    }

    #[test]
    fn test_melee_miss_keeps_durability() {
        let user = fighter();
        let mut slot = WeaponSlot::new(Weapon::axe());
        let facing = Vec3::new(0.0, 0.0, 1.0);
        let outcome = use_weapon(&mut slot, &user, facing, Vec3::new(0.0, 1.0, 10.0), 0.0, &target_at(8.0));
        assert_eq!(outcome, UseOutcome::Miss);
        assert_eq!(slot.durability, 100);
    }

    #[test]
    fn test_melee_hit_spends_durability() {
        let user = fighter();
        let mut slot = WeaponSlot::new(Weapon::axe());
        let facing = Vec3::new(0.0, 0.0, 1.0);
        let outcome = use_weapon(&mut slot, &user, facing, Vec3::new(0.0, 1.0, 10.0), 0.0, &target_at(1.5));
        match outcome {
            UseOutcome::Hit { victim, amount, .. } => {
                assert_eq!(victim, 2);
                assert_eq!(amount, 15);
            }
            other => panic!("expected hit, got {:?}", other),
        }
        assert_eq!(slot.durability, 99);
        assert_eq!(slot.usability(0.1), Usability::Cooldown);
        assert_eq!(slot.usability(1.0), Usability::Usable);
    }

    #[test]
    fn test_hitscan_spends_ammo_on_miss() {
        let user = fighter();
        let mut slot = WeaponSlot::new(Weapon::rifle());
        let empty = OneTarget { id: 2, bounds: None };
        let outcome = use_weapon(&mut slot, &user, Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.9, 50.0), 0.0, &empty);
        assert_eq!(outcome, UseOutcome::Miss);
        assert_eq!(slot.ammo, 19);
        assert_eq!(slot.durability, 499);
    }

    #[test]
    fn test_empty_and_broken() {
        let mut slot = WeaponSlot::new(Weapon::rifle());
        slot.ammo = 0;
        assert_eq!(slot.usability(0.0), Usability::Empty);
        slot.durability = 0;
        assert_eq!(slot.usability(0.0), Usability::Broken);

        let mut axe = WeaponSlot::new(Weapon::axe());
        axe.ammo = 0;
        assert_eq!(axe.usability(0.0), Usability::Usable);
    }

    #[test]
    fn test_projectile_use_and_flight() {
        let user = fighter();
        let mut slot = WeaponSlot::new(Weapon::bow());
        let outcome = use_weapon(&mut slot, &user, Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.9, 30.0), 0.0, &target_at(5.0));
        let UseOutcome::Projectile { origin, direction, speed, damage } = outcome else {
            panic!("expected projectile, got {:?}", outcome);
        };
        assert_eq!(damage, 20);
        assert_eq!(slot.ammo, 9);

        let mut projectile = Projectile::new(user.id, origin, direction, speed, damage);
        projectile.advance(0.1);
        assert_approx_eq!(projectile.position.z, 3.0, 1e-4);
        assert!(!projectile.is_expired());
    }
}

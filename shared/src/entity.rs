use crate::collider::Bounds;
use crate::math::Vec3;
use crate::movement::{MoveState, RouteStamp};
use serde::{Deserialize, Serialize};

pub type EntityId = u32;
pub type BonusId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Monster,
    Structure,
}

impl EntityKind {
    /// Monsters only ever pick players as targets.
    pub fn is_attackable(&self) -> bool {
        matches!(self, EntityKind::Player)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BonusKind {
    Health,
    /// Fraction of the base maximum, e.g. 0.1 for +10%.
    HealthPercent,
    HealthRecovery,
    Damage,
    Defense,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bonus {
    pub kind: BonusKind,
    pub value: f32,
}

impl Bonus {
    pub fn new(kind: BonusKind, value: f32) -> Self {
        Self { kind, value }
    }
}

/// Contributions granted by equipment, buffs and the like. Sums are
/// evaluated on every query so swapping equipment takes effect immediately.
#[derive(Debug, Clone, Default)]
pub struct BonusRegistry {
    next_id: BonusId,
    bonuses: Vec<(BonusId, Bonus)>,
}

impl BonusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, bonus: Bonus) -> BonusId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.bonuses.push((id, bonus));
        id
    }

    pub fn unregister(&mut self, id: BonusId) -> Option<Bonus> {
        let index = self.bonuses.iter().position(|(bonus_id, _)| *bonus_id == id)?;
        Some(self.bonuses.remove(index).1)
    }

    pub fn sum(&self, kind: BonusKind) -> f32 {
        self.bonuses
            .iter()
            .filter(|(_, bonus)| bonus.kind == kind)
            .map(|(_, bonus)| bonus.value)
            .sum()
    }

    /// Flat health bonuses plus percentage bonuses of `base`.
    pub fn health_bonus(&self, base: i32) -> i32 {
        let flat = self.sum(BonusKind::Health);
        let percent = self.sum(BonusKind::HealthPercent) * base as f32;
        (flat + percent).round() as i32
    }

    pub fn len(&self) -> usize {
        self.bonuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonuses.is_empty()
    }
}

/// Stamina spent while running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Endurance {
    pub current: i32,
    pub max: i32,
    pub drain_per_second: i32,
    pub recovery_per_second: i32,
}

impl Default for Endurance {
    fn default() -> Self {
        Self {
            current: 100,
            max: 100,
            drain_per_second: 1,
            recovery_per_second: 1,
        }
    }
}

impl Endurance {
    /// One second worth of drain or recovery.
    pub fn tick(&mut self, running: bool) {
        let delta = if running {
            -self.drain_per_second
        } else {
            self.recovery_per_second
        };
        self.current = (self.current + delta).clamp(0, self.max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatProfile {
    pub base_damage: i32,
    pub base_defense: i32,
    /// Simulation time of the last hit dealt or received.
    pub last_combat_time: f64,
}

impl Default for CombatProfile {
    fn default() -> Self {
        Self {
            base_damage: 1,
            base_defense: 0,
            last_combat_time: f64::NEG_INFINITY,
        }
    }
}

/// Attributes shared by every simulated actor.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    health: i32,
    pub base_health: i32,
    pub base_health_recovery: i32,
    pub endurance: Endurance,
    pub combat: CombatProfile,
    pub bonuses: BonusRegistry,
    pub bounds: Bounds,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, name: impl Into<String>, base_health: i32, bounds: Bounds) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            health: base_health,
            base_health,
            base_health_recovery: 0,
            endurance: Endurance::default(),
            combat: CombatProfile::default(),
            bonuses: BonusRegistry::new(),
            bounds,
        }
    }

    pub fn health_max(&self) -> i32 {
        self.base_health + self.bonuses.health_bonus(self.base_health)
    }

    /// Current health, never above the present maximum even when a bonus
    /// was removed since it was last written.
    pub fn health(&self) -> i32 {
        self.health.min(self.health_max())
    }

    pub fn set_health(&mut self, value: i32) {
        self.health = value.clamp(0, self.health_max().max(0));
    }

    pub fn is_alive(&self) -> bool {
        self.health() > 0
    }

    pub fn health_percent(&self) -> f32 {
        let max = self.health_max();
        if max > 0 {
            self.health() as f32 / max as f32
        } else {
            0.0
        }
    }

    pub fn health_recovery(&self) -> i32 {
        self.base_health_recovery + self.bonuses.sum(BonusKind::HealthRecovery).round() as i32
    }

    /// Applies one second of recovery. Dead entities do not regenerate.
    pub fn recover_health(&mut self) {
        if self.is_alive() {
            self.set_health(self.health() + self.health_recovery());
        }
    }

    pub fn damage(&self) -> i32 {
        self.combat.base_damage + self.bonuses.sum(BonusKind::Damage).round() as i32
    }

    pub fn defense(&self) -> i32 {
        self.combat.base_defense + self.bonuses.sum(BonusKind::Defense).round() as i32
    }

    pub fn position(&self) -> Vec3 {
        self.bounds.center.with_y(self.bounds.min().y)
    }
}

/// Server side AI state. Clients only use it to pick animations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MonsterState {
    #[default]
    Idle,
    Moving,
    Attacking,
    Dead,
}

/// Everything a client needs to show a newly visible entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub position: Vec3,
    pub yaw: f32,
    pub state: MoveState,
    pub monster_state: Option<MonsterState>,
    pub route: RouteStamp,
    pub health: i32,
    pub health_max: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn test_entity() -> Entity {
        Entity::new(
            1,
            EntityKind::Player,
            "tester",
            100,
            Bounds::from_feet(Vec3::ZERO, 0.5, 2.0),
        )
    }

    #[test]
    fn test_health_clamped_to_max() {
        let mut entity = test_entity();
        entity.set_health(500);
        assert_eq!(entity.health(), 100);
        entity.set_health(-5);
        assert_eq!(entity.health(), 0);
        assert!(!entity.is_alive());
    }

    #[test]
    fn test_health_max_recomputed_after_bonus_changes() {
        let mut entity = test_entity();
        let armor = entity.bonuses.register(Bonus::new(BonusKind::Health, 20.0));
        let ring = entity.bonuses.register(Bonus::new(BonusKind::HealthPercent, 0.1));
        assert_eq!(entity.health_max(), 130);

        entity.set_health(130);
        assert_eq!(entity.health(), 130);

        entity.bonuses.unregister(armor);
        assert_eq!(entity.health_max(), 110);
        assert_eq!(entity.health(), 110);

        assert!(entity.bonuses.unregister(ring).is_some());
        assert!(entity.bonuses.unregister(ring).is_none());
        assert!(entity.bonuses.is_empty());
    }

    #[test]
    fn test_damage_and_defense_sum_bonuses() {
        let mut entity = test_entity();
        entity.combat.base_damage = 10;
        entity.combat.base_defense = 2;
        entity.bonuses.register(Bonus::new(BonusKind::Damage, 5.0));
        entity.bonuses.register(Bonus::new(BonusKind::Damage, 3.0));
        entity.bonuses.register(Bonus::new(BonusKind::Defense, 4.0));
        assert_eq!(entity.damage(), 18);
        assert_eq!(entity.defense(), 6);
    }

    #[test]
    fn test_recovery_includes_bonuses() {
        let mut entity = test_entity();
        entity.base_health_recovery = 1;
        entity.bonuses.register(Bonus::new(BonusKind::HealthRecovery, 2.0));
        entity.set_health(50);
        entity.recover_health();
        assert_eq!(entity.health(), 53);

        entity.set_health(0);
        entity.recover_health();
        assert_eq!(entity.health(), 0);
    }

    #[test]
    fn test_endurance_drains_and_recovers() {
        let mut endurance = Endurance {
            current: 1,
            ..Endurance::default()
        };
        endurance.tick(true);
        assert_eq!(endurance.current, 0);
        endurance.tick(true);
        assert_eq!(endurance.current, 0);
        endurance.tick(false);
        assert_eq!(endurance.current, 1);
    }

    #[test]
    fn test_position_is_feet() {
        let entity = test_entity();
        assert_approx_eq!(entity.position().y, 0.0);
        assert_approx_eq!(entity.health_percent(), 1.0);
    }
}
